//! Configuration for the mock template service.
//!
//! Holds global settings and the templates and responses to seed per user.

use crate::definition::{ResponseDefinition, TemplateDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// Templates and responses loaded at startup, per user
    #[serde(default)]
    pub users: Vec<UserSeed>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Only checks the file's own shape; template rules run when seeding.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.settings.validate()?;
        for (i, seed) in self.users.iter().enumerate() {
            seed.validate()
                .map_err(|e| anyhow::anyhow!("User {}: {}", i, e))?;
        }
        Ok(())
    }

    pub fn template_count(&self) -> usize {
        self.users.iter().map(|u| u.templates.len()).sum()
    }

    pub fn response_count(&self) -> usize {
        self.users.iter().map(|u| u.responses.len()).sum()
    }
}

/// Templates and responses owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserSeed {
    pub user: String,

    /// Standalone responses, created before the templates
    #[serde(default)]
    pub responses: Vec<ResponseDefinition>,

    #[serde(default)]
    pub templates: Vec<TemplateDefinition>,
}

impl UserSeed {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.user.trim().is_empty() {
            anyhow::bail!("user cannot be empty");
        }
        Ok(())
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log matched invocations
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log invocations with no matching template
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Content type added to rendered responses without one
    #[serde(default = "default_content_type")]
    pub default_content_type: String,

    /// Prefix of the route returned to clients (`{prefix}/{user}/{version}/{name}`)
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,
}

impl GlobalSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_content_type.trim().is_empty() {
            anyhow::bail!("default_content_type cannot be empty");
        }
        Ok(())
    }
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
            default_content_type: default_content_type(),
            route_prefix: default_route_prefix(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_route_prefix() -> String {
    "api".to_string()
}
