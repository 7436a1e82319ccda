//! Context declarations and render-time bindings.
//!
//! A template declares which context variables its request, responses and
//! actions may reference. During a render pass those names are bound to
//! values that actions can overwrite.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Variables a template declares as available, with their default values.
///
/// Accepts either a list of names or a name-to-default map:
///
/// ```yaml
/// context: [amount, status]
/// # or
/// context:
///   amount: "0"
///   status: pending
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ContextEntries", into = "BTreeMap<String, String>")]
pub struct ContextDeclaration {
    variables: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContextEntries {
    Names(Vec<String>),
    Defaults(BTreeMap<String, String>),
}

impl From<ContextEntries> for ContextDeclaration {
    fn from(entries: ContextEntries) -> Self {
        match entries {
            ContextEntries::Names(names) => Self::declare(names),
            ContextEntries::Defaults(variables) => Self { variables },
        }
    }
}

impl From<ContextDeclaration> for BTreeMap<String, String> {
    fn from(declaration: ContextDeclaration) -> Self {
        declaration.variables
    }
}

impl ContextDeclaration {
    /// Declare a set of variable names, each defaulting to an empty value.
    pub fn declare<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            variables: names
                .into_iter()
                .map(|name| (name.into(), String::new()))
                .collect(),
        }
    }

    /// Declare a variable with a default value.
    pub fn with_default(mut self, name: impl Into<String>, default: impl Into<String>) -> Self {
        self.variables.insert(name.into(), default.into());
        self
    }

    /// Case-sensitive membership test.
    pub fn is_declared(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// True when no context was declared.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn default_value(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }
}

/// Live bindings for a single render pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderContext {
    values: BTreeMap<String, String>,
    /// Whole-context object supplied by the caller, referenced by a bare `_context`.
    external: Option<serde_json::Value>,
}

impl RenderContext {
    /// Seed a render context from a declaration. Every declared name is bound
    /// to its default value.
    pub fn seeded(declaration: &ContextDeclaration) -> Self {
        Self {
            values: declaration.variables.clone(),
            external: None,
        }
    }

    pub fn with_external(mut self, external: Option<serde_json::Value>) -> Self {
        self.external = external;
        self
    }

    /// Bind a value, overwriting any previous one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn external(&self) -> Option<&serde_json::Value> {
        self.external.as_ref()
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}
