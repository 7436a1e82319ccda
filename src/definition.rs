//! Client-facing template and response definitions.
//!
//! Definitions are what callers send and what the configuration file holds.
//! They are projected into domain entities before validation.

use crate::model::{Action, RequestTemplate, ResponseTemplate, RouteTemplate, Template};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Template as submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateDefinition {
    pub route: RouteTemplate,
    pub request: RequestTemplate,

    /// Responses created (or, on update, upserted) together with the template
    #[serde(default)]
    pub responses: Vec<ResponseDefinition>,

    /// Existing responses of the same user to attach, by `response_id`
    #[serde(default)]
    pub response_ids: Vec<String>,

    #[serde(default)]
    pub actions: Vec<Action>,
}

impl TemplateDefinition {
    /// Project into a new template owned by `user`. Responses are not attached.
    pub fn to_template(&self, user: &str) -> Template {
        let mut template = Template::new(user, self.route.clone(), self.request.clone());
        template.actions = self.actions.clone();
        template
    }

    /// Project the inline responses for `user`.
    pub fn to_responses(&self, user: &str) -> Vec<ResponseTemplate> {
        self.responses.iter().map(|r| r.to_response(user)).collect()
    }
}

/// Response as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    pub response_id: String,

    #[serde(default = "default_status")]
    pub status_code: u16,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub body: String,
}

fn default_status() -> u16 {
    200
}

impl ResponseDefinition {
    /// Project into a new response owned by `user`.
    pub fn to_response(&self, user: &str) -> ResponseTemplate {
        let mut response = ResponseTemplate::new(user, &self.response_id, &self.body);
        response.status_code = self.status_code;
        response.headers = self.headers.clone();
        response
    }

    /// Apply this definition onto a stored response, keeping its identity.
    pub fn apply_to(&self, existing: &ResponseTemplate) -> ResponseTemplate {
        ResponseTemplate {
            id: existing.id,
            user: existing.user.clone(),
            response_id: existing.response_id.clone(),
            status_code: self.status_code,
            headers: self.headers.clone(),
            body: self.body.clone(),
            created_at: existing.created_at,
            updated_at: Utc::now(),
        }
    }
}

impl From<&ResponseTemplate> for ResponseDefinition {
    fn from(response: &ResponseTemplate) -> Self {
        Self {
            response_id: response.response_id.clone(),
            status_code: response.status_code,
            headers: response.headers.clone(),
            body: response.body.clone(),
        }
    }
}

/// Typed description of an inbound mock call's runtime inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request body, parsed as JSON when possible
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl InvocationRequest {
    /// Build from a raw body. Non-JSON text is kept as a JSON string.
    pub fn from_raw_body(raw: &str) -> Self {
        let body = if raw.trim().is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(raw)
                    .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
            )
        };
        Self {
            headers: BTreeMap::new(),
            body,
        }
    }
}

/// View of a stored template returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateView {
    pub token: Uuid,
    pub route: RouteTemplate,
    pub request: RequestTemplate,
    pub actions: Vec<Action>,
    pub responses: Vec<ResponseDefinition>,
}

impl TemplateView {
    /// Build a view, listing attached responses in template order.
    pub fn new(template: &Template, responses: &[ResponseTemplate]) -> Self {
        Self {
            token: template.id,
            route: template.route.clone(),
            request: template.request.clone(),
            actions: template.actions.clone(),
            responses: template
                .responses
                .iter()
                .filter_map(|id| responses.iter().find(|r| r.id == *id))
                .map(ResponseDefinition::from)
                .collect(),
        }
    }
}
