//! Response rendering.
//!
//! Runs a template's actions against a fresh render context, then resolves
//! context placeholders in the selected response.

use crate::action::{self, ActionError};
use crate::context::RenderContext;
use crate::model::{ResponseTemplate, Template};
use crate::placeholder;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Final response produced for a mock invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// Actions skipped during rendering
    #[serde(
        serialize_with = "serialize_warnings",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub warnings: Vec<ActionError>,
}

fn serialize_warnings<S: Serializer>(
    warnings: &[ActionError],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(warnings.iter().map(ToString::to_string))
}

/// Renderer for mock responses.
#[derive(Debug, Clone)]
pub struct Renderer {
    default_content_type: String,
}

impl Renderer {
    pub fn new(default_content_type: impl Into<String>) -> Self {
        Self {
            default_content_type: default_content_type.into(),
        }
    }

    /// Render `response` for `template`.
    ///
    /// `external` is the caller-supplied object a bare `_context` resolves to.
    pub fn render(
        &self,
        template: &Template,
        response: &ResponseTemplate,
        external: Option<serde_json::Value>,
    ) -> RenderedResponse {
        let mut context = RenderContext::seeded(template.context()).with_external(external);
        let warnings = action::execute(&template.actions, &mut context);

        let mut headers: BTreeMap<String, String> = response
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), placeholder::resolve(value, &context)))
            .collect();

        if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
            headers.insert(
                "Content-Type".to_string(),
                self.default_content_type.clone(),
            );
        }

        RenderedResponse {
            status: response.status_code,
            headers,
            body: placeholder::resolve(&response.body, &context),
            warnings,
        }
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new("application/json")
    }
}
