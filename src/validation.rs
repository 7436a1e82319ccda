//! Template, response and action validation.
//!
//! Every check appends to a [`ValidationReport`]; nothing short-circuits, so
//! callers can report all problems at once.

use crate::action;
use crate::context::ContextDeclaration;
use crate::model::{ResponseTemplate, Template};
use crate::placeholder;
use serde::Serialize;

const KNOWN_METHODS: [&str; 7] = ["get", "post", "put", "patch", "delete", "head", "options"];

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    errors: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<String> {
        self.errors
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
    }

    fn require(&mut self, value: &str, field: &str) {
        if value.trim().is_empty() {
            self.push(format!("{} is required", field));
        }
    }
}

/// Check every context field referenced in `text` against `declared`.
fn check_context_usage(
    report: &mut ValidationReport,
    declared: &ContextDeclaration,
    text: &str,
    location: &str,
) {
    if !placeholder::uses_context(text) {
        return;
    }
    for name in placeholder::scan_references(text) {
        if !declared.is_declared(&name) {
            report.push(format!(
                "context not declared: `{}` is referenced in {}",
                name, location
            ));
        }
    }
}

fn check_response_context(
    report: &mut ValidationReport,
    declared: &ContextDeclaration,
    response: &ResponseTemplate,
) {
    let location = format!("response `{}`", response.response_id);
    check_context_usage(report, declared, &response.body, &location);
    for (name, value) in &response.headers {
        check_context_usage(
            report,
            declared,
            value,
            &format!("header `{}` of {}", name, location),
        );
    }
}

/// Validate a template together with the responses attached to it.
pub fn validate_template(template: &Template, attached: &[ResponseTemplate]) -> ValidationReport {
    let mut report = ValidationReport::new();

    report.require(&template.user, "user");
    report.require(&template.route.version, "route.version");
    report.require(&template.route.name, "route.name");
    report.require(&template.route.method, "route.method");

    let method = template.route.method.trim().to_lowercase();
    if !method.is_empty() && !KNOWN_METHODS.contains(&method.as_str()) {
        report.push(format!(
            "route.method `{}` is not a supported HTTP method",
            template.route.method
        ));
    }

    let declared = template.context();

    if let Some(body) = template.request.body() {
        if body.trim().is_empty() {
            report.push("request.body is required for post requests");
        }
        check_context_usage(&mut report, declared, body, "request body");
    }

    for (name, value) in template.request.headers() {
        if name.trim().is_empty() {
            report.push("request header names cannot be empty");
        }
        check_context_usage(
            &mut report,
            declared,
            value,
            &format!("request header `{}`", name),
        );
    }

    for response in attached {
        check_response_context(&mut report, declared, response);
    }

    for (index, act) in template.actions.iter().enumerate() {
        if action::parse(&act.execute).is_none() {
            report.push(format!(
                "action {} `{}` is not a `_context{{{{name}}}}=value` assignment",
                index, act.execute
            ));
        }
        check_context_usage(
            &mut report,
            declared,
            &act.execute,
            &format!("action {}", index),
        );
    }

    report
}

/// Validate a standalone response definition.
pub fn validate_response(response: &ResponseTemplate) -> ValidationReport {
    let mut report = ValidationReport::new();

    report.require(&response.user, "user");
    report.require(&response.response_id, "response_id");

    if !(100..=599).contains(&response.status_code) {
        report.push(format!("Invalid status code: {}", response.status_code));
    }

    for name in response.headers.keys() {
        if name.trim().is_empty() {
            report.push(format!(
                "response `{}` has an empty header name",
                response.response_id
            ));
        }
    }

    report
}

/// Cross-check a template's attached response ids against `candidates`.
///
/// Reports ids that do not resolve to a candidate, and context references in
/// the resolved bodies that the template does not declare.
pub fn validate_against_existing_responses(
    template: &Template,
    candidates: &[ResponseTemplate],
) -> ValidationReport {
    let mut report = ValidationReport::new();
    let declared = template.context();

    for id in &template.responses {
        match candidates.iter().find(|r| r.id == *id) {
            Some(response) => check_response_context(&mut report, declared, response),
            None => report.push(format!("response {} does not exist for this user", id)),
        }
    }

    report
}
