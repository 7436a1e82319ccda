//! Route matching logic.
//!
//! Matches an incoming mock invocation against stored templates and picks the
//! response to render.

use crate::model::{eq_ignore_case, ResponseTemplate, Template};
use std::fmt;

/// Route identity of an inbound mock call. All fields compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteQuery {
    pub user: String,
    pub name: String,
    pub method: String,
    pub version: String,
}

impl RouteQuery {
    pub fn new(
        user: impl Into<String>,
        name: impl Into<String>,
        method: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            name: name.into(),
            method: method.into(),
            version: version.into(),
        }
    }

    /// Exact, case-insensitive tuple equality.
    pub fn matches(&self, template: &Template) -> bool {
        template.belongs_to(&self.user)
            && eq_ignore_case(&template.route.name, &self.name)
            && eq_ignore_case(&template.route.method, &self.method)
            && eq_ignore_case(&template.route.version, &self.version)
    }
}

impl fmt::Display for RouteQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{}/{}",
            self.method, self.user, self.version, self.name
        )
    }
}

/// Find the template for a route.
pub fn find_match<'a>(templates: &'a [Template], query: &RouteQuery) -> Option<&'a Template> {
    templates.iter().find(|t| query.matches(t))
}

/// Which attached response to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSelector {
    /// Position in the template's ordered response list.
    Index(usize),
    /// User-chosen response id.
    ResponseId(String),
}

impl fmt::Display for ResponseSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseSelector::Index(i) => write!(f, "response #{}", i),
            ResponseSelector::ResponseId(id) => write!(f, "response [{}]", id),
        }
    }
}

/// Pick the selected response among those attached to `template`.
///
/// `responses` may contain more than the attached set; only attached ids are
/// considered.
pub fn select_response<'a>(
    template: &Template,
    responses: &'a [ResponseTemplate],
    selector: &ResponseSelector,
) -> Option<&'a ResponseTemplate> {
    match selector {
        ResponseSelector::Index(index) => {
            let id = template.responses.get(*index)?;
            responses.iter().find(|r| r.id == *id)
        }
        ResponseSelector::ResponseId(response_id) => template
            .responses
            .iter()
            .filter_map(|id| responses.iter().find(|r| r.id == *id))
            .find(|r| r.response_id == *response_id),
    }
}
