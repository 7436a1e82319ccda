//! Template, request, response and action entities.

use crate::context::ContextDeclaration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Route identity of a template within a user's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteTemplate {
    pub version: String,
    pub name: String,
    pub method: String,
}

impl RouteTemplate {
    pub fn new(
        version: impl Into<String>,
        name: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            name: name.into(),
            method: method.into(),
        }
    }

    /// Route used for templates generated from a sample request body.
    pub fn generated() -> Self {
        Self::new("v1", "route", "post")
    }

    /// Case-insensitive route identity comparison.
    pub fn same_route(&self, other: &RouteTemplate) -> bool {
        eq_ignore_case(&self.version, &other.version)
            && eq_ignore_case(&self.name, &other.name)
            && eq_ignore_case(&self.method, &other.method)
    }
}

/// Case-insensitive string equality used for users and routes.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Request shape of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestTemplate {
    /// Request carrying a body pattern
    Post(PostRequestTemplate),
    /// Request without a body
    Get(GetRequestTemplate),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostRequestTemplate {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub context: ContextDeclaration,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetRequestTemplate {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub context: ContextDeclaration,
}

impl RequestTemplate {
    pub fn post(body: impl Into<String>) -> Self {
        RequestTemplate::Post(PostRequestTemplate {
            body: body.into(),
            ..Default::default()
        })
    }

    pub fn get() -> Self {
        RequestTemplate::Get(GetRequestTemplate::default())
    }

    pub fn with_context(mut self, context: ContextDeclaration) -> Self {
        match &mut self {
            RequestTemplate::Post(req) => req.context = context,
            RequestTemplate::Get(req) => req.context = context,
        }
        self
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        match self {
            RequestTemplate::Post(req) => &req.headers,
            RequestTemplate::Get(req) => &req.headers,
        }
    }

    pub fn context(&self) -> &ContextDeclaration {
        match self {
            RequestTemplate::Post(req) => &req.context,
            RequestTemplate::Get(req) => &req.context,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            RequestTemplate::Post(req) => Some(&req.body),
            RequestTemplate::Get(_) => None,
        }
    }
}

/// Context assignment executed before rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Action {
    pub execute: String,
}

impl Action {
    pub fn new(execute: impl Into<String>) -> Self {
        Self {
            execute: execute.into(),
        }
    }
}

/// A stored mock template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub user: String,
    pub route: RouteTemplate,
    pub request: RequestTemplate,
    /// Internal ids of attached responses, in order.
    #[serde(default)]
    pub responses: Vec<Uuid>,
    #[serde(default)]
    pub actions: Vec<Action>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    pub fn new(user: impl Into<String>, route: RouteTemplate, request: RequestTemplate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user: user.into(),
            route,
            request,
            responses: Vec::new(),
            actions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn context(&self) -> &ContextDeclaration {
        self.request.context()
    }

    /// Attach responses, skipping ids that are already attached.
    pub fn attach_responses<'a>(&mut self, responses: impl IntoIterator<Item = &'a ResponseTemplate>) {
        for response in responses {
            if !self.responses.contains(&response.id) {
                self.responses.push(response.id);
            }
        }
    }

    pub fn belongs_to(&self, user: &str) -> bool {
        eq_ignore_case(&self.user, user)
    }
}

/// A stored mock response, shared between templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseTemplate {
    pub id: Uuid,
    pub user: String,
    pub response_id: String,
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResponseTemplate {
    pub fn new(user: impl Into<String>, response_id: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user: user.into(),
            response_id: response_id.into(),
            status_code: 200,
            headers: BTreeMap::new(),
            body: body.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn belongs_to(&self, user: &str) -> bool {
        eq_ignore_case(&self.user, user)
    }

    /// True if this is `response_id` of `user`.
    pub fn is_keyed(&self, user: &str, response_id: &str) -> bool {
        self.belongs_to(user) && self.response_id == response_id
    }
}
