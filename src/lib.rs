//! Camaleao Mock Templates
//!
//! Users register templates that describe how a mock route is matched and how
//! its response is produced, with variables substituted from a per-render
//! context.
//!
//! # Features
//!
//! - **Context Validation**: Templates may only reference context they declare
//! - **Route Matching**: One template per user, version, name and method
//! - **Actions**: `_context{{name}}=value` assignments run before rendering
//! - **Placeholders**: `_context.{{name}}`, `_context.$$name$$` and bare `_context`
//! - **Shared Responses**: Responses are stored once and attached by id
//!
//! # Example Configuration
//!
//! ```yaml
//! users:
//!   - user: alice
//!     templates:
//!       - route:
//!           version: v1
//!           name: pay
//!           method: post
//!         request:
//!           type: post
//!           context: [amount]
//!           body: '{"amount": 0}'
//!         actions:
//!           - execute: "_context{{amount}}=500"
//!         responses:
//!           - response_id: approved
//!             body: '{"value": "_context.{{amount}}"}'
//! ```

pub mod action;
pub mod config;
pub mod context;
pub mod definition;
pub mod error;
pub mod matcher;
pub mod model;
pub mod placeholder;
pub mod render;
pub mod service;
pub mod store;
pub mod validation;

pub use config::MockServerConfig;
pub use error::ServiceError;
pub use service::TemplateService;
