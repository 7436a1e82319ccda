//! Context assignment actions.
//!
//! The grammar is a single statement per action:
//!
//! ```text
//! _context{{name}}=value
//! ```
//!
//! The value is taken literally. There are no expressions, conditionals or
//! calls.

use crate::context::RenderContext;
use crate::model::Action;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::warn;

static ASSIGNMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*_context\{\{\s*([A-Za-z_][A-Za-z0-9_-]*)\s*\}\}\s*=(.*)$").unwrap()
});

/// A parsed assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub name: String,
    pub value: String,
}

/// Action that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("action {index} `{execute}` is not a `_context{{{{name}}}}=value` assignment")]
    Malformed { index: usize, execute: String },
}

/// Parse one action statement. Returns `None` if it does not follow the grammar.
pub fn parse(execute: &str) -> Option<Assignment> {
    let line = execute.trim_end_matches(['\r', '\n']);
    let captures = ASSIGNMENT_RE.captures(line)?;
    Some(Assignment {
        name: captures[1].to_string(),
        value: captures[2].trim().to_string(),
    })
}

/// Apply `actions` to `context` in order.
///
/// Malformed actions are skipped and returned as warnings.
pub fn execute(actions: &[Action], context: &mut RenderContext) -> Vec<ActionError> {
    let mut warnings = Vec::new();

    for (index, action) in actions.iter().enumerate() {
        match parse(&action.execute) {
            Some(Assignment { name, value }) => context.set(name, value),
            None => {
                warn!(index, execute = %action.execute, "Skipping malformed action");
                warnings.push(ActionError::Malformed {
                    index,
                    execute: action.execute.clone(),
                });
            }
        }
    }

    warnings
}
