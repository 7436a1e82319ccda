//! Context placeholder scanning and substitution.
//!
//! Recognizes three forms inside any text body:
//!
//! - `_context`: the whole external context object
//! - `_context.{{name}}`: a single context field
//! - `_context.$$name$$`: a single context field, alternate delimiters
//!
//! The dot is optional, so `_context{{name}}` (the action form) is a field
//! reference as well. Scanning is purely lexical.

use crate::context::RenderContext;
use regex::Regex;
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::LazyLock;

/// Token that introduces every context reference.
pub const CONTEXT_TOKEN: &str = "_context";

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").unwrap());

/// Field delimiter pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// `{{name}}`
    Braces,
    /// `$$name$$`
    Dollars,
}

impl Delimiter {
    const ALL: [Delimiter; 2] = [Delimiter::Braces, Delimiter::Dollars];

    fn open(self) -> &'static str {
        match self {
            Delimiter::Braces => "{{",
            Delimiter::Dollars => "$$",
        }
    }

    fn close(self) -> &'static str {
        match self {
            Delimiter::Braces => "}}",
            Delimiter::Dollars => "$$",
        }
    }
}

/// What a placeholder refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderKind {
    /// Bare `_context`.
    External,
    /// A named field.
    Field { name: String, delimiter: Delimiter },
}

/// A placeholder found in a text body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Byte range of the full placeholder text.
    pub span: Range<usize>,
    pub kind: PlaceholderKind,
}

impl Placeholder {
    pub fn field_name(&self) -> Option<&str> {
        match &self.kind {
            PlaceholderKind::Field { name, .. } => Some(name),
            PlaceholderKind::External => None,
        }
    }
}

enum FieldParse {
    /// A field reference consuming `len` bytes after the token.
    Field {
        name: String,
        delimiter: Delimiter,
        len: usize,
    },
    /// Opens a delimiter but is not a valid reference.
    Malformed,
    /// No delimiter follows the token.
    Absent,
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn parse_field(rest: &str) -> FieldParse {
    let (body, dot_len) = match rest.strip_prefix('.') {
        Some(body) => (body, 1),
        None => (rest, 0),
    };

    for delimiter in Delimiter::ALL {
        let Some(inner) = body.strip_prefix(delimiter.open()) else {
            continue;
        };
        let Some(end) = inner.find(delimiter.close()) else {
            return FieldParse::Malformed;
        };
        let name = inner[..end].trim();
        if !IDENTIFIER_RE.is_match(name) {
            return FieldParse::Malformed;
        }
        return FieldParse::Field {
            name: name.to_string(),
            delimiter,
            len: dot_len + delimiter.open().len() + end + delimiter.close().len(),
        };
    }

    FieldParse::Absent
}

/// Find every placeholder in `text`, in order of appearance.
pub fn scan(text: &str) -> Vec<Placeholder> {
    let mut found = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find(CONTEXT_TOKEN) {
        let start = cursor + offset;
        let after = start + CONTEXT_TOKEN.len();
        cursor = after;

        // `my_context` is not a reference
        if text[..start].chars().next_back().is_some_and(is_word_char) {
            continue;
        }

        let rest = &text[after..];
        match parse_field(rest) {
            FieldParse::Field {
                name,
                delimiter,
                len,
            } => {
                found.push(Placeholder {
                    span: start..after + len,
                    kind: PlaceholderKind::Field { name, delimiter },
                });
                cursor = after + len;
            }
            FieldParse::Malformed => {}
            FieldParse::Absent => {
                // `_contextfoo` is not a reference
                if rest.chars().next().is_some_and(is_word_char) {
                    continue;
                }
                found.push(Placeholder {
                    span: start..after,
                    kind: PlaceholderKind::External,
                });
            }
        }
    }

    found
}

/// Every field name referenced in `text`.
pub fn scan_references(text: &str) -> BTreeSet<String> {
    scan(text)
        .into_iter()
        .filter_map(|p| match p.kind {
            PlaceholderKind::Field { name, .. } => Some(name),
            PlaceholderKind::External => None,
        })
        .collect()
}

/// True if `text` references at least one context field.
pub fn uses_context(text: &str) -> bool {
    scan(text)
        .iter()
        .any(|p| matches!(p.kind, PlaceholderKind::Field { .. }))
}

/// True if `text` references the whole external context.
pub fn uses_external_context(text: &str) -> bool {
    scan(text)
        .iter()
        .any(|p| p.kind == PlaceholderKind::External)
}

/// Substitute every resolvable placeholder in `text`.
///
/// Fields take their bound value from `context`; a bare `_context` becomes
/// the compact JSON of the external context. Anything without a value is
/// left as written.
pub fn resolve(text: &str, context: &RenderContext) -> String {
    let mut output = String::with_capacity(text.len());
    let mut last = 0;

    for placeholder in scan(text) {
        let replacement = match &placeholder.kind {
            PlaceholderKind::Field { name, .. } => context.get(name).map(str::to_string),
            PlaceholderKind::External => context
                .external()
                .and_then(|value| serde_json::to_string(value).ok()),
        };

        if let Some(value) = replacement {
            output.push_str(&text[last..placeholder.span.start]);
            output.push_str(&value);
            last = placeholder.span.end;
        }
    }

    output.push_str(&text[last..]);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextDeclaration;

    #[test]
    fn test_scan_all_forms() {
        let text = r#"{"a":"_context.{{amount}}","b":"_context.$$status$$","c":"_context"}"#;
        let found = scan(text);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].field_name(), Some("amount"));
        assert_eq!(
            found[1].kind,
            PlaceholderKind::Field {
                name: "status".to_string(),
                delimiter: Delimiter::Dollars
            }
        );
        assert_eq!(found[2].kind, PlaceholderKind::External);
        assert_eq!(&text[found[0].span.clone()], "_context.{{amount}}");
    }

    #[test]
    fn test_action_form_is_field() {
        let refs = scan_references("_context{{teste}}=1");
        assert!(refs.contains("teste"));
        assert!(uses_context("_context{{teste}}=1"));
        assert!(!uses_external_context("_context{{teste}}=1"));
    }

    #[test]
    fn test_partial_tokens_ignored() {
        assert!(scan("_contextfoo").is_empty());
        assert!(scan("my_context.{{x}}").is_empty());
        assert!(scan("no references here").is_empty());
    }

    #[test]
    fn test_bare_context_boundaries() {
        assert!(uses_external_context("\"_context\""));
        assert!(uses_external_context("_context"));
        assert!(uses_external_context("value: _context."));
        assert!(!uses_context("\"_context\""));
    }

    #[test]
    fn test_malformed_field_is_not_reference() {
        assert!(scan("_context.{{}}").is_empty());
        assert!(scan("_context.{{unterminated").is_empty());
        assert!(scan("_context.{{two words}}").is_empty());
        // Closes at the first matching pair.
        assert!(scan("_context.{{a{{b}}}}").is_empty());
    }

    #[test]
    fn test_whitespace_inside_delimiters() {
        let refs = scan_references("_context.{{ amount }}");
        assert!(refs.contains("amount"));
    }

    #[test]
    fn test_scan_references_deduplicates() {
        let refs = scan_references("_context.{{a}} _context.{{a}} _context.$$b$$ _context");
        assert_eq!(refs.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_resolve_fields() {
        let mut ctx = RenderContext::seeded(&ContextDeclaration::declare(["amount"]));
        ctx.set("amount", "500");
        let out = resolve(r#"{"value": "_context.{{amount}}"}"#, &ctx);
        assert_eq!(out, r#"{"value": "500"}"#);

        let out = resolve("_context.$$amount$$ cents", &ctx);
        assert_eq!(out, "500 cents");
    }

    #[test]
    fn test_resolve_leaves_unbound_literal() {
        let ctx = RenderContext::default();
        let text = r#"{"value": "_context.{{missing}}", "all": _context}"#;
        assert_eq!(resolve(text, &ctx), text);
    }

    #[test]
    fn test_resolve_external_context() {
        let ctx = RenderContext::default()
            .with_external(Some(serde_json::json!({"id": 7})));
        assert_eq!(resolve("ctx=_context", &ctx), r#"ctx={"id":7}"#);
    }

    #[test]
    fn test_resolve_is_repeatable() {
        let mut ctx = RenderContext::default();
        ctx.set("a", "1");
        let text = "_context.{{a}}-_context.{{b}}";
        assert_eq!(resolve(text, &ctx), resolve(text, &ctx));
        assert_eq!(resolve(text, &ctx), "1-_context.{{b}}");
    }

    #[test]
    fn test_multibyte_text() {
        let mut ctx = RenderContext::default();
        ctx.set("nome", "João");
        assert_eq!(resolve("olá _context.{{nome}}!", &ctx), "olá João!");
    }
}
