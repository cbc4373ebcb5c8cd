//! Prompt-template rendering.
//!
//! Templates are interpreted over a small fixed grammar rather than a
//! general-purpose engine, so the whitespace and escaping contract stays
//! exact: literal text, `{{ .Field }}` substitution,
//! `{{ if .Field }}…{{ else }}…{{ end }}` conditionals, and
//! `{{ range .History }}…{{ end }}` iteration over conversation turns.
//! Substituted values are emitted byte-for-byte; absent fields render empty.

mod parser;
mod render;


use kiln_types::GenerateRequest;
use thiserror::Error;

use parser::Node;

/// A template that failed to parse. Rendering never starts on a malformed
/// template, so content is never silently dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unterminated action starting at byte {offset}")]
    UnterminatedAction { offset: usize },

    #[error("empty action at byte {offset}")]
    EmptyAction { offset: usize },

    #[error("unrecognized action {action:?} at byte {offset}")]
    UnrecognizedAction { action: String, offset: usize },

    #[error("invalid field reference {field:?} at byte {offset}")]
    InvalidField { field: String, offset: usize },

    #[error("{keyword:?} outside any block at byte {offset}")]
    StrayKeyword {
        keyword: &'static str,
        offset: usize,
    },

    #[error("duplicate else in conditional at byte {offset}")]
    DuplicateElse { offset: usize },

    #[error("unclosed {kind} block starting at byte {offset}")]
    UnclosedBlock {
        kind: &'static str,
        offset: usize,
    },
}

/// A parsed prompt template.
///
/// Parsing is the only fallible step; the catalog can call [`Template::parse`]
/// once at model-registration time to reject a bad template before any
/// request reaches it.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Parse `source`, failing fast on malformed syntax.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            nodes: parser::parse(source)?,
        })
    }

    /// Render this template against `request`, then append `partial`
    /// verbatim.
    ///
    /// Infallible by construction: every failure mode is caught at parse
    /// time, and absent fields substitute as empty.
    pub fn render(&self, request: &GenerateRequest, partial: &str) -> String {
        render::eval(&self.nodes, request, partial)
    }
}

/// Parse and render in one step.
///
/// Pure: no I/O, and byte-identical output for identical inputs, so
/// concurrent calls need no synchronization.
pub fn render(
    template: &str,
    request: &GenerateRequest,
    partial: &str,
) -> Result<String, TemplateError> {
    Ok(Template::parse(template)?.render(request, partial))
}
