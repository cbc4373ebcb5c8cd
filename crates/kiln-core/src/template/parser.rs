//! Template source → AST.

use super::TemplateError;

/// One node of a parsed template.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Node {
    /// Literal text, emitted byte-for-byte.
    Literal(String),
    /// `{{ .Field }}`
    Variable(String),
    /// `{{ if .Field }}…{{ else }}…{{ end }}`
    If {
        field: String,
        then_body: Vec<Node>,
        else_body: Vec<Node>,
    },
    /// `{{ range .Field }}…{{ end }}`
    Range { field: String, body: Vec<Node> },
}

/// A block whose `{{ end }}` has not been seen yet.
struct OpenBlock {
    kind: BlockKind,
    field: String,
    /// Byte offset of the opening action, for error reporting.
    offset: usize,
    /// Nodes of the enclosing scope, restored when this block closes.
    enclosing: Vec<Node>,
    /// For conditionals: the then-branch, captured when `{{ else }}` is seen.
    then_body: Option<Vec<Node>>,
}

#[derive(Clone, Copy, PartialEq)]
enum BlockKind {
    If,
    Range,
}

impl BlockKind {
    fn name(self) -> &'static str {
        match self {
            BlockKind::If => "if",
            BlockKind::Range => "range",
        }
    }
}

pub(super) fn parse(source: &str) -> Result<Vec<Node>, TemplateError> {
    let mut current: Vec<Node> = Vec::new();
    let mut stack: Vec<OpenBlock> = Vec::new();
    let mut pos = 0;

    while let Some(open) = source[pos..].find("{{") {
        let action_at = pos + open;
        if open > 0 {
            current.push(Node::Literal(source[pos..action_at].to_owned()));
        }

        let body_start = action_at + 2;
        let close = source[body_start..]
            .find("}}")
            .ok_or(TemplateError::UnterminatedAction { offset: action_at })?;
        let action = source[body_start..body_start + close].trim();

        match classify(action, action_at)? {
            Action::Variable(field) => current.push(Node::Variable(field)),
            Action::Open(kind, field) => {
                stack.push(OpenBlock {
                    kind,
                    field,
                    offset: action_at,
                    enclosing: std::mem::take(&mut current),
                    then_body: None,
                });
            }
            Action::Else => {
                let block = stack.last_mut().ok_or(TemplateError::StrayKeyword {
                    keyword: "else",
                    offset: action_at,
                })?;
                if block.kind != BlockKind::If {
                    return Err(TemplateError::StrayKeyword {
                        keyword: "else",
                        offset: action_at,
                    });
                }
                if block.then_body.is_some() {
                    return Err(TemplateError::DuplicateElse { offset: action_at });
                }
                block.then_body = Some(std::mem::take(&mut current));
            }
            Action::End => {
                let block = stack.pop().ok_or(TemplateError::StrayKeyword {
                    keyword: "end",
                    offset: action_at,
                })?;
                let body = std::mem::replace(&mut current, block.enclosing);
                let node = match block.kind {
                    BlockKind::If => match block.then_body {
                        Some(then_body) => Node::If {
                            field: block.field,
                            then_body,
                            else_body: body,
                        },
                        None => Node::If {
                            field: block.field,
                            then_body: body,
                            else_body: Vec::new(),
                        },
                    },
                    BlockKind::Range => Node::Range {
                        field: block.field,
                        body,
                    },
                };
                current.push(node);
            }
        }

        pos = body_start + close + 2;
    }

    if let Some(block) = stack.pop() {
        return Err(TemplateError::UnclosedBlock {
            kind: block.kind.name(),
            offset: block.offset,
        });
    }

    if pos < source.len() {
        current.push(Node::Literal(source[pos..].to_owned()));
    }

    Ok(current)
}

enum Action {
    Variable(String),
    Open(BlockKind, String),
    Else,
    End,
}

fn classify(action: &str, offset: usize) -> Result<Action, TemplateError> {
    if action.is_empty() {
        return Err(TemplateError::EmptyAction { offset });
    }

    if let Some(field) = action.strip_prefix('.') {
        return Ok(Action::Variable(validate_field(field, offset)?));
    }

    match action {
        "else" => return Ok(Action::Else),
        "end" => return Ok(Action::End),
        _ => {}
    }

    if let Some(rest) = action.strip_prefix("if ") {
        return parse_block_field(BlockKind::If, rest, offset);
    }
    if let Some(rest) = action.strip_prefix("range ") {
        return parse_block_field(BlockKind::Range, rest, offset);
    }

    Err(TemplateError::UnrecognizedAction {
        action: action.to_owned(),
        offset,
    })
}

fn parse_block_field(kind: BlockKind, rest: &str, offset: usize) -> Result<Action, TemplateError> {
    let rest = rest.trim();
    let field = rest
        .strip_prefix('.')
        .ok_or_else(|| TemplateError::InvalidField {
            field: rest.to_owned(),
            offset,
        })?;
    Ok(Action::Open(kind, validate_field(field, offset)?))
}

fn validate_field(field: &str, offset: usize) -> Result<String, TemplateError> {
    let mut chars = field.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(field.to_owned())
    } else {
        Err(TemplateError::InvalidField {
            field: field.to_owned(),
            offset,
        })
    }
}
