//! AST evaluation against a generate request.

use kiln_types::{GenerateRequest, Message};

use super::parser::Node;

pub(super) fn eval(nodes: &[Node], request: &GenerateRequest, partial: &str) -> String {
    let mut out = String::new();
    eval_into(&mut out, nodes, request, None);
    // The continuation fragment is raw text: appended after rendering with
    // no substitution, so byte continuity with the previous generation holds.
    out.push_str(partial);
    out
}

fn eval_into(out: &mut String, nodes: &[Node], request: &GenerateRequest, turn: Option<&Message>) {
    for node in nodes {
        match node {
            Node::Literal(text) => out.push_str(text),
            Node::Variable(field) => push_field(out, request, turn, field),
            Node::If {
                field,
                then_body,
                else_body,
            } => {
                let body = if field_is_set(request, turn, field) {
                    then_body
                } else {
                    else_body
                };
                eval_into(out, body, request, turn);
            }
            Node::Range { field, body } => {
                // The only iterable request field is the conversation
                // history; any other field ranges over nothing.
                if field == "History" {
                    for item in &request.history {
                        eval_into(out, body, request, Some(item));
                    }
                }
            }
        }
    }
}

/// Substitute a field's value, byte-for-byte, with no escaping. Inside a
/// loop body the current turn shadows the request; unknown fields render
/// empty rather than failing.
fn push_field(out: &mut String, request: &GenerateRequest, turn: Option<&Message>, field: &str) {
    if let Some(turn) = turn {
        match field {
            "Role" => {
                out.push_str(turn.role.as_str());
                return;
            }
            "Content" => {
                out.push_str(&turn.content);
                return;
            }
            _ => {}
        }
    }

    match field {
        "Prompt" => out.push_str(&request.prompt),
        "System" => out.push_str(request.system.as_deref().unwrap_or_default()),
        _ => {}
    }
}

/// Truthiness for conditionals: a field is set when present and non-empty.
fn field_is_set(request: &GenerateRequest, turn: Option<&Message>, field: &str) -> bool {
    if let Some(turn) = turn {
        match field {
            "Role" => return true,
            "Content" => return !turn.content.is_empty(),
            _ => {}
        }
    }

    match field {
        "Prompt" => !request.prompt.is_empty(),
        "System" => request.system.as_deref().is_some_and(|s| !s.is_empty()),
        "History" => !request.history.is_empty(),
        _ => false,
    }
}
