//! Shared request vocabulary for the kiln serving core.
//!
//! The daemon's dispatch layer and `kiln-core` both consume these types, so
//! they live in their own member crate.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Speaker of a single conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire-form string, as substituted into prompt templates.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One prior conversation turn carried with a generate request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A single text-generation request as handed to the composition core.
///
/// `template` and `system`, when set, override the model's configured values
/// for this request only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// The current prompt text. Substituted into the template verbatim.
    pub prompt: String,
    /// Per-request template override; empty means "use the model's".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub template: String,
    /// Per-request system-message override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Prior conversation turns, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Message>,
}
