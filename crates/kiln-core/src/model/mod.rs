mod digest;

pub use digest::{digest, DigestError};


use std::collections::HashMap;
use std::path::PathBuf;

use kiln_types::GenerateRequest;
use serde::{Deserialize, Serialize};

use crate::template::{self, TemplateError};

/// A pre-computed embedding attached to a model: one vector plus the source
/// text it was computed from. Immutable once attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: Vec<f64>,
    pub source_text: String,
}

impl Embedding {
    pub fn new(vector: Vec<f64>, source_text: impl Into<String>) -> Self {
        Self {
            vector,
            source_text: source_text.into(),
        }
    }
}

/// The subset of a model's configuration that determines the loaded state of
/// its runner.
///
/// Only this struct is fed to [`digest`]; the rendering-only fields on
/// [`Model`] cannot reach the fingerprint by construction. A field added
/// here must also be added to the canonical serialization, which bumps the
/// digest format version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerIdentity {
    /// Fully qualified model name.
    pub name: String,
    /// Short display name.
    pub short_name: String,
    /// On-disk path of the weights file.
    pub model_path: PathBuf,
    /// Name of the model this one was derived from, if any.
    pub original_model: String,
    /// Fine-tuning adapters applied on top of the base weights, in order.
    pub adapter_paths: Vec<PathBuf>,
    /// License texts shipped with the model.
    pub license: Vec<String>,
    /// Runtime options forwarded to the runner at load time.
    pub options: HashMap<String, serde_json::Value>,
    /// Embeddings prefilled into the runner, in attachment order.
    pub embeddings: Vec<Embedding>,
}

/// A model as handed to this core by the catalog. Read-only here: the core
/// derives digests and prompts from it, never mutates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Identity-bearing configuration; the digest input.
    #[serde(flatten)]
    pub identity: RunnerIdentity,
    /// Prompt template. Affects rendering only, never the digest.
    #[serde(default)]
    pub template: String,
    /// Default system message. Affects rendering only, never the digest.
    #[serde(default)]
    pub system: String,
}

impl Model {
    /// Fingerprint of the identity-bearing configuration.
    ///
    /// Equal for any two models that differ only in `template` or `system`.
    pub fn runner_digest(&self) -> Result<String, DigestError> {
        digest(&self.identity)
    }

    /// Render the prompt payload for `request`.
    ///
    /// The request's template and system message, when set, take precedence
    /// over the model's configured ones. `partial` is an already-emitted
    /// continuation fragment and is appended after the rendered prompt
    /// without substitution.
    pub fn prompt(
        &self,
        request: &GenerateRequest,
        partial: &str,
    ) -> Result<String, TemplateError> {
        let source = if request.template.is_empty() {
            &self.template
        } else {
            &request.template
        };

        if request.system.is_some() || self.system.is_empty() {
            return template::render(source, request, partial);
        }

        // Fall back to the model's system message for this render only.
        let mut effective = request.clone();
        effective.system = Some(self.system.clone());
        template::render(source, &effective, partial)
    }
}
