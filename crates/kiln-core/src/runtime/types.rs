use std::time::Duration;

use thiserror::Error;

use crate::model::DigestError;

/// Errors produced by the runner registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested model's identity could not be fingerprinted.
    #[error("model '{name}' has no computable runner digest")]
    Digest {
        name: String,
        #[source]
        source: DigestError,
    },

    /// The backend failed to start a runner for the model.
    #[error("failed to spawn runner for model '{name}'")]
    SpawnFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The backend failed to unload the runner being replaced.
    #[error("failed to unload runner {digest} for model '{name}'")]
    UnloadFailed {
        name: String,
        digest: String,
        #[source]
        source: anyhow::Error,
    },

    /// A backend call exceeded its configured deadline.
    #[error("runner {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}
