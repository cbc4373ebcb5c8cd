//! The runner registry: digest-keyed reuse of the loaded runner.
//!
//! Loading weights is the dominant cost of the whole daemon, so the registry
//! reuses the live runner whenever the requested model's digest matches the
//! resident one, and replaces it otherwise. Process management itself stays
//! behind [`RunnerBackend`]; the registry owns only the decision.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::types::RegistryError;
use crate::model::{digest, Model};

/// Spawns and tears down runner processes on behalf of the registry.
///
/// Implementations live in the daemon shell (subprocess management, GPU
/// placement, health checks); the registry only decides *when* to call them.
#[async_trait]
pub trait RunnerBackend: Send + Sync {
    /// Handle to a live runner.
    type Handle: Send + Sync;

    /// Start a runner for `model` and return once it is ready to serve.
    async fn spawn(&self, model: &Model) -> anyhow::Result<Self::Handle>;

    /// Tear down a runner, releasing its weights.
    async fn unload(&self, handle: Arc<Self::Handle>) -> anyhow::Result<()>;
}

/// Configuration for [`RunnerRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum time a backend spawn may take. Defaults to 5 minutes; large
    /// models page in slowly from cold storage.
    pub spawn_timeout: Duration,
    /// Maximum time an unload may take. Defaults to 30 seconds.
    pub unload_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            spawn_timeout: Duration::from_secs(300),
            unload_timeout: Duration::from_secs(30),
        }
    }
}

struct ActiveRunner<H> {
    digest: String,
    model_name: String,
    handle: Arc<H>,
}

/// Holds the single resident runner and makes the reuse-vs-reload decision.
///
/// The decision rule is exactly: reuse iff the requested model's digest
/// equals the resident runner's digest. Rendering-only model fields never
/// enter the digest, so changing a template or system message keeps the
/// runner warm.
pub struct RunnerRegistry<B: RunnerBackend> {
    backend: B,
    config: RegistryConfig,
    active: Mutex<Option<ActiveRunner<B::Handle>>>,
}

impl<B: RunnerBackend> RunnerRegistry<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, RegistryConfig::default())
    }

    pub fn with_config(backend: B, config: RegistryConfig) -> Self {
        Self {
            backend,
            config,
            active: Mutex::new(None),
        }
    }

    /// Return a runner serving exactly `model`'s identity.
    ///
    /// The digest is recomputed under the registry lock immediately before
    /// the decision, so callers can never race a stale fingerprint, and the
    /// lock is held across the whole decide-and-swap so a half-replaced
    /// runner is never observable. Replacement unloads the incumbent before
    /// spawning: weights for two models must not be resident at once.
    pub async fn acquire(&self, model: &Model) -> Result<Arc<B::Handle>, RegistryError> {
        let name = model.identity.name.clone();
        let requested = digest(&model.identity).map_err(|source| RegistryError::Digest {
            name: name.clone(),
            source,
        })?;

        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref() {
            if current.digest == requested {
                info!(model = %name, digest = %requested, "reusing runner");
                return Ok(Arc::clone(&current.handle));
            }
        }

        if let Some(previous) = active.take() {
            info!(
                model = %previous.model_name,
                digest = %previous.digest,
                "unloading replaced runner"
            );
            self.unload_runner(previous).await?;
        }

        info!(model = %name, digest = %requested, "spawning runner");
        let spawn = self.backend.spawn(model);
        let handle = match tokio::time::timeout(self.config.spawn_timeout, spawn).await {
            Ok(Ok(handle)) => Arc::new(handle),
            Ok(Err(source)) => return Err(RegistryError::SpawnFailed { name, source }),
            Err(_) => {
                return Err(RegistryError::Timeout {
                    operation: "spawn",
                    timeout: self.config.spawn_timeout,
                });
            }
        };

        *active = Some(ActiveRunner {
            digest: requested,
            model_name: name,
            handle: Arc::clone(&handle),
        });
        Ok(handle)
    }

    /// Digest of the resident runner, if any.
    pub async fn active_digest(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|runner| runner.digest.clone())
    }

    /// Unload the resident runner, leaving the registry empty.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(previous) => self.unload_runner(previous).await,
            None => Ok(()),
        }
    }

    async fn unload_runner(&self, previous: ActiveRunner<B::Handle>) -> Result<(), RegistryError> {
        let unload = self.backend.unload(Arc::clone(&previous.handle));
        match tokio::time::timeout(self.config.unload_timeout, unload).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => {
                warn!(
                    model = %previous.model_name,
                    digest = %previous.digest,
                    error = %source,
                    "runner unload failed"
                );
                Err(RegistryError::UnloadFailed {
                    name: previous.model_name,
                    digest: previous.digest,
                    source,
                })
            }
            Err(_) => {
                warn!(
                    model = %previous.model_name,
                    digest = %previous.digest,
                    "runner unload timed out"
                );
                Err(RegistryError::Timeout {
                    operation: "unload",
                    timeout: self.config.unload_timeout,
                })
            }
        }
    }
}
