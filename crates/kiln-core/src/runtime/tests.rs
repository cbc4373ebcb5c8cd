use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing_test::traced_test;

use crate::model::{Embedding, Model, RunnerIdentity};
use crate::runtime::registry::{RegistryConfig, RunnerBackend, RunnerRegistry};
use crate::runtime::types::RegistryError;

/// Stand-in for a live runner process.
#[derive(Debug)]
struct RunnerStub {
    #[allow(dead_code)]
    model_name: String,
}

/// Mock backend that counts spawns/unloads and can be made slow or faulty.
struct CountingBackend {
    spawns: Arc<AtomicUsize>,
    unloads: Arc<AtomicUsize>,
    spawn_delay: Duration,
    fail_unload: bool,
}

impl CountingBackend {
    fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let spawns = Arc::new(AtomicUsize::new(0));
        let unloads = Arc::new(AtomicUsize::new(0));
        let backend = Self {
            spawns: Arc::clone(&spawns),
            unloads: Arc::clone(&unloads),
            spawn_delay: Duration::ZERO,
            fail_unload: false,
        };
        (backend, spawns, unloads)
    }
}

#[async_trait]
impl RunnerBackend for CountingBackend {
    type Handle = RunnerStub;

    async fn spawn(&self, model: &Model) -> anyhow::Result<RunnerStub> {
        if !self.spawn_delay.is_zero() {
            tokio::time::sleep(self.spawn_delay).await;
        }
        self.spawns.fetch_add(1, Ordering::SeqCst);
        Ok(RunnerStub {
            model_name: model.identity.name.clone(),
        })
    }

    async fn unload(&self, _handle: Arc<RunnerStub>) -> anyhow::Result<()> {
        if self.fail_unload {
            anyhow::bail!("runner process refused to exit");
        }
        self.unloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_model(name: &str) -> Model {
    Model {
        identity: RunnerIdentity {
            name: name.to_owned(),
            model_path: format!("/models/{name}.gguf").into(),
            embeddings: vec![Embedding::new(vec![1.0, 2.0], "data1")],
            ..Default::default()
        },
        template: "{{ .Prompt }}".to_owned(),
        ..Default::default()
    }
}

#[tokio::test]
async fn same_model_reuses_runner() {
    let (backend, spawns, unloads) = CountingBackend::new();
    let registry = RunnerRegistry::new(backend);
    let model = test_model("llama");

    let first = registry.acquire(&model).await.expect("first acquire");
    let second = registry.acquire(&model).await.expect("second acquire");

    assert!(
        Arc::ptr_eq(&first, &second),
        "both acquires should hand out the same runner"
    );
    assert_eq!(spawns.load(Ordering::SeqCst), 1);
    assert_eq!(unloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn identity_change_replaces_runner() {
    let (backend, spawns, unloads) = CountingBackend::new();
    let registry = RunnerRegistry::new(backend);

    let model = test_model("llama");
    registry.acquire(&model).await.expect("first acquire");

    let mut changed = model.clone();
    changed
        .identity
        .options
        .insert("num_ctx".to_owned(), serde_json::json!(4096));
    registry.acquire(&changed).await.expect("second acquire");

    assert_eq!(spawns.load(Ordering::SeqCst), 2, "changed identity must reload");
    assert_eq!(unloads.load(Ordering::SeqCst), 1, "incumbent must be unloaded");
    assert_eq!(
        registry.active_digest().await.as_deref(),
        Some(
            changed
                .runner_digest()
                .expect("digest should succeed")
                .as_str()
        )
    );
}

#[tokio::test]
async fn rendering_only_change_keeps_runner_warm() {
    let (backend, spawns, unloads) = CountingBackend::new();
    let registry = RunnerRegistry::new(backend);

    let model = test_model("llama");
    let first = registry.acquire(&model).await.expect("first acquire");

    let mut retemplated = model.clone();
    retemplated.template = "SYSTEM {{ .System }} {{ .Prompt }}".to_owned();
    retemplated.system = "answer tersely".to_owned();
    let second = registry.acquire(&retemplated).await.expect("second acquire");

    assert!(
        Arc::ptr_eq(&first, &second),
        "template/system changes must not evict the runner"
    );
    assert_eq!(spawns.load(Ordering::SeqCst), 1);
    assert_eq!(unloads.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_acquires_spawn_once() {
    let (mut backend, spawns, _unloads) = CountingBackend::new();
    // Slow spawn widens the race window; the registry lock must still
    // serialize the decision.
    backend.spawn_delay = Duration::from_millis(50);
    let registry = Arc::new(RunnerRegistry::new(backend));
    let model = test_model("llama");

    let mut handles = Vec::new();
    for _ in 0..4 {
        let registry = Arc::clone(&registry);
        let model = model.clone();
        handles.push(tokio::spawn(
            async move { registry.acquire(&model).await },
        ));
    }
    for handle in handles {
        handle
            .await
            .expect("task should not panic")
            .expect("acquire should succeed");
    }

    assert_eq!(spawns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unload_failure_surfaces_and_empties_registry() {
    let (mut backend, spawns, _unloads) = CountingBackend::new();
    backend.fail_unload = true;
    let registry = RunnerRegistry::new(backend);

    registry
        .acquire(&test_model("llama"))
        .await
        .expect("first acquire");

    let err = registry
        .acquire(&test_model("qwen"))
        .await
        .expect_err("replacement should fail when unload fails");
    assert!(matches!(err, RegistryError::UnloadFailed { .. }));

    // The faulty incumbent is gone either way; nothing half-replaced remains.
    assert!(registry.active_digest().await.is_none());
    assert_eq!(spawns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_spawn_times_out() {
    let (mut backend, _spawns, _unloads) = CountingBackend::new();
    backend.spawn_delay = Duration::from_millis(200);
    let registry = RunnerRegistry::with_config(
        backend,
        RegistryConfig {
            spawn_timeout: Duration::from_millis(20),
            ..Default::default()
        },
    );

    let err = registry
        .acquire(&test_model("llama"))
        .await
        .expect_err("spawn should time out");
    assert!(matches!(
        err,
        RegistryError::Timeout {
            operation: "spawn",
            ..
        }
    ));
    assert!(registry.active_digest().await.is_none());
}

#[tokio::test]
async fn shutdown_unloads_active_runner() {
    let (backend, _spawns, unloads) = CountingBackend::new();
    let registry = RunnerRegistry::new(backend);

    registry
        .acquire(&test_model("llama"))
        .await
        .expect("acquire");
    registry.shutdown().await.expect("shutdown");

    assert_eq!(unloads.load(Ordering::SeqCst), 1);
    assert!(registry.active_digest().await.is_none());

    // Idempotent on an empty registry.
    registry.shutdown().await.expect("second shutdown");
    assert_eq!(unloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_identity_fails_without_touching_runner() {
    let (backend, spawns, _unloads) = CountingBackend::new();
    let registry = RunnerRegistry::new(backend);

    registry
        .acquire(&test_model("llama"))
        .await
        .expect("acquire");

    let mut malformed = test_model("llama");
    malformed.identity.embeddings[0].vector[0] = f64::NAN;
    let err = registry
        .acquire(&malformed)
        .await
        .expect_err("NaN embedding should fail the digest");
    assert!(matches!(err, RegistryError::Digest { .. }));

    // The resident runner stays untouched.
    assert_eq!(spawns.load(Ordering::SeqCst), 1);
    assert!(registry.active_digest().await.is_some());
}

#[tokio::test]
#[traced_test]
async fn reuse_decisions_are_logged() {
    let (backend, _spawns, _unloads) = CountingBackend::new();
    let registry = RunnerRegistry::new(backend);
    let model = test_model("llama");

    registry.acquire(&model).await.expect("first acquire");
    registry.acquire(&model).await.expect("second acquire");

    assert!(logs_contain("spawning runner"));
    assert!(logs_contain("reusing runner"));
}
