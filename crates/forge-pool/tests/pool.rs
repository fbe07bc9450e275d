use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use forge_engine::{CancelToken, EngineAdapter, InstanceHandle};
use forge_pool::{chat_digest, ContextHint, InstancePool};
use forge_store::ModelStore;
use forge_types::{ChatMessage, CoreError, DeviceConfig, GpuPreference, ModelConfig, ModelId, PrepareMode, Role, TaskKind};

/// Deterministic engine: creates instances after `create_delay`, tagging
/// each handle with the model id so tests can tell instances apart, and
/// records every create/dispose in `log` for assertions.
struct FakeEngine {
    auto_gpu: bool,
    create_delay: Duration,
    log: std::sync::Mutex<Vec<String>>,
    creates: AtomicUsize,
}

impl FakeEngine {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            auto_gpu: false,
            create_delay: Duration::from_millis(1),
            log: std::sync::Mutex::new(Vec::new()),
            creates: AtomicUsize::new(0),
        })
    }

    fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngineAdapter for FakeEngine {
    fn name(&self) -> &str {
        "test.fake"
    }

    fn auto_gpu(&self) -> bool {
        self.auto_gpu
    }

    async fn prepare_model(&self, _config: &ModelConfig, _cancel: CancelToken) -> Result<(), CoreError> {
        Ok(())
    }

    async fn create_instance(&self, config: &ModelConfig, _cancel: CancelToken) -> Result<InstanceHandle, CoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.create_delay).await;
        self.log.lock().unwrap().push(format!("create:{}", config.id));
        Ok(InstanceHandle::new(config.id.to_string()))
    }

    async fn dispose_instance(&self, handle: InstanceHandle) {
        if let Some(id) = handle.downcast_ref::<String>() {
            self.log.lock().unwrap().push(format!("dispose:{id}"));
        }
    }
}

fn base_config(id: &str, min: usize, max: usize, ttl: Duration, gpu: bool) -> ModelConfig {
    ModelConfig {
        id: ModelId::new(id).unwrap(),
        engine: "test.fake".into(),
        task: TaskKind::ChatCompletion,
        url: None,
        location: Some(format!("{id}.bin")),
        sha256: None,
        md5: None,
        min_instances: min,
        max_instances: max,
        ttl,
        context_size: None,
        batch_size: None,
        device: DeviceConfig {
            gpu: if gpu { GpuPreference::Bool(true) } else { GpuPreference::Auto },
            gpu_layers: None,
            cpu_threads: None,
            mem_lock: false,
        },
        prepare: PrepareMode::OnDemand,
        completion_defaults: serde_json::Value::Null,
        initial_messages: None,
        prefix: None,
        grammars: None,
        tools: None,
        extra: Default::default(),
    }
}

/// Every config in these tests uses `location` so the store never needs a
/// real download: the artifact just has to exist and be non-empty.
async fn seed_artifact(cache_root: &std::path::Path, id: &str) {
    let path = cache_root.join("models").join(format!("{id}.bin"));
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&path, b"not-actually-gguf-but-non-empty").await.unwrap();
}

fn engines(engine: Arc<FakeEngine>) -> HashMap<String, Arc<dyn EngineAdapter>> {
    let mut map: HashMap<String, Arc<dyn EngineAdapter>> = HashMap::new();
    map.insert("test.fake".into(), engine);
    map
}

async fn store_for(dir: &std::path::Path, engine: Arc<FakeEngine>, configs: Vec<ModelConfig>) -> Arc<ModelStore> {
    ModelStore::init(configs, engines(engine), dir.to_path_buf(), 4).await.unwrap()
}

#[tokio::test]
async fn context_match_reuses_idle_instance() {
    let dir = tempfile::tempdir().unwrap();
    seed_artifact(dir.path(), "m1").await;
    let cfg = base_config("m1", 0, 1, Duration::from_secs(300), false);
    let engine = FakeEngine::new();
    let store = store_for(dir.path(), engine.clone(), vec![cfg.clone()]).await;

    let pool = InstancePool::init(vec![cfg.clone()], engines(engine.clone()), store, 4)
        .await
        .unwrap();

    let messages = vec![
        ChatMessage { role: Role::User, content: "hi".into() },
    ];
    let digest = chat_digest(&messages, false);

    let lease1 = pool
        .request_instance(cfg.id.clone(), ContextHint::Chat(digest.clone()), None)
        .await
        .unwrap();
    let first_instance = lease1.instance_id.clone();
    assert!(!lease1.reset_context);
    lease1.release(forge_pool::ReleaseOutcome::Completed {
        context_identity: Some(digest.clone()),
    });

    let lease2 = pool
        .request_instance(cfg.id.clone(), ContextHint::Chat(digest.clone()), None)
        .await
        .unwrap();
    assert_eq!(lease2.instance_id, first_instance, "same context should reuse the idle instance");
    assert!(!lease2.reset_context, "matching context must not force a reset");
    lease2.release(forge_pool::ReleaseOutcome::Completed { context_identity: Some(digest) });

    assert_eq!(engine.creates.load(Ordering::SeqCst), 1, "only one instance should ever have been created");
}

#[tokio::test]
async fn mismatched_context_forces_reset() {
    let dir = tempfile::tempdir().unwrap();
    seed_artifact(dir.path(), "m1").await;
    let cfg = base_config("m1", 0, 1, Duration::from_secs(300), false);
    let engine = FakeEngine::new();
    let store = store_for(dir.path(), engine.clone(), vec![cfg.clone()]).await;
    let pool = InstancePool::init(vec![cfg.clone()], engines(engine.clone()), store, 4)
        .await
        .unwrap();

    let digest_a = chat_digest(&[ChatMessage { role: Role::User, content: "a".into() }], false);
    let digest_b = chat_digest(&[ChatMessage { role: Role::User, content: "b".into() }], false);

    let lease1 = pool
        .request_instance(cfg.id.clone(), ContextHint::Chat(digest_a.clone()), None)
        .await
        .unwrap();
    lease1.release(forge_pool::ReleaseOutcome::Completed { context_identity: Some(digest_a) });

    let lease2 = pool
        .request_instance(cfg.id.clone(), ContextHint::Chat(digest_b), None)
        .await
        .unwrap();
    assert!(lease2.reset_context, "a differing context digest must force a reset");
}

#[tokio::test]
async fn gpu_lease_is_exclusive_and_transfers_on_release() {
    let dir = tempfile::tempdir().unwrap();
    seed_artifact(dir.path(), "g1").await;
    seed_artifact(dir.path(), "g2").await;
    let cfg1 = base_config("g1", 0, 1, Duration::from_secs(300), true);
    let cfg2 = base_config("g2", 0, 1, Duration::from_secs(300), true);
    let engine = FakeEngine::new();
    let store = store_for(dir.path(), engine.clone(), vec![cfg1.clone(), cfg2.clone()]).await;
    let pool = InstancePool::init(
        vec![cfg1.clone(), cfg2.clone()],
        engines(engine.clone()),
        store,
        4,
    )
    .await
    .unwrap();

    let lease1 = pool
        .request_instance(cfg1.id.clone(), ContextHint::None, None)
        .await
        .unwrap();

    let status = pool.status().await;
    assert_eq!(status.gpu_holder, Some(lease1.instance_id.clone()));

    // g2 also needs the GPU but g1's instance is busy (held by lease1):
    // the request must queue rather than create a second GPU instance.
    let pool2 = pool.clone();
    let cfg2_id = cfg2.id.clone();
    let waiter = tokio::spawn(async move { pool2.request_instance(cfg2_id, ContextHint::None, None).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished(), "g2 must wait while the gpu holder is busy");

    lease1.release(forge_pool::ReleaseOutcome::Completed { context_identity: None });

    let lease2 = waiter.await.unwrap().unwrap();
    assert_eq!(lease2.model_id, cfg2.id);

    let status = pool.status().await;
    assert_eq!(status.gpu_holder, Some(lease2.instance_id.clone()));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(engine.events().iter().any(|e| e == "dispose:g1"), "g1's idle instance must be evicted for the gpu lease");
}

#[tokio::test(start_paused = true)]
async fn idle_instance_is_evicted_after_ttl() {
    let dir = tempfile::tempdir().unwrap();
    seed_artifact(dir.path(), "m1").await;
    let cfg = base_config("m1", 0, 2, Duration::from_secs(5), false);
    let engine = FakeEngine::new();
    let store = store_for(dir.path(), engine.clone(), vec![cfg.clone()]).await;
    let pool = InstancePool::init(vec![cfg.clone()], engines(engine.clone()), store, 4)
        .await
        .unwrap();

    let lease = pool
        .request_instance(cfg.id.clone(), ContextHint::None, None)
        .await
        .unwrap();
    let instance_id = lease.instance_id.clone();
    lease.release(forge_pool::ReleaseOutcome::Completed { context_identity: None });

    tokio::time::advance(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;

    let status = pool.status().await;
    assert!(
        !status.instances.iter().any(|i| i.id == instance_id),
        "instance above minInstances must be disposed once its ttl elapses"
    );
}

#[tokio::test(start_paused = true)]
async fn ttl_timer_from_a_stale_generation_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    seed_artifact(dir.path(), "m1").await;
    let cfg = base_config("m1", 0, 1, Duration::from_secs(5), false);
    let engine = FakeEngine::new();
    let store = store_for(dir.path(), engine.clone(), vec![cfg.clone()]).await;
    let pool = InstancePool::init(vec![cfg.clone()], engines(engine.clone()), store, 4)
        .await
        .unwrap();

    let lease = pool
        .request_instance(cfg.id.clone(), ContextHint::None, None)
        .await
        .unwrap();
    let instance_id = lease.instance_id.clone();
    lease.release(forge_pool::ReleaseOutcome::Completed { context_identity: None });

    tokio::time::advance(Duration::from_secs(2)).await;

    // Reuse and release again before the first ttl timer fires: its
    // deadline is now stale and must not dispose the reused instance.
    let lease2 = pool
        .request_instance(cfg.id.clone(), ContextHint::None, None)
        .await
        .unwrap();
    assert_eq!(lease2.instance_id, instance_id);
    lease2.release(forge_pool::ReleaseOutcome::Completed { context_identity: None });

    tokio::time::advance(Duration::from_secs(4)).await;
    tokio::task::yield_now().await;

    let status = pool.status().await;
    assert!(
        status.instances.iter().any(|i| i.id == instance_id),
        "the stale ttl timer must not dispose an instance reused after it was scheduled"
    );

    tokio::time::advance(Duration::from_secs(2)).await;
    tokio::task::yield_now().await;
    let status = pool.status().await;
    assert!(
        !status.instances.iter().any(|i| i.id == instance_id),
        "the fresh ttl timer scheduled on the second release must still fire"
    );
}

#[tokio::test]
async fn queued_requests_are_served_fifo() {
    let dir = tempfile::tempdir().unwrap();
    seed_artifact(dir.path(), "m1").await;
    let cfg = base_config("m1", 0, 1, Duration::from_secs(300), false);
    let engine = FakeEngine::new();
    let store = store_for(dir.path(), engine.clone(), vec![cfg.clone()]).await;
    let pool = InstancePool::init(vec![cfg.clone()], engines(engine.clone()), store, 4)
        .await
        .unwrap();

    let lease = pool
        .request_instance(cfg.id.clone(), ContextHint::None, None)
        .await
        .unwrap();

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut waiters = Vec::new();
    for i in 0..3u32 {
        let pool = pool.clone();
        let id = cfg.id.clone();
        let order = order.clone();
        waiters.push(tokio::spawn(async move {
            let lease = pool.request_instance(id, ContextHint::None, None).await.unwrap();
            order.lock().unwrap().push(i);
            lease.release(forge_pool::ReleaseOutcome::Completed { context_identity: None });
        }));
        // Give the request time to actually reach the actor and enqueue
        // before the next one is sent, so queue order is deterministic.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    lease.release(forge_pool::ReleaseOutcome::Completed { context_identity: None });
    for w in waiters {
        w.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2], "waiters must be served in arrival order");
}

#[tokio::test]
async fn cancelling_a_queued_request_removes_it_without_affecting_others() {
    let dir = tempfile::tempdir().unwrap();
    seed_artifact(dir.path(), "m1").await;
    let cfg = base_config("m1", 0, 1, Duration::from_secs(300), false);
    let engine = FakeEngine::new();
    let store = store_for(dir.path(), engine.clone(), vec![cfg.clone()]).await;
    let pool = InstancePool::init(vec![cfg.clone()], engines(engine.clone()), store, 4)
        .await
        .unwrap();

    let lease = pool
        .request_instance(cfg.id.clone(), ContextHint::None, None)
        .await
        .unwrap();

    let (handle, signal) = forge_types::cancel_pair();
    let pool_a = pool.clone();
    let id_a = cfg.id.clone();
    let cancelled = tokio::spawn(async move { pool_a.request_instance(id_a, ContextHint::None, Some(signal)).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let pool_b = pool.clone();
    let id_b = cfg.id.clone();
    let survivor = tokio::spawn(async move { pool_b.request_instance(id_b, ContextHint::None, None).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    handle.cancel();
    let cancelled_result = cancelled.await.unwrap();
    assert!(matches!(cancelled_result, Err(CoreError::Cancelled { .. })));

    lease.release(forge_pool::ReleaseOutcome::Completed { context_identity: None });
    let survivor_lease = survivor.await.unwrap().unwrap();
    survivor_lease.release(forge_pool::ReleaseOutcome::Completed { context_identity: None });
}

#[tokio::test]
async fn dispose_rejects_queued_waiters_and_tears_down_instances() {
    let dir = tempfile::tempdir().unwrap();
    seed_artifact(dir.path(), "m1").await;
    let cfg = base_config("m1", 0, 1, Duration::from_secs(300), false);
    let engine = FakeEngine::new();
    let store = store_for(dir.path(), engine.clone(), vec![cfg.clone()]).await;
    let pool = InstancePool::init(vec![cfg.clone()], engines(engine.clone()), store, 4)
        .await
        .unwrap();

    let lease = pool
        .request_instance(cfg.id.clone(), ContextHint::None, None)
        .await
        .unwrap();

    let pool_q = pool.clone();
    let id_q = cfg.id.clone();
    let queued = tokio::spawn(async move { pool_q.request_instance(id_q, ContextHint::None, None).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    pool.dispose().await;

    let result = queued.await.unwrap();
    assert!(matches!(result, Err(CoreError::PoolShutdown { .. })));
    drop(lease);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(engine.events().iter().any(|e| e.starts_with("dispose:")));
}
