use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use forge_engine::{CancelToken, EngineAdapter, InstanceHandle};
use forge_store::{ModelStatus, ModelStore};
use forge_types::{CoreError, ModelConfig, ModelId, PrepareMode, TaskKind};

fn base_config(id: &str, url: &str) -> ModelConfig {
    ModelConfig {
        id: ModelId::new(id).unwrap(),
        engine: "test.writing".into(),
        task: TaskKind::ChatCompletion,
        url: Some(url.into()),
        location: None,
        sha256: None,
        md5: None,
        min_instances: 0,
        max_instances: 1,
        ttl: Duration::from_secs(300),
        context_size: None,
        batch_size: None,
        device: Default::default(),
        prepare: PrepareMode::OnDemand,
        completion_defaults: serde_json::Value::Null,
        initial_messages: None,
        prefix: None,
        grammars: None,
        tools: None,
        extra: Default::default(),
    }
}

/// Test double standing in for a real engine's `prepareModel`: writes
/// `content` to the path the store resolves for the given config,
/// counting calls so dedup/idempotence can be asserted on.
struct WritingEngine {
    cache_root: std::path::PathBuf,
    content: Vec<u8>,
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl EngineAdapter for WritingEngine {
    fn name(&self) -> &str {
        "test.writing"
    }

    async fn prepare_model(
        &self,
        config: &ModelConfig,
        _cancel: CancelToken,
    ) -> Result<(), CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let path = forge_store::cache_layout::artifact_path(&self.cache_root, config).unwrap();
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&path, &self.content).await.unwrap();
        Ok(())
    }

    async fn create_instance(
        &self,
        _config: &ModelConfig,
        _cancel: CancelToken,
    ) -> Result<InstanceHandle, CoreError> {
        Ok(InstanceHandle::new(()))
    }

    async fn dispose_instance(&self, _handle: InstanceHandle) {}
}

fn engines(engine: Arc<WritingEngine>) -> HashMap<String, Arc<dyn EngineAdapter>> {
    let mut map: HashMap<String, Arc<dyn EngineAdapter>> = HashMap::new();
    map.insert("test.writing".into(), engine);
    map
}

#[tokio::test]
async fn checksum_mismatch_triggers_redownload_then_ready() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = base_config("m1", "https://example.com/weights/model.bin");
    let correct = b"the-correct-bytes".to_vec();
    cfg.sha256 = Some(sha256_hex(&correct));

    let artifact = forge_store::cache_layout::artifact_path(dir.path(), &cfg).unwrap();
    tokio::fs::create_dir_all(artifact.parent().unwrap())
        .await
        .unwrap();
    tokio::fs::write(&artifact, b"stale-wrong-bytes").await.unwrap();

    let engine = Arc::new(WritingEngine {
        cache_root: dir.path().to_path_buf(),
        content: correct,
        calls: AtomicUsize::new(0),
        delay: Duration::from_millis(1),
    });

    let store = ModelStore::init(
        vec![cfg.clone()],
        engines(engine.clone()),
        dir.path().to_path_buf(),
        1,
    )
    .await
    .unwrap();

    let result = store.prepare_model(&cfg.id, None).await.unwrap();
    assert_eq!(result.status, ModelStatus::Ready);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_prepares_dedup_to_one_engine_call() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = base_config("m2", "https://example.com/weights/model.bin");

    let engine = Arc::new(WritingEngine {
        cache_root: dir.path().to_path_buf(),
        content: b"whatever".to_vec(),
        calls: AtomicUsize::new(0),
        delay: Duration::from_millis(100),
    });

    let store = ModelStore::init(
        vec![cfg.clone()],
        engines(engine.clone()),
        dir.path().to_path_buf(),
        1,
    )
    .await
    .unwrap();

    let a = store.clone();
    let b = store.clone();
    let id_a = cfg.id.clone();
    let id_b = cfg.id.clone();
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { a.prepare_model(&id_a, None).await }),
        tokio::spawn(async move { b.prepare_model(&id_b, None).await }),
    );

    assert_eq!(r1.unwrap().unwrap().status, ModelStatus::Ready);
    assert_eq!(r2.unwrap().unwrap().status, ModelStatus::Ready);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn blocking_prepare_mode_resolves_before_init_returns() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = base_config("m3", "https://example.com/weights/model.bin");
    cfg.prepare = PrepareMode::Blocking;

    let engine = Arc::new(WritingEngine {
        cache_root: dir.path().to_path_buf(),
        content: b"ready-bytes".to_vec(),
        calls: AtomicUsize::new(0),
        delay: Duration::from_millis(5),
    });

    let store = ModelStore::init(
        vec![cfg.clone()],
        engines(engine),
        dir.path().to_path_buf(),
        1,
    )
    .await
    .unwrap();

    let status = store.status(&cfg.id).await.unwrap();
    assert_eq!(status.status, ModelStatus::Ready);
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}
