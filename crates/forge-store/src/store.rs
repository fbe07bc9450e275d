use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use forge_engine::{CancelToken, EngineAdapter};
use forge_types::{CoreError, ModelConfig, ModelId, PrepareMode};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{broadcast, Mutex, RwLock, Semaphore};

use crate::cache_layout;
use crate::lock::ArtifactLock;
use crate::model::{ModelStatus, StoredModel};
use crate::validate::{self, Validation};

const COMPLETED_CHANNEL_CAPACITY: usize = 256;

enum EntryState {
    Idle(StoredModel),
    Preparing(Shared<BoxFuture<'static, StoredModel>>),
}

struct Entry {
    config: Arc<ModelConfig>,
    state: Mutex<EntryState>,
}

/// Owns the `<cachePath>/models` directory layout and every configured
/// model's lifecycle state (§4.2).
pub struct ModelStore {
    entries: RwLock<HashMap<ModelId, Arc<Entry>>>,
    engines: HashMap<String, Arc<dyn EngineAdapter>>,
    cache_root: PathBuf,
    semaphore: Arc<Semaphore>,
    completed_tx: broadcast::Sender<StoredModel>,
}

impl ModelStore {
    /// Register every model, kicking off `blocking`/`async` preparation per
    /// `ModelConfig.prepare`. Returns once all `blocking` models have
    /// settled (ready or error); fails the whole init if any of them
    /// errored.
    pub async fn init(
        configs: Vec<ModelConfig>,
        engines: HashMap<String, Arc<dyn EngineAdapter>>,
        cache_root: PathBuf,
        prepare_concurrency: usize,
    ) -> Result<Arc<Self>, CoreError> {
        let mut entries = HashMap::with_capacity(configs.len());
        let mut seen_ids = std::collections::HashSet::with_capacity(configs.len());
        for config in &configs {
            config.validate()?;
            if !engines.contains_key(&config.engine) {
                return Err(CoreError::config_invalid(format!(
                    "model '{}' references unknown engine '{}'",
                    config.id, config.engine
                )));
            }
            if !seen_ids.insert(&config.id) {
                return Err(CoreError::config_invalid(format!("duplicate model id '{}'", config.id)));
            }
        }
        for config in configs {
            let id = config.id.clone();
            let config = Arc::new(config);
            entries.insert(
                id,
                Arc::new(Entry {
                    config: config.clone(),
                    state: Mutex::new(EntryState::Idle(StoredModel::unloaded(config))),
                }),
            );
        }

        let (completed_tx, _) = broadcast::channel(COMPLETED_CHANNEL_CAPACITY);
        let store = Arc::new(Self {
            entries: RwLock::new(entries),
            engines,
            cache_root,
            semaphore: Arc::new(Semaphore::new(prepare_concurrency.max(1))),
            completed_tx,
        });

        let blocking_ids: Vec<ModelId> = {
            let entries = store.entries.read().await;
            entries
                .values()
                .filter(|e| e.config.prepare == PrepareMode::Blocking)
                .map(|e| e.config.id.clone())
                .collect()
        };
        let async_ids: Vec<ModelId> = {
            let entries = store.entries.read().await;
            entries
                .values()
                .filter(|e| e.config.prepare == PrepareMode::Async)
                .map(|e| e.config.id.clone())
                .collect()
        };

        for id in async_ids {
            let store = store.clone();
            tokio::spawn(async move {
                if let Err(e) = store.prepare_model(&id, None).await {
                    tracing::warn!(model = %id, error = %e, "background prepare failed");
                }
            });
        }

        for id in blocking_ids {
            store.prepare_model(&id, None).await?;
        }

        Ok(store)
    }

    /// Idempotent; concurrent callers for the same id share one
    /// preparation future (§9 promise-dedup note).
    pub async fn prepare_model(
        &self,
        id: &ModelId,
        cancel: Option<CancelToken>,
    ) -> Result<StoredModel, CoreError> {
        let entry = self.entry(id).await?;
        let engine = self.engine_for(&entry.config)?;

        let shared = {
            let mut state = entry.state.lock().await;
            match &*state {
                EntryState::Preparing(fut) => fut.clone(),
                EntryState::Idle(_) => {
                    *state = EntryState::Idle(StoredModel {
                        config: entry.config.clone(),
                        status: ModelStatus::Preparing,
                        meta: None,
                        error: None,
                    });
                    let fut: BoxFuture<'static, StoredModel> = Box::pin(run_preparation(
                        entry.config.clone(),
                        engine,
                        self.cache_root.clone(),
                        self.semaphore.clone(),
                        cancel.unwrap_or_else(CancelToken::inert),
                    ));
                    let shared = fut.shared();
                    *state = EntryState::Preparing(shared.clone());
                    shared
                }
            }
        };

        let result = shared.await;

        {
            let mut state = entry.state.lock().await;
            *state = EntryState::Idle(result.clone());
        }
        let _ = self.completed_tx.send(result.clone());
        result.into_result()
    }

    /// Current `StoredModel` snapshot for `id`, or `None` if unregistered.
    pub async fn status(&self, id: &ModelId) -> Option<StoredModel> {
        let entries = self.entries.read().await;
        let entry = entries.get(id)?;
        match &*entry.state.lock().await {
            EntryState::Idle(sm) => Some(sm.clone()),
            EntryState::Preparing(_) => Some(StoredModel {
                config: entry.config.clone(),
                status: ModelStatus::Preparing,
                meta: None,
                error: None,
            }),
        }
    }

    /// Subscribe to the `completed` event; deregistering is simply
    /// dropping the receiver (§9).
    pub fn subscribe(&self) -> broadcast::Receiver<StoredModel> {
        self.completed_tx.subscribe()
    }

    pub fn cache_root(&self) -> &std::path::Path {
        &self.cache_root
    }

    /// Release store-held resources. Idempotent; does not cancel
    /// in-flight preparations (those run to completion in the background
    /// — only the Pool's leases are torn down on shutdown).
    pub async fn dispose(&self) {
        tracing::info!("model store disposed");
    }

    async fn entry(&self, id: &ModelId) -> Result<Arc<Entry>, CoreError> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::ModelNotFound {
                model_id: id.to_string(),
            })
    }

    fn engine_for(&self, config: &ModelConfig) -> Result<Arc<dyn EngineAdapter>, CoreError> {
        self.engines
            .get(&config.engine)
            .cloned()
            .ok_or_else(|| CoreError::ConfigInvalid {
                message: format!(
                    "model '{}' references unknown engine '{}'",
                    config.id, config.engine
                ),
            })
    }
}

async fn run_preparation(
    config: Arc<ModelConfig>,
    engine: Arc<dyn EngineAdapter>,
    cache_root: PathBuf,
    semaphore: Arc<Semaphore>,
    cancel: CancelToken,
) -> StoredModel {
    let span = tracing::info_span!("prepare_model", model = %config.id);
    let _enter = span.enter();

    let _permit = match semaphore.acquire_owned().await {
        Ok(p) => p,
        Err(_) => return errored(&config, CoreError::Internal("prepare semaphore closed".into())),
    };

    let artifact = match cache_layout::artifact_path(&cache_root, &config) {
        Ok(p) => p,
        Err(e) => return errored(&config, e),
    };
    let marker = cache_layout::ipull_marker(&artifact);
    let sentinel = cache_layout::lock_sentinel(&artifact);

    let _lock = match ArtifactLock::acquire(&sentinel).await {
        Ok(l) => l,
        Err(e) => return errored(&config, e),
    };

    let mut validation = validate::validate_artifact(&artifact, &marker, &config);

    if let Validation::Invalid { reason } = &validation {
        tracing::info!(reason, "artifact invalid, delegating to engine prepareModel");
        if let Err(e) = engine.prepare_model(&config, cancel.clone()).await {
            return errored(&config, e);
        }
        validation = validate::validate_artifact(&artifact, &marker, &config);
        if let Validation::Invalid { reason } = &validation {
            return errored(
                &config,
                CoreError::PrepareFailed {
                    model_id: config.id.to_string(),
                    message: format!("re-validation after download failed: {reason}"),
                },
            );
        }
    }

    let meta = match validation {
        Validation::Valid { meta: Some(gguf) } => Some(serde_json::json!({
            "ggufVersion": gguf.version,
            "tensorCount": gguf.tensor_count,
            "metadataKvCount": gguf.metadata_kv_count,
        })),
        _ => None,
    };

    StoredModel {
        config,
        status: ModelStatus::Ready,
        meta,
        error: None,
    }
}

fn errored(config: &Arc<ModelConfig>, err: CoreError) -> StoredModel {
    tracing::warn!(model = %config.id, error = %err, "prepare failed");
    StoredModel {
        config: config.clone(),
        status: ModelStatus::Error,
        meta: None,
        error: Some(err.to_string()),
    }
}
