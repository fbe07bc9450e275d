use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use forge_engine::{CancelToken, EngineAdapter, InstanceHandle};
use forge_store::ModelStore;
use forge_types::{CancelSignal, CoreError, ModelConfig, ModelId};
use tokio::sync::{mpsc, oneshot, watch};

use crate::context::{self, ContextIdentity};
use crate::instance::{InstanceId, InstanceStatus, ModelInstance};
use crate::lease::{Lease, ReleaseOutcome};
use crate::request::{ContextHint, PoolRequest};

/// Inventory + queue depth snapshot (§4.4 `getStatus`).
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub instances: Vec<crate::instance::InstanceSnapshot>,
    pub queue_depth: usize,
    pub gpu_holder: Option<InstanceId>,
}

pub(crate) enum PoolMessage {
    Request {
        model: ModelId,
        context_hint: ContextHint,
        cancel: Option<CancelSignal>,
        reply: oneshot::Sender<Result<Lease, CoreError>>,
    },
    CancelWaiter {
        sequence: u64,
    },
    Release {
        instance_id: InstanceId,
        handle: InstanceHandle,
        outcome: ReleaseOutcome,
    },
    InstanceLoaded {
        instance_id: InstanceId,
        result: Result<InstanceHandle, CoreError>,
    },
    TtlExpired {
        instance_id: InstanceId,
        version: u64,
    },
    Status {
        reply: oneshot::Sender<PoolStatus>,
    },
    Dispose {
        reply: oneshot::Sender<()>,
    },
}

struct PendingRequest {
    request: PoolRequest,
    reply: Option<oneshot::Sender<Result<Lease, CoreError>>>,
}

enum Selected {
    Ready(InstanceId),
    NotYet,
    Rejected(CoreError),
}

/// Bounded multi-model worker pool (§4.4). Owns exactly one actor task;
/// every [`InstancePool`] handle is just a clonable sender into its
/// mailbox, so the struct itself is cheap to share.
#[derive(Clone)]
pub struct InstancePool {
    tx: mpsc::UnboundedSender<PoolMessage>,
}

struct PoolActor {
    configs: HashMap<ModelId, Arc<ModelConfig>>,
    engines: HashMap<String, Arc<dyn EngineAdapter>>,
    store: Arc<ModelStore>,
    concurrency: usize,
    instances: HashMap<InstanceId, ModelInstance>,
    waiters: VecDeque<PendingRequest>,
    gpu_holder: Option<InstanceId>,
    seq: u64,
    self_tx: mpsc::UnboundedSender<PoolMessage>,
    shutdown_tx: watch::Sender<bool>,
    disposed: bool,
}

impl InstancePool {
    /// Preallocate `minInstances` for every configured model, then start
    /// serving requests (§4.4 `init`). A preallocation failure is logged
    /// and leaves that model degraded; it never aborts its peers.
    pub async fn init(
        configs: Vec<ModelConfig>,
        engines: HashMap<String, Arc<dyn EngineAdapter>>,
        store: Arc<ModelStore>,
        concurrency: usize,
    ) -> Result<Arc<Self>, CoreError> {
        let mut config_map = HashMap::with_capacity(configs.len());
        for config in configs {
            config.validate()?;
            if !engines.contains_key(&config.engine) {
                return Err(CoreError::config_invalid(format!(
                    "model '{}' references unknown engine '{}'",
                    config.id, config.engine
                )));
            }
            if config_map.contains_key(&config.id) {
                return Err(CoreError::config_invalid(format!("duplicate model id '{}'", config.id)));
            }
            config_map.insert(config.id.clone(), Arc::new(config));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let mut actor = PoolActor {
            configs: config_map.clone(),
            engines,
            store,
            concurrency: concurrency.max(1),
            instances: HashMap::new(),
            waiters: VecDeque::new(),
            gpu_holder: None,
            seq: 0,
            self_tx: tx.clone(),
            shutdown_tx,
            disposed: false,
        };

        for config in config_map.values() {
            for _ in 0..config.min_instances {
                actor.spawn_create(config.clone(), config.device.gpu.is_pinned(), None);
            }
        }

        tokio::spawn(async move { actor.run(rx).await });

        Ok(Arc::new(Self { tx }))
    }

    /// Acquire a locked instance for one task (§4.4 `requestInstance`).
    /// The returned lease must be released exactly once via
    /// [`Lease::release`].
    pub async fn request_instance(
        &self,
        model: ModelId,
        context_hint: ContextHint,
        cancel: Option<CancelSignal>,
    ) -> Result<Lease, CoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PoolMessage::Request {
                model,
                context_hint,
                cancel,
                reply: reply_tx,
            })
            .map_err(|_| CoreError::PoolShutdown { task_id: None })?;
        reply_rx
            .await
            .map_err(|_| CoreError::PoolShutdown { task_id: None })?
    }

    pub async fn status(&self) -> PoolStatus {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(PoolMessage::Status { reply: reply_tx }).is_err() {
            return PoolStatus {
                instances: Vec::new(),
                queue_depth: 0,
                gpu_holder: None,
            };
        }
        reply_rx.await.unwrap_or(PoolStatus {
            instances: Vec::new(),
            queue_depth: 0,
            gpu_holder: None,
        })
    }

    /// Cancel all in-flight work, abort every load/prepare signal, and
    /// dispose every instance (§4.5 `stop`).
    pub async fn dispose(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(PoolMessage::Dispose { reply: reply_tx }).is_ok() {
            let _ = reply_rx.await;
        }
    }
}

impl PoolActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PoolMessage>) {
        while let Some(msg) = rx.recv().await {
            self.handle(msg).await;
            if self.disposed {
                break;
            }
        }
    }

    async fn handle(&mut self, msg: PoolMessage) {
        match msg {
            PoolMessage::Request {
                model,
                context_hint,
                cancel,
                reply,
            } => self.on_request(model, context_hint, cancel, reply),
            PoolMessage::CancelWaiter { sequence } => self.on_cancel_waiter(sequence),
            PoolMessage::Release {
                instance_id,
                handle,
                outcome,
            } => self.on_release(instance_id, handle, outcome),
            PoolMessage::InstanceLoaded { instance_id, result } => {
                self.on_instance_loaded(instance_id, result)
            }
            PoolMessage::TtlExpired { instance_id, version } => {
                self.on_ttl_expired(instance_id, version)
            }
            PoolMessage::Status { reply } => {
                let snapshot = PoolStatus {
                    instances: self.instances.values().map(Into::into).collect(),
                    queue_depth: self.waiters.len(),
                    gpu_holder: self.gpu_holder.clone(),
                };
                let _ = reply.send(snapshot);
            }
            PoolMessage::Dispose { reply } => {
                self.on_dispose().await;
                let _ = reply.send(());
            }
        }
    }

    fn on_request(
        &mut self,
        model: ModelId,
        context_hint: ContextHint,
        cancel: Option<CancelSignal>,
        reply: oneshot::Sender<Result<Lease, CoreError>>,
    ) {
        let Some(config) = self.configs.get(&model).cloned() else {
            let _ = reply.send(Err(CoreError::ModelNotFound {
                model_id: model.to_string(),
            }));
            return;
        };

        self.seq += 1;
        let req = PendingRequest {
            request: PoolRequest {
                sequence: self.seq,
                model,
                requires_gpu: config.device.gpu.is_pinned(),
                context_hint,
            },
            reply: Some(reply),
        };

        match self.try_select(&req.request) {
            Selected::Ready(instance_id) => self.fulfill(instance_id, req),
            Selected::Rejected(err) => {
                let _ = req.reply.unwrap().send(Err(err));
            }
            Selected::NotYet => {
                let sequence = req.request.sequence;
                if let Some(mut cancel) = cancel {
                    let tx = self.self_tx.clone();
                    tokio::spawn(async move {
                        cancel.cancelled().await;
                        let _ = tx.send(PoolMessage::CancelWaiter { sequence });
                    });
                }
                self.waiters.push_back(req);
            }
        }
    }

    fn on_cancel_waiter(&mut self, sequence: u64) {
        if let Some(pos) = self.waiters.iter().position(|w| w.request.sequence == sequence) {
            let mut req = self.waiters.remove(pos).unwrap();
            if let Some(reply) = req.reply.take() {
                let _ = reply.send(Err(CoreError::Cancelled { task_id: sequence }));
            }
        }
    }

    fn on_release(
        &mut self,
        instance_id: InstanceId,
        handle: InstanceHandle,
        outcome: ReleaseOutcome,
    ) {
        let Some(instance) = self.instances.get_mut(&instance_id) else {
            return;
        };
        instance.handle = Some(handle);
        match outcome {
            ReleaseOutcome::Completed { context_identity } => {
                if context_identity.is_some() {
                    instance.context_identity = context_identity;
                }
                instance.needs_context_reset = false;
            }
            ReleaseOutcome::Errored => {
                instance.needs_context_reset = true;
            }
        }
        instance.unlock();
        let model_id = instance.model_id.clone();
        let version = instance.version;

        self.drain_queue();

        let Some(instance) = self.instances.get(&instance_id) else {
            return;
        };
        if instance.status != InstanceStatus::Idle {
            return;
        }
        let Some(config) = self.configs.get(&model_id).cloned() else {
            return;
        };

        if config.ttl.is_zero() {
            if self.count_model(&model_id) > config.min_instances {
                self.dispose_instance(&instance_id);
                self.maybe_recreate_below_min(&model_id);
            }
            return;
        }

        let tx = self.self_tx.clone();
        let ttl = config.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let _ = tx.send(PoolMessage::TtlExpired { instance_id, version });
        });
    }

    fn on_ttl_expired(&mut self, instance_id: InstanceId, version: u64) {
        let Some(instance) = self.instances.get(&instance_id) else {
            return;
        };
        if instance.status != InstanceStatus::Idle || instance.version != version {
            return;
        }
        let model_id = instance.model_id.clone();
        let min_instances = self.configs.get(&model_id).map(|c| c.min_instances).unwrap_or(0);
        if self.count_model(&model_id) > min_instances {
            self.dispose_instance(&instance_id);
        }
    }

    fn on_instance_loaded(&mut self, instance_id: InstanceId, result: Result<InstanceHandle, CoreError>) {
        let Some(instance) = self.instances.get(&instance_id) else {
            return;
        };
        let pending_for = instance.pending_for;
        let model_id = instance.model_id.clone();

        match result {
            Ok(handle) => {
                if let Some(instance) = self.instances.get_mut(&instance_id) {
                    instance.handle = Some(handle);
                    instance.status = InstanceStatus::Idle;
                    instance.last_used = Instant::now();
                    instance.context_identity = seed_context(&instance.config);
                }
                if let Some(seq) = pending_for {
                    if let Some(pos) = self.waiters.iter().position(|w| w.request.sequence == seq) {
                        let req = self.waiters.remove(pos).unwrap();
                        self.fulfill(instance_id, req);
                        return;
                    }
                }
                self.drain_queue();
            }
            Err(err) => {
                self.instances.remove(&instance_id);
                if self.gpu_holder.as_ref() == Some(&instance_id) {
                    self.gpu_holder = None;
                }
                if let Some(seq) = pending_for {
                    if let Some(pos) = self.waiters.iter().position(|w| w.request.sequence == seq) {
                        let mut req = self.waiters.remove(pos).unwrap();
                        if let Some(reply) = req.reply.take() {
                            let _ = reply.send(Err(err));
                        }
                    }
                } else {
                    tracing::warn!(model = %model_id, error = %err, "background instance (re)creation failed");
                }
                self.maybe_recreate_below_min(&model_id);
                self.drain_queue();
            }
        }
    }

    async fn on_dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let _ = self.shutdown_tx.send(true);

        while let Some(mut req) = self.waiters.pop_front() {
            if let Some(reply) = req.reply.take() {
                let _ = reply.send(Err(CoreError::PoolShutdown {
                    task_id: Some(req.request.sequence),
                }));
            }
        }

        for (_, instance) in self.instances.drain() {
            if let (Some(handle), Some(engine)) = (
                instance.handle,
                self.engines.get(&instance.config.engine).cloned(),
            ) {
                engine.dispose_instance(handle).await;
            }
        }
        self.gpu_holder = None;
        self.store.dispose().await;
    }

    /// §4.4 `requestInstance` selection algorithm, steps 1-6 (step 6 is
    /// simply "return `NotYet`, let the caller enqueue").
    fn try_select(&mut self, req: &PoolRequest) -> Selected {
        if self.disposed {
            return Selected::Rejected(CoreError::PoolShutdown { task_id: None });
        }
        // A placeholder already reserves a slot for this exact request;
        // nothing more to do until `InstanceLoaded` resolves it.
        if self.instances.values().any(|i| i.pending_for == Some(req.sequence)) {
            return Selected::NotYet;
        }

        let Some(config) = self.configs.get(&req.model).cloned() else {
            return Selected::Rejected(CoreError::ModelNotFound {
                model_id: req.model.to_string(),
            });
        };

        if let Some(id) = self.pick_idle(req) {
            return Selected::Ready(id);
        }

        let count_model = self.count_model(&req.model);
        let busy_count = self.instances.values().filter(|i| i.status == InstanceStatus::Busy).count();

        if count_model < config.max_instances && busy_count < self.concurrency {
            if !self.make_room_for_gpu(req.requires_gpu) {
                return Selected::NotYet;
            }
            self.spawn_create(config, req.requires_gpu, Some(req.sequence));
            return Selected::NotYet;
        }

        if let Some(victim) = self.find_evict_victim(&req.model) {
            self.dispose_instance(&victim);
            let count_model = self.count_model(&req.model);
            let busy_count = self.instances.values().filter(|i| i.status == InstanceStatus::Busy).count();
            if count_model < config.max_instances && busy_count < self.concurrency {
                if self.make_room_for_gpu(req.requires_gpu) {
                    self.spawn_create(config, req.requires_gpu, Some(req.sequence));
                }
            }
            return Selected::NotYet;
        }

        Selected::NotYet
    }

    /// Eligible idle instances for `req`: context-match preferred (§4.4
    /// step 2), then any idle instance (step 3), each tie-broken
    /// most-recently-used.
    fn pick_idle(&self, req: &PoolRequest) -> Option<InstanceId> {
        let eligible: Vec<&ModelInstance> = self
            .instances
            .values()
            .filter(|i| {
                i.model_id == req.model
                    && i.status == InstanceStatus::Idle
                    && (!req.requires_gpu || i.gpu)
            })
            .collect();

        if let Some(i) = eligible
            .iter()
            .filter(|i| context_matches(i, &req.context_hint))
            .max_by_key(|i| i.last_used)
        {
            return Some(i.id.clone());
        }

        eligible.into_iter().max_by_key(|i| i.last_used).map(|i| i.id.clone())
    }

    /// GPU arbitration for a creation attempt (§4.4 "GPU arbitration").
    /// Returns `false` when the lease is held by a busy instance — the
    /// caller must enqueue rather than create.
    fn make_room_for_gpu(&mut self, requires_gpu: bool) -> bool {
        if !requires_gpu {
            return true;
        }
        match self.gpu_holder.clone() {
            None => true,
            Some(holder_id) => {
                let holder_busy = self
                    .instances
                    .get(&holder_id)
                    .map(|i| i.status == InstanceStatus::Busy)
                    .unwrap_or(false);
                if holder_busy {
                    false
                } else {
                    self.dispose_instance(&holder_id);
                    true
                }
            }
        }
    }

    /// §4.4 step 5: an idle instance of a *different* model whose
    /// disposal would not violate its own `minInstances`, LRU first,
    /// ties broken by ascending instance id (DESIGN.md decision #3).
    fn find_evict_victim(&self, model: &ModelId) -> Option<InstanceId> {
        self.instances
            .values()
            .filter(|i| {
                i.model_id != *model
                    && i.status == InstanceStatus::Idle
                    && self.count_model(&i.model_id)
                        > self.configs.get(&i.model_id).map(|c| c.min_instances).unwrap_or(0)
            })
            .min_by(|a, b| a.last_used.cmp(&b.last_used).then_with(|| a.id.cmp(&b.id)))
            .map(|i| i.id.clone())
    }

    fn count_model(&self, model: &ModelId) -> usize {
        self.instances.values().filter(|i| i.model_id == *model).count()
    }

    /// Lock the instance for `req` and reply with a [`Lease`]. Sets
    /// `needsContextReset` when the instance's baked-in context doesn't
    /// actually match what this request needs (§4.4, final paragraph).
    fn fulfill(&mut self, instance_id: InstanceId, mut req: PendingRequest) {
        let Some(instance) = self.instances.get_mut(&instance_id) else {
            if let Some(reply) = req.reply.take() {
                let _ = reply.send(Err(CoreError::Internal("selected instance vanished".into())));
            }
            return;
        };

        let mismatched = match (&instance.context_identity, &req.request.context_hint) {
            (Some(identity), ContextHint::Chat(digest)) => !context::chat_matches(identity, digest),
            (Some(identity), ContextHint::Text(prompt)) => !context::text_matches(identity, prompt),
            (None, _) | (_, ContextHint::None) => false,
        };
        let reset_context = instance.needs_context_reset || mismatched;
        if reset_context {
            instance.context_identity = None;
            instance.needs_context_reset = false;
        }

        instance.lock_for(req.request.sequence);
        let handle = instance.handle.take().expect("idle instance holds its handle");
        let lease = Lease::new(
            instance_id,
            req.request.model.clone(),
            instance.config.clone(),
            reset_context,
            handle,
            self.self_tx.clone(),
            self.shutdown_tx.subscribe(),
        );
        if let Some(reply) = req.reply.take() {
            let _ = reply.send(Ok(lease));
        }
    }

    /// Re-run selection against the queue head only — head-of-line
    /// blocking across model-device equivalence classes is accepted by
    /// design (§5 ordering guarantees).
    fn drain_queue(&mut self) {
        loop {
            let Some(req) = self.waiters.front() else {
                return;
            };
            let request = req.request.clone();
            match self.try_select(&request) {
                Selected::Ready(instance_id) => {
                    let req = self.waiters.pop_front().unwrap();
                    self.fulfill(instance_id, req);
                }
                Selected::Rejected(err) => {
                    let mut req = self.waiters.pop_front().unwrap();
                    if let Some(reply) = req.reply.take() {
                        let _ = reply.send(Err(err));
                    }
                }
                Selected::NotYet => return,
            }
        }
    }

    /// Reserve a placeholder instance (counts toward `maxInstances`
    /// immediately) and spawn its prepare+load off the actor loop.
    fn spawn_create(&mut self, config: Arc<ModelConfig>, force_gpu: bool, pending_for: Option<u64>) {
        let Some(engine) = self.engines.get(&config.engine).cloned() else {
            tracing::error!(model = %config.id, engine = %config.engine, "unknown engine at creation time");
            return;
        };

        let mut instance = ModelInstance::new(config.clone());
        instance.pending_for = pending_for;
        if force_gpu {
            instance.gpu = true;
            self.gpu_holder = Some(instance.id.clone());
        } else if engine.auto_gpu() && self.gpu_holder.is_none() {
            instance.gpu = true;
            self.gpu_holder = Some(instance.id.clone());
        }
        let instance_id = instance.id.clone();
        self.instances.insert(instance_id.clone(), instance);

        let store = self.store.clone();
        let tx = self.self_tx.clone();
        let cancel = CancelToken::from_button(self.shutdown_tx.subscribe());
        tokio::spawn(async move {
            let result = async {
                store.prepare_model(&config.id, Some(cancel.clone())).await?;
                engine.create_instance(&config, cancel).await
            }
            .await;
            let _ = tx.send(PoolMessage::InstanceLoaded { instance_id, result });
        });
    }

    fn dispose_instance(&mut self, instance_id: &InstanceId) {
        let Some(instance) = self.instances.remove(instance_id) else {
            return;
        };
        if self.gpu_holder.as_ref() == Some(instance_id) {
            self.gpu_holder = None;
        }
        if let (Some(handle), Some(engine)) = (
            instance.handle,
            self.engines.get(&instance.config.engine).cloned(),
        ) {
            tokio::spawn(async move {
                engine.dispose_instance(handle).await;
            });
        }
    }

    fn maybe_recreate_below_min(&mut self, model_id: &ModelId) {
        let Some(config) = self.configs.get(model_id).cloned() else {
            return;
        };
        if self.count_model(model_id) < config.min_instances {
            self.spawn_create(config.clone(), config.device.gpu.is_pinned(), None);
        }
    }
}

fn context_matches(instance: &ModelInstance, hint: &ContextHint) -> bool {
    match (&instance.context_identity, hint) {
        (Some(identity), ContextHint::Chat(digest)) => context::chat_matches(identity, digest),
        (Some(identity), ContextHint::Text(prompt)) => context::text_matches(identity, prompt),
        _ => false,
    }
}

fn seed_context(config: &ModelConfig) -> Option<ContextIdentity> {
    if let Some(messages) = &config.initial_messages {
        if !messages.is_empty() {
            return Some(context::chat_digest(messages, false));
        }
    }
    if let Some(prefix) = &config.prefix {
        if !prefix.is_empty() {
            return Some(context::text_identity(prefix, ""));
        }
    }
    None
}
