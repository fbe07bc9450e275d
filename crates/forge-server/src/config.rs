use std::path::PathBuf;

use forge_types::ModelConfig;

/// Configuration passed to [`crate::InferenceServer::start`] (§6): the
/// `modelId -> ModelConfig` registry — carried as a `Vec` since each
/// `ModelConfig` already names its own `id` — plus the global knobs the
/// composition root itself owns.
///
/// `log_level` is advisory only; this library never installs a `tracing`
/// subscriber itself, the same separation the teacher's `api::Config` draws
/// between runtime configuration and process-wide logging setup (left to
/// the binary — see `bin/forge-server`'s ambient configuration loading).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub models: Vec<ModelConfig>,
    pub cache_path: PathBuf,
    pub concurrency: usize,
    pub prepare_concurrency: usize,
    pub log_level: Option<String>,
}

impl ServerConfig {
    pub fn new(models: Vec<ModelConfig>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            models,
            cache_path: cache_path.into(),
            concurrency: 4,
            prepare_concurrency: 1,
            log_level: None,
        }
    }
}
