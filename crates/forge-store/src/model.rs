use forge_types::{CoreError, ModelConfig};
use serde_json::Value;

/// §3: `unloaded → preparing → {ready|error}`. Only the Store mutates this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Unloaded,
    Preparing,
    Ready,
    Error,
}

/// One per configured model, owned by [`crate::store::ModelStore`].
#[derive(Debug, Clone)]
pub struct StoredModel {
    pub config: std::sync::Arc<ModelConfig>,
    pub status: ModelStatus,
    pub meta: Option<Value>,
    pub error: Option<String>,
}

impl StoredModel {
    pub fn unloaded(config: std::sync::Arc<ModelConfig>) -> Self {
        Self {
            config,
            status: ModelStatus::Unloaded,
            meta: None,
            error: None,
        }
    }

    pub fn into_result(self) -> Result<Self, CoreError> {
        match self.status {
            ModelStatus::Error => Err(CoreError::PrepareFailed {
                model_id: self.config.id.to_string(),
                message: self.error.clone().unwrap_or_default(),
            }),
            _ => Ok(self),
        }
    }
}
