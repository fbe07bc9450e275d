use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::task::{ChatMessage, TaskKind};

/// Stable string identifier for a configured model. Must match
/// `[A-Za-z0-9_:.-]+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        if raw.is_empty()
            || !raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '.' | '-'))
        {
            return Err(CoreError::config_invalid(format!(
                "model id '{raw}' does not match [A-Za-z0-9_:.-]+"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ModelId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Whether and how an instance should use the GPU.
///
/// `device.gpu` in the source config is either a bool or a vendor string;
/// `Auto`/`Disabled` place no GPU requirement on instance selection (§4.4
/// step 1), `Required`/`Vendor` pin the model to the GPU lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum GpuPreference {
    Bool(bool),
    Vendor(String),
    #[serde(rename = "auto")]
    Auto,
}

// Manual `Deserialize`: with `#[serde(untagged)]` the string `"auto"` would
// match `Vendor(String)` before ever reaching the renamed `Auto` unit (serde
// tries variants in declaration order), silently pinning "auto" models to
// the GPU lease. Deserialize to a bool-or-string first, then special-case
// the literal `"auto"`.
impl<'de> Deserialize<'de> for GpuPreference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            String(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Bool(b) => GpuPreference::Bool(b),
            Raw::String(s) if s == "auto" => GpuPreference::Auto,
            Raw::String(s) => GpuPreference::Vendor(s),
        })
    }
}

impl Default for GpuPreference {
    fn default() -> Self {
        GpuPreference::Auto
    }
}

impl GpuPreference {
    /// Whether this preference pins the model to the GPU lease (§4.4 step 1).
    pub fn is_pinned(&self) -> bool {
        match self {
            GpuPreference::Bool(b) => *b,
            GpuPreference::Vendor(_) => true,
            GpuPreference::Auto => false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub gpu: GpuPreference,
    pub gpu_layers: Option<u32>,
    pub cpu_threads: Option<u32>,
    #[serde(default)]
    pub mem_lock: bool,
}

/// When a model's artifacts are prepared relative to `Store::init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrepareMode {
    /// Deferred until the first `requestInstance` needs it.
    OnDemand,
    /// `Store::init` awaits completion before returning.
    Blocking,
    /// `Store::init` triggers it in the background.
    Async,
}

impl Default for PrepareMode {
    fn default() -> Self {
        PrepareMode::OnDemand
    }
}

fn default_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_max_instances() -> usize {
    1
}

/// Immutable, per-model configuration. Once registered with the Store/Pool
/// it never changes for the lifetime of the process (§9 open question:
/// runtime resizing of `maxInstances` is unsupported).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: ModelId,
    pub engine: String,
    pub task: TaskKind,

    pub url: Option<String>,
    pub location: Option<String>,
    pub sha256: Option<String>,
    pub md5: Option<String>,

    #[serde(default)]
    pub min_instances: usize,
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,

    #[serde(default = "default_ttl", with = "humantime_duration")]
    pub ttl: Duration,

    pub context_size: Option<u32>,
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub prepare: PrepareMode,

    #[serde(default)]
    pub completion_defaults: serde_json::Value,
    pub initial_messages: Option<Vec<ChatMessage>>,
    pub prefix: Option<String>,
    pub grammars: Option<serde_json::Value>,
    pub tools: Option<serde_json::Value>,

    /// Opaque engine-specific extensions, carried through without
    /// interpretation by the core (§3).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ModelConfig {
    /// Validate the bounds invariant from §3: `0 <= min <= max`, `max >= 1`.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_instances < 1 {
            return Err(CoreError::config_invalid(format!(
                "model '{}': maxInstances must be >= 1, got {}",
                self.id, self.max_instances
            )));
        }
        if self.min_instances > self.max_instances {
            return Err(CoreError::config_invalid(format!(
                "model '{}': minInstances ({}) must be <= maxInstances ({})",
                self.id, self.min_instances, self.max_instances
            )));
        }
        Ok(())
    }
}

mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ModelConfig {
        ModelConfig {
            id: ModelId::new("qwen2.5-0.5b").unwrap(),
            engine: "builtin.echo".into(),
            task: TaskKind::ChatCompletion,
            url: None,
            location: None,
            sha256: None,
            md5: None,
            min_instances: 0,
            max_instances: 1,
            ttl: default_ttl(),
            context_size: None,
            batch_size: None,
            device: DeviceConfig::default(),
            prepare: PrepareMode::OnDemand,
            completion_defaults: serde_json::Value::Null,
            initial_messages: None,
            prefix: None,
            grammars: None,
            tools: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn rejects_bad_id_chars() {
        assert!(ModelId::new("bad id!").is_err());
        assert!(ModelId::new("").is_err());
        assert!(ModelId::new("good_id-1.2:3").is_ok());
    }

    #[test]
    fn rejects_max_instances_zero() {
        let mut cfg = base_config();
        cfg.max_instances = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_min_greater_than_max() {
        let mut cfg = base_config();
        cfg.min_instances = 2;
        cfg.max_instances = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_valid_bounds() {
        let mut cfg = base_config();
        cfg.min_instances = 1;
        cfg.max_instances = 4;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn gpu_preference_pinning() {
        assert!(!GpuPreference::Auto.is_pinned());
        assert!(!GpuPreference::Bool(false).is_pinned());
        assert!(GpuPreference::Bool(true).is_pinned());
        assert!(GpuPreference::Vendor("nvidia".into()).is_pinned());
    }
}
