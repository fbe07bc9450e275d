//! Process configuration, loaded from a TOML file with `clap` overrides.
//!
//! Mirrors `slab-server::config::Config`'s shape (one flat struct, sensible
//! defaults, no required fields) but sources from a config file rather than
//! environment variables — SPEC_FULL's ambient-config note calls for TOML +
//! `clap`, not `slab-server`'s env-var convention.

use std::path::PathBuf;

use clap::Parser;
use forge_types::ModelConfig;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "forge-server", about = "OpenAI-compatible inference server")]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "forge.toml")]
    pub config: PathBuf,

    /// Override the config file's `cache_path`.
    #[arg(long)]
    pub cache_path: Option<PathBuf>,

    /// Override the config file's `concurrency`.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "0.0.0.0:3000")]
    pub bind: String,

    /// `tracing` filter string, e.g. `"info"` or `"forge_pool=debug"`.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// On-disk shape of the TOML config file (§6 "config file loading").
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub cache_path: PathBuf,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_prepare_concurrency")]
    pub prepare_concurrency: usize,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    /// Disable the Swagger UI / OpenAPI spec endpoints in production.
    #[serde(default = "default_true")]
    pub enable_swagger: bool,
    /// Comma-separated list of allowed CORS origins; `None` allows all.
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
}

fn default_concurrency() -> usize {
    4
}

/// §4.2: bounded preparation concurrency defaults to 1.
fn default_prepare_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl FileConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file '{}': {e}", path.display()))?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse config file '{}': {e}", path.display()))?;
        Ok(cfg)
    }

    pub fn into_server_config(self, overrides: &Cli) -> forge_server::ServerConfig {
        let mut server = forge_server::ServerConfig::new(
            self.models,
            overrides.cache_path.clone().unwrap_or(self.cache_path),
        );
        server.concurrency = overrides.concurrency.unwrap_or(self.concurrency);
        server.prepare_concurrency = self.prepare_concurrency;
        server.log_level = Some(overrides.log_level.clone());
        server
    }
}
