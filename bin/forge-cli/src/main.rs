//! forge-cli – operate on the Model Store directly, without the HTTP façade
//! (§6: `list | show | prepare | remove`).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use forge_engine::EngineAdapter;
use forge_store::ModelStore;
use forge_types::{ModelConfig, ModelId};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "forge-cli", about = "Operate on the forge-server Model Store")]
struct Cli {
    /// Path to the TOML config file (same shape `bin/forge-server` reads).
    #[arg(long, default_value = "forge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every configured model and its current status.
    List,
    /// Show one model's full configuration and status.
    Show { id: String },
    /// Eagerly prepare (download/validate) one model's artifact.
    Prepare { id: String },
    /// Delete a model's cached artifact from disk.
    Remove { id: String },
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    cache_path: PathBuf,
    #[serde(default)]
    models: Vec<ModelConfig>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();

    let raw = std::fs::read_to_string(&cli.config)
        .map_err(|e| anyhow::anyhow!("failed to read config file '{}': {e}", cli.config.display()))?;
    let file_config: FileConfig = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse config file '{}': {e}", cli.config.display()))?;

    let mut engines: HashMap<String, Arc<dyn EngineAdapter>> = HashMap::new();
    engines.insert("builtin.echo".into(), Arc::new(forge_engines_builtin::EchoEngine::new()));

    let store =
        ModelStore::init(file_config.models.clone(), engines, file_config.cache_path.clone(), 1).await?;

    match cli.command {
        Command::List => {
            for config in &file_config.models {
                let status = store.status(&config.id).await;
                println!("{}\t{:?}", config.id, status.map(|s| s.status));
            }
        }
        Command::Show { id } => {
            let id = ModelId::new(id)?;
            let status = store.status(&id).await.ok_or_else(|| anyhow::anyhow!("model '{id}' not found"))?;
            println!("{:#?}", status);
        }
        Command::Prepare { id } => {
            let id = ModelId::new(id)?;
            let result = store.prepare_model(&id, None).await?;
            println!("prepared {id}: {:?}", result.status);
        }
        Command::Remove { id } => {
            let id = ModelId::new(id.clone())?;
            let config = file_config
                .models
                .iter()
                .find(|c| c.id == id)
                .ok_or_else(|| anyhow::anyhow!("model '{id}' not found in config"))?;
            let path = forge_store::cache_layout::artifact_path(&file_config.cache_path, config)?;
            if path.exists() {
                std::fs::remove_file(&path)?;
                println!("removed {}", path.display());
            } else {
                println!("no cached artifact at {}", path.display());
            }
        }
    }

    store.dispose().await;
    Ok(())
}
