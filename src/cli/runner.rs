//! CLI runner - executes commands

use crate::adapter;
use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::config::{MigrationConfig, StoreConfig};
use crate::engine::{FileFailureSink, TransferEngine};
use crate::error::{Error, Result};
use crate::store::{self, DocumentStore, Filter};
use crate::types::TransferMode;
use serde_json::{json, Value};
use std::sync::Arc;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        let config = MigrationConfig::from_file(&self.cli.config)?;

        match self.cli.command {
            Commands::Resume => self.resume(&config).await,
            Commands::Transfer => self.transfer(&config).await,
            Commands::Status => self.status(&config).await,
            Commands::Check => self.check(&config).await,
            Commands::Run => match config.mode {
                TransferMode::Resumable => self.resume(&config).await,
                TransferMode::Transfer => self.transfer(&config).await,
            },
        }
    }

    async fn resume(&self, config: &MigrationConfig) -> Result<()> {
        let mut engine = build_engine(config)?;
        let report = engine.run_resumable().await?;
        self.output_message(&json!({
            "type": "REPORT",
            "report": report,
        }));
        Ok(())
    }

    async fn transfer(&self, config: &MigrationConfig) -> Result<()> {
        let mut engine = build_engine(config)?;
        let report = engine.run_full_transfer().await?;
        self.output_message(&json!({
            "type": "REPORT",
            "report": report,
        }));
        Ok(())
    }

    async fn status(&self, config: &MigrationConfig) -> Result<()> {
        let engine = build_engine(config)?;
        let progress = engine.status().await?;
        self.output_message(&json!({
            "type": "STATUS",
            "status": progress,
        }));
        Ok(())
    }

    /// Reach both stores with a count; prints the outcome for each and fails
    /// if either is unreachable
    async fn check(&self, config: &MigrationConfig) -> Result<()> {
        let marker_field = &config.settings.marker_field;
        let mut sides = serde_json::Map::new();
        let mut failed = Vec::new();

        for (side, def) in [("source", &config.source), ("destination", &config.destination)] {
            let result = match store::connect(def, marker_field) {
                Ok(store) => count_all(store.as_ref()).await,
                Err(e) => Err(e),
            };
            let entry = match result {
                Ok(count) => json!({
                    "type": def.backend(),
                    "name": def.name(),
                    "documents": count,
                }),
                Err(e) => {
                    failed.push(format!("{side}: {e}"));
                    json!({
                        "type": def.backend(),
                        "name": def.name(),
                        "error": e.to_string(),
                    })
                }
            };
            sides.insert(side.to_string(), entry);
        }

        self.output_message(&json!({
            "type": "CONNECTION_STATUS",
            "connectionStatus": {
                "status": if failed.is_empty() { "SUCCEEDED" } else { "FAILED" },
                "stores": sides,
            }
        }));

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::Other(format!("Store check failed: {}", failed.join("; "))))
        }
    }

    /// Output a message
    fn output_message(&self, msg: &Value) {
        match self.cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}

async fn count_all(store: &dyn DocumentStore) -> Result<u64> {
    store.count(&Filter::All).await
}

fn connect_side(def: &StoreConfig, marker_field: &str) -> Result<Box<dyn adapter::Adapter>> {
    let store: Arc<dyn DocumentStore> = store::connect(def, marker_field)?;
    Ok(adapter::for_backend(def.backend(), store, marker_field))
}

/// Connect both stores and wire up an engine for `config`
pub fn build_engine(config: &MigrationConfig) -> Result<TransferEngine> {
    let marker_field = &config.settings.marker_field;
    let source = connect_side(&config.source, marker_field)?;
    let destination = connect_side(&config.destination, marker_field)?;

    let engine = TransferEngine::new(source, destination, config.engine_config());
    Ok(match &config.settings.failure_log_dir {
        Some(dir) => engine.with_failure_sink(FileFailureSink::new(dir)),
        None => engine,
    })
}
