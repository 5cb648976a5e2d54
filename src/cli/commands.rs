// ABOUTME: Command implementations for the flowline CLI
// ABOUTME: Builds the engine from configuration and executes the requested operation

use anyhow::{Context as _, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::Config;
use crate::engine::WorkflowEngine;
use crate::parser::{Definition, DefinitionValidator};
use crate::persistence::SqliteStore;

/// Connect storage, bootstrap definitions, and re-arm persisted timeouts.
async fn build_engine(config: &Config) -> Result<WorkflowEngine> {
    let store = SqliteStore::connect(&config.database_url)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;

    let engine = WorkflowEngine::new(
        Arc::new(store),
        Some(config.workflow_dir.clone()),
        config.script_budget,
    );

    let loaded = engine.definitions().load_dir().await?;
    info!(
        "Loaded {} workflow definitions from {}",
        loaded,
        config.workflow_dir.display()
    );

    let resumed = engine.resume_timeouts().await?;
    if resumed > 0 {
        info!("Re-armed {} persisted timeouts", resumed);
    }

    Ok(engine)
}

/// Validate one definition file, or every `*.json` file in a directory.
pub async fn validate_definitions(path: PathBuf) -> Result<()> {
    let files = if path.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();
        files
    } else {
        vec![path]
    };

    let validator = DefinitionValidator::new();
    let mut failed = 0;

    for file in &files {
        match Definition::from_file(file).await {
            Ok(definition) => {
                let report = validator.validate(&definition);
                if report.is_valid() {
                    println!("{}: OK ({} nodes)", file.display(), definition.nodes.len());
                } else {
                    failed += 1;
                    println!("{}: INVALID", file.display());
                    for error in &report.errors {
                        println!("  error: {}", error);
                    }
                }
                for warning in &report.warnings {
                    println!("  warning: {}", warning);
                }
            }
            Err(e) => {
                failed += 1;
                println!("{}: PARSE ERROR: {}", file.display(), e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} definition files failed validation", failed, files.len());
    }
    Ok(())
}

pub async fn start_instance(workflow_id: &str, config: &Config) -> Result<()> {
    let engine = build_engine(config).await?;
    let status = engine.create_instance(workflow_id).await?;

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

pub async fn show_status(instance_id: &str, config: &Config) -> Result<()> {
    let engine = build_engine(config).await?;
    let status = engine.get_status(instance_id).await?;

    if let Some(html) = &status.end_html {
        println!("{}", html);
    } else {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }
    Ok(())
}

pub async fn submit_form(
    instance_id: &str,
    form_data: HashMap<String, String>,
    config: &Config,
) -> Result<()> {
    let engine = build_engine(config).await?;
    let status = engine.submit_form(instance_id, form_data).await?;

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

pub async fn emit_signal(name: &str, config: &Config) -> Result<()> {
    let engine = build_engine(config).await?;
    let woken = engine.emit_signal(name).await?;

    if woken == 0 {
        warn!("No instances were waiting for signal '{}'", name);
    }
    println!("Signal '{}' delivered to {} instance(s)", name, woken);
    Ok(())
}

pub async fn tick(config: &Config) -> Result<()> {
    let engine = build_engine(config).await?;
    let fired = engine.tick().await?;

    println!("Fired {} expired timeout(s)", fired);
    Ok(())
}
