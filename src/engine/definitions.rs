// ABOUTME: Definition store: cached workflow definitions served by ID
// ABOUTME: Reader-shared cache refilled lazily from storage or a bootstrap directory

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::error::{EngineError, Result};
use crate::parser::{Definition, DefinitionValidator};
use crate::persistence::Store;

/// Serves immutable workflow definitions by ID. Lookups hit an in-memory
/// cache first, then the persistence layer, then the bootstrap directory;
/// a definition found on disk is persisted so later lookups tolerate the
/// directory being absent. A redeploy replaces the cache entry wholesale.
#[derive(Clone)]
pub struct DefinitionStore {
    store: Arc<dyn Store>,
    dir: Option<PathBuf>,
    cache: Arc<RwLock<HashMap<String, Arc<Definition>>>>,
}

impl DefinitionStore {
    pub fn new(store: Arc<dyn Store>, dir: Option<PathBuf>) -> Self {
        Self {
            store,
            dir,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Bootstrap-load every `*.json` definition in the configured directory.
    /// Files that fail to parse or validate are skipped with a warning.
    pub async fn load_dir(&self) -> Result<usize> {
        let Some(dir) = &self.dir else {
            return Ok(0);
        };

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read workflow directory {}: {}", dir.display(), e);
                return Ok(0);
            }
        };

        let mut loaded = 0;
        while let Some(entry) = entries.next_entry().await.map_err(crate::parser::ParserError::from)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let raw = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Failed to read workflow file {}: {}", path.display(), e);
                    continue;
                }
            };

            match self.install(&raw).await {
                Ok(definition) => {
                    info!(
                        "Loaded workflow definition: {} (ID: {})",
                        definition.name, definition.id
                    );
                    loaded += 1;
                }
                Err(e) => warn!("Skipping workflow file {}: {}", path.display(), e),
            }
        }

        Ok(loaded)
    }

    /// Look up a definition, refilling the cache from storage or disk.
    pub async fn get(&self, workflow_id: &str) -> Result<Arc<Definition>> {
        {
            let cache = self.cache.read().await;
            if let Some(definition) = cache.get(workflow_id) {
                return Ok(Arc::clone(definition));
            }
        }

        if let Some(row) = self.store.get_definition(workflow_id).await? {
            let definition = self.parse_checked(&row.raw_json)?;
            let definition = Arc::new(definition);
            self.cache
                .write()
                .await
                .insert(workflow_id.to_string(), Arc::clone(&definition));
            return Ok(definition);
        }

        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{}.json", workflow_id));
            if let Ok(raw) = tokio::fs::read_to_string(&path).await {
                let definition = self.install(&raw).await?;
                info!(
                    "Dynamically loaded workflow definition '{}' from {}",
                    workflow_id,
                    path.display()
                );
                return Ok(definition);
            }
        }

        Err(EngineError::DefinitionNotFound {
            workflow_id: workflow_id.to_string(),
        })
    }

    /// Parse, validate, persist, and cache a raw definition document.
    pub async fn install(&self, raw_json: &str) -> Result<Arc<Definition>> {
        let definition = self.parse_checked(raw_json)?;

        let meta_json = definition
            .meta
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.store
            .save_definition(&definition.id, &definition.name, meta_json.as_deref(), raw_json)
            .await?;

        let definition = Arc::new(definition);
        self.cache
            .write()
            .await
            .insert(definition.id.clone(), Arc::clone(&definition));
        Ok(definition)
    }

    fn parse_checked(&self, raw_json: &str) -> Result<Definition> {
        let definition = Definition::from_json(raw_json)?;

        let report = DefinitionValidator::new().validate(&definition);
        if !report.is_valid() {
            let details = report
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(EngineError::InvalidDefinition {
                workflow_id: definition.id.clone(),
                details,
            });
        }

        Ok(definition)
    }
}
