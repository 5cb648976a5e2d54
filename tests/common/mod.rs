// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides a file-backed engine harness and definition JSON builders

#![allow(dead_code)]

use base64::Engine as _;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use flowline::engine::WorkflowEngine;
use flowline::persistence::SqliteStore;

/// An engine over a SQLite file in a scratch directory. Keeping the file
/// (instead of :memory:) lets tests reopen the database with a second
/// engine to exercise restart behavior.
pub struct TestHarness {
    pub engine: WorkflowEngine,
    pub db_url: String,
    _dir: TempDir,
}

impl TestHarness {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("flowline.db");
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

        let engine = Self::engine_for(&db_url).await;

        Self {
            engine,
            db_url,
            _dir: dir,
        }
    }

    pub async fn with_definition(definition_json: &str) -> Self {
        let harness = Self::new().await;
        harness
            .engine
            .definitions()
            .install(definition_json)
            .await
            .unwrap();
        harness
    }

    /// A second engine over the same database, as after a process restart.
    pub async fn reopen(&self) -> WorkflowEngine {
        Self::engine_for(&self.db_url).await
    }

    async fn engine_for(db_url: &str) -> WorkflowEngine {
        let store = SqliteStore::connect(db_url).await.unwrap();
        WorkflowEngine::new(Arc::new(store), None, Duration::from_secs(2))
    }
}

/// Base64-encode a script body the way definitions carry them.
pub fn encode_script(source: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(source)
}

/// start -> script -> end, with the script body provided in clear text.
pub fn script_workflow(id: &str, script_source: &str) -> String {
    format!(
        r#"{{
            "id": "{id}", "name": "{id}",
            "nodes": [
                {{"id": "start_node", "type": "start", "next": "compute"}},
                {{"id": "compute", "type": "script",
                  "script": {{"code": "{code}"}}, "next": "done"}},
                {{"id": "done", "type": "end"}}
            ]
        }}"#,
        id = id,
        code = encode_script(script_source)
    )
}

/// start -> form(fields) -> end.
pub fn form_workflow(id: &str, fields_json: &str) -> String {
    format!(
        r#"{{
            "id": "{id}", "name": "{id}",
            "nodes": [
                {{"id": "start_node", "type": "start", "next": "ask"}},
                {{"id": "ask", "type": "form", "fields": {fields}, "next": "done"}},
                {{"id": "done", "type": "end"}}
            ]
        }}"#,
        id = id,
        fields = fields_json
    )
}
