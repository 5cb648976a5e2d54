// ABOUTME: SQLite implementation of the Store trait using sqlx
// ABOUTME: Owns the schema, RFC3339 timestamp encoding, and the transactional head CAS

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::error::{Result, StoreError};
use super::records::{ArmedDeadline, DefinitionRow, InstanceRecord, NodeExecutionRecord};
use super::Store;

/// Timestamps are stored as fixed-width RFC3339 TEXT so that SQL string
/// ordering matches chronological ordering.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp {
            value: value.to_string(),
        })
}

fn decode_ts_opt(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(decode_ts).transpose()
}

/// The empty string marks "not waiting" in storage, keeping the
/// waiting-signal index a plain equality scan.
fn encode_signal(signal: Option<&str>) -> &str {
    signal.unwrap_or("")
}

fn decode_signal(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to a SQLite database URL (e.g. `sqlite://flowline.db?mode=rwc`)
    /// and ensure the schema exists.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// An in-memory database on a single connection, for tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workflow_definitions ( \
                id TEXT PRIMARY KEY, \
                name TEXT NOT NULL, \
                meta TEXT, \
                raw_json TEXT NOT NULL )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workflow_instances ( \
                id TEXT PRIMARY KEY, \
                workflow_id TEXT NOT NULL, \
                current_node_execution_id TEXT NOT NULL, \
                context TEXT NOT NULL, \
                waiting_signal TEXT NOT NULL DEFAULT '', \
                expires_at TEXT, \
                created_at TEXT NOT NULL, \
                updated_at TEXT NOT NULL )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS node_executions ( \
                id TEXT PRIMARY KEY, \
                instance_id TEXT NOT NULL REFERENCES workflow_instances(id), \
                node_id TEXT NOT NULL, \
                context TEXT NOT NULL, \
                waiting_signal TEXT NOT NULL DEFAULT '', \
                expires_at TEXT, \
                created_at TEXT NOT NULL, \
                updated_at TEXT NOT NULL )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_instances_waiting_signal \
             ON workflow_instances(waiting_signal)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_instances_expires_at \
             ON workflow_instances(expires_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_node_executions_instance \
             ON node_executions(instance_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        debug!("SQLite schema ensured");
        Ok(())
    }

    fn instance_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<InstanceRecord> {
        Ok(InstanceRecord {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            current_node_execution_id: row.try_get("current_node_execution_id")?,
            ctx_json: row.try_get("context")?,
            waiting_signal: decode_signal(row.try_get("waiting_signal")?),
            expires_at: decode_ts_opt(row.try_get("expires_at")?)?,
            created_at: decode_ts(&row.try_get::<String, _>("created_at")?)?,
            updated_at: decode_ts(&row.try_get::<String, _>("updated_at")?)?,
        })
    }

    fn execution_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<NodeExecutionRecord> {
        Ok(NodeExecutionRecord {
            id: row.try_get("id")?,
            instance_id: row.try_get("instance_id")?,
            node_id: row.try_get("node_id")?,
            ctx_json: row.try_get("context")?,
            waiting_signal: decode_signal(row.try_get("waiting_signal")?),
            expires_at: decode_ts_opt(row.try_get("expires_at")?)?,
            created_at: decode_ts(&row.try_get::<String, _>("created_at")?)?,
            updated_at: decode_ts(&row.try_get::<String, _>("updated_at")?)?,
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_definition(
        &self,
        id: &str,
        name: &str,
        meta_json: Option<&str>,
        raw_json: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO workflow_definitions (id, name, meta, raw_json) VALUES (?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 name = excluded.name, meta = excluded.meta, raw_json = excluded.raw_json",
        )
        .bind(id)
        .bind(name)
        .bind(meta_json)
        .bind(raw_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_definition(&self, id: &str) -> Result<Option<DefinitionRow>> {
        let row = sqlx::query(
            "SELECT id, name, meta, raw_json FROM workflow_definitions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(DefinitionRow {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                meta_json: row.try_get("meta")?,
                raw_json: row.try_get("raw_json")?,
            })),
        }
    }

    async fn save_new_instance(
        &self,
        instance_id: &str,
        workflow_id: &str,
        initial_node_id: &str,
        ctx_json: &str,
        waiting_signal: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let execution_id = Uuid::new_v4().to_string();
        let now = encode_ts(Utc::now());
        let expires = expires_at.map(encode_ts);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflow_instances \
                 (id, workflow_id, current_node_execution_id, context, waiting_signal, \
                  expires_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(instance_id)
        .bind(workflow_id)
        .bind(&execution_id)
        .bind(ctx_json)
        .bind(encode_signal(waiting_signal))
        .bind(&expires)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO node_executions \
                 (id, instance_id, node_id, context, waiting_signal, expires_at, \
                  created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&execution_id)
        .bind(instance_id)
        .bind(initial_node_id)
        .bind(ctx_json)
        .bind(encode_signal(waiting_signal))
        .bind(&expires)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            "Created instance {} at node {} (execution {})",
            instance_id, initial_node_id, execution_id
        );
        Ok(execution_id)
    }

    async fn append_node_execution_and_update_head(
        &self,
        instance_id: &str,
        expected_execution_id: &str,
        new_node_id: &str,
        ctx_json: &str,
        waiting_signal: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let execution_id = Uuid::new_v4().to_string();
        let now = encode_ts(Utc::now());
        let expires = expires_at.map(encode_ts);

        let mut tx = self.pool.begin().await?;

        // The CAS on the head serializes concurrent transitions out of the
        // same node execution: whichever racer commits first invalidates
        // the other's expected execution ID.
        let updated = sqlx::query(
            "UPDATE workflow_instances SET \
                 current_node_execution_id = ?, context = ?, waiting_signal = ?, \
                 expires_at = ?, updated_at = ? \
             WHERE id = ? AND current_node_execution_id = ?",
        )
        .bind(&execution_id)
        .bind(ctx_json)
        .bind(encode_signal(waiting_signal))
        .bind(&expires)
        .bind(&now)
        .bind(instance_id)
        .bind(expected_execution_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists =
                sqlx::query("SELECT 1 FROM workflow_instances WHERE id = ?")
                    .bind(instance_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .is_some();
            return Err(if exists {
                StoreError::StaleHead {
                    instance_id: instance_id.to_string(),
                }
            } else {
                StoreError::InstanceNotFound {
                    instance_id: instance_id.to_string(),
                }
            });
        }

        sqlx::query(
            "INSERT INTO node_executions \
                 (id, instance_id, node_id, context, waiting_signal, expires_at, \
                  created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&execution_id)
        .bind(instance_id)
        .bind(new_node_id)
        .bind(ctx_json)
        .bind(encode_signal(waiting_signal))
        .bind(&expires)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            "Advanced instance {} to node {} (execution {})",
            instance_id, new_node_id, execution_id
        );
        Ok(execution_id)
    }

    async fn get_instance(&self, instance_id: &str) -> Result<InstanceRecord> {
        let row = sqlx::query(
            "SELECT id, workflow_id, current_node_execution_id, context, waiting_signal, \
                    expires_at, created_at, updated_at \
             FROM workflow_instances WHERE id = ?",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::InstanceNotFound {
            instance_id: instance_id.to_string(),
        })?;

        Self::instance_from_row(&row)
    }

    async fn get_node_execution(&self, execution_id: &str) -> Result<NodeExecutionRecord> {
        let row = sqlx::query(
            "SELECT id, instance_id, node_id, context, waiting_signal, expires_at, \
                    created_at, updated_at \
             FROM node_executions WHERE id = ?",
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::ExecutionNotFound {
            execution_id: execution_id.to_string(),
        })?;

        Self::execution_from_row(&row)
    }

    async fn get_node_executions(&self, instance_id: &str) -> Result<Vec<NodeExecutionRecord>> {
        let rows = sqlx::query(
            "SELECT id, instance_id, node_id, context, waiting_signal, expires_at, \
                    created_at, updated_at \
             FROM node_executions WHERE instance_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::execution_from_row).collect()
    }

    async fn get_instances_waiting_for_signal(&self, signal: &str) -> Result<Vec<String>> {
        if signal.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT id FROM workflow_instances WHERE waiting_signal = ?")
            .bind(signal)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| r.try_get("id").map_err(StoreError::from))
            .collect()
    }

    async fn get_expired_instances(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT id FROM workflow_instances \
             WHERE expires_at IS NOT NULL AND expires_at <= ? \
             ORDER BY expires_at ASC",
        )
        .bind(encode_ts(now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| r.try_get("id").map_err(StoreError::from))
            .collect()
    }

    async fn get_armed_deadlines(&self) -> Result<Vec<ArmedDeadline>> {
        let rows = sqlx::query(
            "SELECT id, current_node_execution_id, expires_at FROM workflow_instances \
             WHERE expires_at IS NOT NULL ORDER BY expires_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ArmedDeadline {
                    instance_id: row.try_get("id")?,
                    execution_id: row.try_get("current_node_execution_id")?,
                    expires_at: decode_ts(&row.try_get::<String, _>("expires_at")?)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    async fn store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_definition_upsert_and_fetch() {
        let store = store().await;

        store
            .save_definition("wf", "Workflow", None, "{\"id\":\"wf\"}")
            .await
            .unwrap();
        store
            .save_definition("wf", "Workflow v2", Some("{}"), "{\"id\":\"wf\",\"v\":2}")
            .await
            .unwrap();

        let row = store.get_definition("wf").await.unwrap().unwrap();
        assert_eq!(row.name, "Workflow v2");
        assert!(row.raw_json.contains("\"v\":2"));

        assert!(store.get_definition("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_instance_head_points_at_initial_execution() {
        let store = store().await;

        let execution_id = store
            .save_new_instance("inst-1", "wf", "start_node", "{}", None, None)
            .await
            .unwrap();

        let instance = store.get_instance("inst-1").await.unwrap();
        assert_eq!(instance.current_node_execution_id, execution_id);
        assert_eq!(instance.waiting_signal, None);

        let execution = store.get_node_execution(&execution_id).await.unwrap();
        assert_eq!(execution.node_id, "start_node");
        assert_eq!(execution.instance_id, "inst-1");
    }

    #[tokio::test]
    async fn test_append_advances_head_and_grows_log() {
        let store = store().await;
        let first = store
            .save_new_instance("inst-1", "wf", "start_node", "{}", None, None)
            .await
            .unwrap();

        let second = store
            .append_node_execution_and_update_head(
                "inst-1",
                &first,
                "step_two",
                "{\"x\":1}",
                None,
                None,
            )
            .await
            .unwrap();

        let instance = store.get_instance("inst-1").await.unwrap();
        assert_eq!(instance.current_node_execution_id, second);
        assert_eq!(instance.ctx_json, "{\"x\":1}");

        let log = store.get_node_executions("inst-1").await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].id, first);
        assert_eq!(log[1].id, second);
    }

    #[tokio::test]
    async fn test_stale_head_is_rejected() {
        let store = store().await;
        let first = store
            .save_new_instance("inst-1", "wf", "start_node", "{}", None, None)
            .await
            .unwrap();

        store
            .append_node_execution_and_update_head("inst-1", &first, "a", "{}", None, None)
            .await
            .unwrap();

        // Second transition out of the same execution must lose.
        let err = store
            .append_node_execution_and_update_head("inst-1", &first, "b", "{}", None, None)
            .await
            .unwrap_err();
        assert!(err.is_stale_head());

        // The loser must not have appended a log row.
        let log = store.get_node_executions("inst-1").await.unwrap();
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_instance_is_not_stale() {
        let store = store().await;
        let err = store
            .append_node_execution_and_update_head("ghost", "x", "a", "{}", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InstanceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_waiting_signal_index() {
        let store = store().await;
        store
            .save_new_instance("inst-1", "wf", "start_node", "{}", Some("go"), None)
            .await
            .unwrap();
        store
            .save_new_instance("inst-2", "wf", "start_node", "{}", Some("go"), None)
            .await
            .unwrap();
        store
            .save_new_instance("inst-3", "wf", "start_node", "{}", Some("stop"), None)
            .await
            .unwrap();

        let mut waiting = store.get_instances_waiting_for_signal("go").await.unwrap();
        waiting.sort();
        assert_eq!(waiting, vec!["inst-1", "inst-2"]);

        assert!(store
            .get_instances_waiting_for_signal("")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_expired_instances_fifo() {
        let store = store().await;
        let now = Utc::now();

        store
            .save_new_instance(
                "late",
                "wf",
                "start_node",
                "{}",
                None,
                Some(now - ChronoDuration::seconds(10)),
            )
            .await
            .unwrap();
        store
            .save_new_instance(
                "later",
                "wf",
                "start_node",
                "{}",
                None,
                Some(now - ChronoDuration::seconds(5)),
            )
            .await
            .unwrap();
        store
            .save_new_instance(
                "future",
                "wf",
                "start_node",
                "{}",
                None,
                Some(now + ChronoDuration::seconds(60)),
            )
            .await
            .unwrap();

        let expired = store.get_expired_instances(now).await.unwrap();
        assert_eq!(expired, vec!["late", "later"]);

        let armed = store.get_armed_deadlines().await.unwrap();
        assert_eq!(armed.len(), 3);
        assert_eq!(armed[0].instance_id, "late");
        assert_eq!(armed[2].instance_id, "future");
    }
}
