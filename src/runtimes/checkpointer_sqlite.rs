/*!
SQLite checkpointer.

Durable implementation of the [`Checkpointer`] trait backed by `sqlx`.

## Behavior

- The full checkpoint travels as one JSON payload (see
  `runtimes::persistence`); thread id, sequence, status, timestamps,
  importance, and owner are mirrored into indexed columns for retention
  queries.
- Schema is created idempotently on connect, so the backend is
  self-contained (no external migration orchestration required).
- Per-thread serialization: in addition to the transactional
  `MAX(sequence)+1` assignment, an in-process per-thread lock prevents
  two in-flight runs of the same thread from interleaving writes.
  Distinct threads never contend.
- Unreadable payloads surface as [`CheckpointerError::Corruption`]
  rather than silently starting a fresh thread.

## Maintenance

Storage grows with `threads × checkpoints × state size`. Retention runs
in-process via [`Checkpointer::prune`]; for bulk offline cleanup plain
SQL against the `checkpoints` table works as well (`DELETE ... WHERE
created_at < ...; VACUUM`).
*/

use std::str::FromStr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use rustc_hash::FxHashMap;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::runtimes::checkpointer::{Checkpoint, Checkpointer, CheckpointerError, Result};
use crate::runtimes::persistence::PersistedCheckpoint;
use crate::runtimes::retention::{CheckpointMeta, RetentionPolicy};
use crate::runtimes::types::ThreadStatus;
use crate::state::StateSchema;

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id    TEXT    NOT NULL,
    sequence     INTEGER NOT NULL,
    status       TEXT    NOT NULL,
    created_at   TEXT    NOT NULL,
    importance   REAL    NOT NULL DEFAULT 0,
    owner        TEXT,
    payload_json TEXT    NOT NULL,
    PRIMARY KEY (thread_id, sequence)
)
"#;

const CREATE_OWNER_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_checkpoints_owner ON checkpoints(owner)";

/// Durable SQLite-backed checkpointer.
pub struct SqliteCheckpointer {
    pool: Arc<SqlitePool>,
    /// Current schema used to rebuild live state from payloads.
    schema: Arc<StateSchema>,
    /// Per-thread write locks.
    locks: RwLock<FxHashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for SqliteCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointer").finish()
    }
}

impl SqliteCheckpointer {
    /// Connect to (or create) a SQLite database at `database_url`,
    /// e.g. `sqlite://loomflow.db`.
    #[instrument(skip(database_url, schema), err)]
    pub async fn connect(database_url: &str, schema: Arc<StateSchema>) -> Result<Self> {
        // Ensure the underlying file exists before sqlx opens it.
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.trim();
            if !path.is_empty() && path != ":memory:" {
                let p = std::path::Path::new(path);
                if let Some(parent) = p.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if !p.exists() {
                    let _ = std::fs::File::create_new(p);
                }
            }
        }

        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("connect error: {e}"),
            })?;

        for statement in [CREATE_TABLE_SQL, CREATE_OWNER_INDEX_SQL] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| CheckpointerError::Backend {
                    message: format!("schema setup: {e}"),
                })?;
        }

        Ok(Self {
            pool: Arc::new(pool),
            schema,
            locks: RwLock::new(FxHashMap::default()),
        })
    }

    fn lock_for(&self, thread_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self
            .locks
            .read()
            .expect("locks poisoned")
            .get(thread_id)
        {
            return lock.clone();
        }
        let mut guard = self.locks.write().expect("locks poisoned");
        guard
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn decode_row(&self, row: &SqliteRow) -> Result<Checkpoint> {
        let thread_id: String = row.get("thread_id");
        let payload: String = row.get("payload_json");
        let persisted: PersistedCheckpoint =
            serde_json::from_str(&payload).map_err(|e| CheckpointerError::Corruption {
                thread_id: thread_id.clone(),
                message: format!("payload decode: {e}"),
            })?;
        Ok(persisted.into_checkpoint(self.schema.clone()))
    }

    fn decode_meta(row: &SqliteRow) -> Result<CheckpointMeta> {
        let thread_id: String = row.get("thread_id");
        let status_text: String = row.get("status");
        let status = ThreadStatus::from_str(&status_text).map_err(|message| {
            CheckpointerError::Corruption {
                thread_id: thread_id.clone(),
                message,
            }
        })?;
        let sequence: i64 = row.get("sequence");
        let created_at_text: String = row.get("created_at");
        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_text)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Ok(CheckpointMeta {
            thread_id,
            sequence: sequence as u64,
            created_at,
            importance: row.get("importance"),
            owner: row.get("owner"),
            status,
        })
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    #[instrument(skip(self, checkpoint), err)]
    async fn save(&self, mut checkpoint: Checkpoint) -> Result<u64> {
        let lock = self.lock_for(&checkpoint.thread_id);
        let _guard = lock.lock().await;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("tx begin: {e}"),
            })?;

        let row = sqlx::query(
            "SELECT COALESCE(MAX(sequence), 0) AS last_sequence FROM checkpoints WHERE thread_id = ?1",
        )
        .bind(&checkpoint.thread_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("sequence query: {e}"),
        })?;
        let last_sequence: i64 = row.get("last_sequence");
        checkpoint.sequence = last_sequence as u64 + 1;

        let payload = serde_json::to_string(&PersistedCheckpoint::from(&checkpoint)).map_err(
            |e| CheckpointerError::Other {
                message: format!("payload encode: {e}"),
            },
        )?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints (
                thread_id, sequence, status, created_at, importance, owner, payload_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&checkpoint.thread_id)
        .bind(checkpoint.sequence as i64)
        .bind(checkpoint.status.to_string())
        .bind(checkpoint.created_at.to_rfc3339())
        .bind(checkpoint.importance)
        .bind(&checkpoint.owner)
        .bind(&payload)
        .execute(&mut *tx)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("insert checkpoint: {e}"),
        })?;

        tx.commit().await.map_err(|e| CheckpointerError::Backend {
            message: format!("tx commit: {e}"),
        })?;

        Ok(checkpoint.sequence)
    }

    #[instrument(skip(self), err)]
    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let row_opt = sqlx::query(
            "SELECT thread_id, payload_json FROM checkpoints WHERE thread_id = ?1 \
             ORDER BY sequence DESC LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("select latest: {e}"),
        })?;

        match row_opt {
            Some(row) => Ok(Some(self.decode_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query(
            "SELECT thread_id, payload_json FROM checkpoints WHERE thread_id = ?1 \
             ORDER BY sequence ASC",
        )
        .bind(thread_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("select history: {e}"),
        })?;

        rows.iter().map(|row| self.decode_row(row)).collect()
    }

    #[instrument(skip(self), err)]
    async fn fork(&self, thread_id: &str, new_thread_id: &str) -> Result<Checkpoint> {
        let source = self
            .load_latest(thread_id)
            .await?
            .ok_or_else(|| CheckpointerError::NotFound {
                thread_id: thread_id.to_string(),
            })?;

        let mut forked = source;
        forked.thread_id = new_thread_id.to_string();
        forked.forked_from = Some(thread_id.to_string());
        forked.created_at = Utc::now();
        forked.sequence = 0;

        let sequence = self.save(forked.clone()).await?;
        forked.sequence = sequence;
        Ok(forked)
    }

    async fn delete(&self, thread_id: &str, sequence: u64) -> Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?1 AND sequence = ?2")
            .bind(thread_id)
            .bind(sequence as i64)
            .execute(&*self.pool)
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("delete checkpoint: {e}"),
            })?;
        Ok(())
    }

    #[instrument(skip(self, policy), err)]
    async fn prune(&self, policy: &RetentionPolicy) -> Result<u64> {
        let rows = sqlx::query(
            "SELECT thread_id, sequence, status, created_at, importance, owner FROM checkpoints",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("select metadata: {e}"),
        })?;

        let metas: Vec<CheckpointMeta> = rows
            .iter()
            .map(Self::decode_meta)
            .collect::<Result<Vec<_>>>()?;

        let victims = policy.select_victims(&metas);
        let removed = victims.len() as u64;
        for (thread_id, sequence) in victims {
            self.delete(&thread_id, sequence).await?;
        }
        Ok(removed)
    }

    async fn known_threads(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT thread_id FROM checkpoints ORDER BY thread_id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("select threads: {e}"),
            })?;
        Ok(rows.iter().map(|row| row.get("thread_id")).collect())
    }
}
