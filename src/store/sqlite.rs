//! SQLite-backed [`StateStore`].
//!
//! Schema bootstrap runs on connect with `CREATE TABLE IF NOT EXISTS`, so a
//! fresh database file is ready without external migration tooling. Run
//! state is stored as a JSON column (see `persistence`); timestamps are
//! RFC 3339 text handled through sqlx's chrono support.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

use super::{Checkpoint, Session, StateStore, StoreError, TransitionRecord};
use crate::persistence::PersistedRunState;
use crate::state::RunState;
use crate::types::{SessionStatus, TransitionType};

const BOOTSTRAP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id  TEXT NOT NULL,
    workflow_id TEXT NOT NULL,
    thread_id   TEXT NOT NULL,
    metadata    TEXT NOT NULL DEFAULT 'null',
    status      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (workflow_id, thread_id)
);

CREATE TABLE IF NOT EXISTS checkpoints (
    checkpoint_id TEXT PRIMARY KEY,
    workflow_id   TEXT NOT NULL,
    thread_id     TEXT NOT NULL,
    state_json    TEXT NOT NULL,
    saved_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_thread
    ON checkpoints (workflow_id, thread_id, saved_at);

CREATE TABLE IF NOT EXISTS transitions (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id     TEXT NOT NULL,
    thread_id       TEXT NOT NULL,
    from_node       TEXT NOT NULL,
    to_node         TEXT NOT NULL,
    transition_type TEXT NOT NULL,
    duration_ms     INTEGER NOT NULL DEFAULT 0,
    recorded_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transitions_thread
    ON transitions (workflow_id, thread_id, seq);
"#;

/// Durable store over a shared `SqlitePool`.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

impl SqliteStore {
    /// Connect to (or create) the database at `database_url` and bootstrap
    /// the schema. Example URL: `sqlite://probeflow.db`.
    #[must_use = "store must be used to persist state"]
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(BOOTSTRAP_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    fn parse_uuid(row: &SqliteRow, column: &'static str) -> Result<Uuid, StoreError> {
        let value: String = row.get(column);
        Uuid::parse_str(&value).map_err(|_| StoreError::CorruptId { column, value })
    }

    fn row_to_checkpoint(row: &SqliteRow) -> Result<Checkpoint, StoreError> {
        let state: PersistedRunState = serde_json::from_str(row.get("state_json"))?;
        Ok(Checkpoint {
            checkpoint_id: Self::parse_uuid(row, "checkpoint_id")?,
            workflow_id: row.get("workflow_id"),
            thread_id: row.get("thread_id"),
            state,
            saved_at: row.get::<DateTime<Utc>, _>("saved_at"),
        })
    }

    fn row_to_session(row: &SqliteRow) -> Result<Session, StoreError> {
        Ok(Session {
            session_id: Self::parse_uuid(row, "session_id")?,
            workflow_id: row.get("workflow_id"),
            thread_id: row.get("thread_id"),
            metadata: serde_json::from_str(row.get("metadata"))?,
            status: SessionStatus::decode(row.get("status")),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        })
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    #[instrument(skip(self, state), err)]
    async fn save_checkpoint(
        &self,
        workflow_id: &str,
        thread_id: &str,
        state: &RunState,
    ) -> Result<Checkpoint, StoreError> {
        let checkpoint = Checkpoint {
            checkpoint_id: Uuid::new_v4(),
            workflow_id: workflow_id.to_owned(),
            thread_id: thread_id.to_owned(),
            state: PersistedRunState::snapshot(state),
            saved_at: Utc::now(),
        };
        let state_json = serde_json::to_string(&checkpoint.state)?;
        sqlx::query(
            r#"
            INSERT INTO checkpoints (checkpoint_id, workflow_id, thread_id, state_json, saved_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(checkpoint.checkpoint_id.to_string())
        .bind(workflow_id)
        .bind(thread_id)
        .bind(state_json)
        .bind(checkpoint.saved_at)
        .execute(&self.pool)
        .await?;
        Ok(checkpoint)
    }

    #[instrument(skip(self), err)]
    async fn load_checkpoint(&self, checkpoint_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT checkpoint_id, workflow_id, thread_id, state_json, saved_at
            FROM checkpoints
            WHERE checkpoint_id = ?1
            "#,
        )
        .bind(checkpoint_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    #[instrument(skip(self), err)]
    async fn latest_checkpoint(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT checkpoint_id, workflow_id, thread_id, state_json, saved_at
            FROM checkpoints
            WHERE workflow_id = ?1 AND thread_id = ?2
            ORDER BY saved_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(workflow_id)
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    async fn record_transition(&self, transition: TransitionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transitions
                (workflow_id, thread_id, from_node, to_node, transition_type, duration_ms, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&transition.workflow_id)
        .bind(&transition.thread_id)
        .bind(&transition.from_node)
        .bind(&transition.to_node)
        .bind(transition.transition_type.encode())
        .bind(transition.duration_ms as i64)
        .bind(transition.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition_history(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Vec<TransitionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT workflow_id, thread_id, from_node, to_node, transition_type, duration_ms, recorded_at
            FROM transitions
            WHERE workflow_id = ?1 AND thread_id = ?2
            ORDER BY seq ASC
            "#,
        )
        .bind(workflow_id)
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| TransitionRecord {
                workflow_id: row.get("workflow_id"),
                thread_id: row.get("thread_id"),
                from_node: row.get("from_node"),
                to_node: row.get("to_node"),
                transition_type: TransitionType::decode(row.get("transition_type")),
                duration_ms: row.get::<i64, _>("duration_ms") as u64,
                recorded_at: row.get::<DateTime<Utc>, _>("recorded_at"),
            })
            .collect())
    }

    #[instrument(skip(self), err)]
    async fn create_session(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Session, StoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO sessions
                (session_id, workflow_id, thread_id, metadata, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'null', ?4, ?5, ?5)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(workflow_id)
        .bind(thread_id)
        .bind(SessionStatus::Active.encode())
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.get_session(workflow_id, thread_id)
            .await?
            .ok_or_else(|| StoreError::SessionNotFound {
                workflow_id: workflow_id.to_owned(),
                thread_id: thread_id.to_owned(),
            })
    }

    async fn get_session(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT session_id, workflow_id, thread_id, metadata, status, created_at, updated_at
            FROM sessions
            WHERE workflow_id = ?1 AND thread_id = ?2
            "#,
        )
        .bind(workflow_id)
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_session).transpose()
    }

    #[instrument(skip(self), err)]
    async fn update_session_status(
        &self,
        workflow_id: &str,
        thread_id: &str,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        let current = self.get_session(workflow_id, thread_id).await?.ok_or_else(|| {
            StoreError::SessionNotFound {
                workflow_id: workflow_id.to_owned(),
                thread_id: thread_id.to_owned(),
            }
        })?;
        if current.status.is_terminal() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE sessions SET status = ?3, updated_at = ?4
            WHERE workflow_id = ?1 AND thread_id = ?2
            "#,
        )
        .bind(workflow_id)
        .bind(thread_id)
        .bind(status.encode())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close(&self) {
        // SqlitePool::close is idempotent
        self.pool.close().await;
    }
}
