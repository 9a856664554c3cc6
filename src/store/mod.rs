//! Durable run state: checkpoints, transition history, sessions.
//!
//! A [`StateStore`] is the only thing standing between a crashed process and
//! a lost run. Checkpoints are full snapshots (latest wins on recovery),
//! transitions are an append-only audit trail, and sessions track run
//! lifecycle per `(workflow, thread)` pair.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::persistence::PersistedRunState;
use crate::state::RunState;
use crate::types::{SessionStatus, ThreadId, TransitionType, WorkflowId};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// One durable snapshot of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub checkpoint_id: Uuid,
    pub workflow_id: WorkflowId,
    pub thread_id: ThreadId,
    pub state: PersistedRunState,
    pub saved_at: DateTime<Utc>,
}

/// One edge traversal in the append-only history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionRecord {
    pub workflow_id: WorkflowId,
    pub thread_id: ThreadId,
    pub from_node: String,
    pub to_node: String,
    pub transition_type: TransitionType,
    /// Time spent executing `from_node` before this transition.
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl TransitionRecord {
    pub fn new(
        workflow_id: &str,
        thread_id: &str,
        from_node: impl Into<String>,
        to_node: impl Into<String>,
        transition_type: TransitionType,
        duration_ms: u64,
    ) -> Self {
        Self {
            workflow_id: workflow_id.to_owned(),
            thread_id: thread_id.to_owned(),
            from_node: from_node.into(),
            to_node: to_node.into(),
            transition_type,
            duration_ms,
            recorded_at: Utc::now(),
        }
    }
}

/// Lifecycle record for one run thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: Uuid,
    pub workflow_id: WorkflowId,
    pub thread_id: ThreadId,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Errors surfaced by store backends.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("no session for workflow '{workflow_id}' thread '{thread_id}'")]
    #[diagnostic(
        code(probeflow::store::session_not_found),
        help("create_session must run before checkpoints or transitions are recorded")
    )]
    SessionNotFound {
        workflow_id: WorkflowId,
        thread_id: ThreadId,
    },

    #[error("checkpoint schema version {found} is newer than supported {supported}")]
    #[diagnostic(
        code(probeflow::store::schema_too_new),
        help("upgrade this binary before resuming runs written by a newer build")
    )]
    SchemaTooNew { found: u32, supported: u32 },

    #[error("stored value '{value}' in column '{column}' is not a valid uuid")]
    #[diagnostic(
        code(probeflow::store::corrupt_id),
        help("the row was written by something other than this crate, or the file is damaged")
    )]
    CorruptId {
        column: &'static str,
        value: String,
    },

    #[error("snapshot serialization failed")]
    #[diagnostic(code(probeflow::store::serde))]
    Serde(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("sqlite backend error")]
    #[diagnostic(code(probeflow::store::sqlite))]
    Sqlite(#[from] sqlx::Error),
}

/// Durable persistence backend for workflow runs.
///
/// Implementations must keep transitions append-only and treat
/// `update_session_status` on an already-terminal session as a no-op.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Snapshot the full run state. Returns the stored checkpoint.
    async fn save_checkpoint(
        &self,
        workflow_id: &str,
        thread_id: &str,
        state: &RunState,
    ) -> Result<Checkpoint, StoreError>;

    /// Retrieve one checkpoint by its id, if it exists.
    async fn load_checkpoint(&self, checkpoint_id: Uuid) -> Result<Option<Checkpoint>, StoreError>;

    /// Most recent checkpoint for the pair, if any. This is the crash
    /// recovery path; by-id lookup is [`StateStore::load_checkpoint`].
    async fn latest_checkpoint(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError>;

    /// Append one transition to the history.
    async fn record_transition(&self, transition: TransitionRecord) -> Result<(), StoreError>;

    /// Full transition history for the pair, oldest first.
    async fn transition_history(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Vec<TransitionRecord>, StoreError>;

    /// Register a new active session. Re-creating an existing session
    /// returns the stored record untouched.
    async fn create_session(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Session, StoreError>;

    async fn get_session(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Option<Session>, StoreError>;

    /// Move a session to a new status. Terminal sessions stay terminal.
    async fn update_session_status(
        &self,
        workflow_id: &str,
        thread_id: &str,
        status: SessionStatus,
    ) -> Result<(), StoreError>;

    /// Release the underlying storage handle. Calling this twice is a
    /// no-op, not an error.
    async fn close(&self) {}
}

/// Rehydrate live state from the latest checkpoint, refusing snapshots
/// written by a newer schema.
pub async fn recover_state(
    store: &dyn StateStore,
    workflow_id: &str,
    thread_id: &str,
) -> Result<Option<RunState>, StoreError> {
    let Some(checkpoint) = store.latest_checkpoint(workflow_id, thread_id).await? else {
        return Ok(None);
    };
    if checkpoint.state.is_future_schema() {
        return Err(StoreError::SchemaTooNew {
            found: checkpoint.state.schema_version,
            supported: crate::persistence::SCHEMA_VERSION,
        });
    }
    Ok(Some(checkpoint.state.into()))
}
