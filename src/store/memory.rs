//! In-memory store for tests and fire-and-forget runs.

use async_trait::async_trait;
use chrono::Utc;
use rustc_hash::FxHashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{Checkpoint, Session, StateStore, StoreError, TransitionRecord};
use crate::persistence::PersistedRunState;
use crate::state::RunState;
use crate::types::{SessionStatus, ThreadId, WorkflowId};

type Key = (WorkflowId, ThreadId);

#[derive(Default)]
struct Shelves {
    checkpoints: FxHashMap<Key, Vec<Checkpoint>>,
    transitions: FxHashMap<Key, Vec<TransitionRecord>>,
    sessions: FxHashMap<Key, Session>,
}

/// Keeps everything behind one mutex; contention is irrelevant at the
/// scale this backend is meant for.
#[derive(Default)]
pub struct MemoryStore {
    shelves: Mutex<Shelves>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(workflow_id: &str, thread_id: &str) -> Key {
        (workflow_id.to_owned(), thread_id.to_owned())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
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
        let mut shelves = self.shelves.lock().expect("store mutex poisoned");
        shelves
            .checkpoints
            .entry(Self::key(workflow_id, thread_id))
            .or_default()
            .push(checkpoint.clone());
        Ok(checkpoint)
    }

    async fn load_checkpoint(&self, checkpoint_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        let shelves = self.shelves.lock().expect("store mutex poisoned");
        Ok(shelves
            .checkpoints
            .values()
            .flatten()
            .find(|c| c.checkpoint_id == checkpoint_id)
            .cloned())
    }

    async fn latest_checkpoint(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError> {
        let shelves = self.shelves.lock().expect("store mutex poisoned");
        Ok(shelves
            .checkpoints
            .get(&Self::key(workflow_id, thread_id))
            .and_then(|list| list.last().cloned()))
    }

    async fn record_transition(&self, transition: TransitionRecord) -> Result<(), StoreError> {
        let mut shelves = self.shelves.lock().expect("store mutex poisoned");
        shelves
            .transitions
            .entry((transition.workflow_id.clone(), transition.thread_id.clone()))
            .or_default()
            .push(transition);
        Ok(())
    }

    async fn transition_history(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Vec<TransitionRecord>, StoreError> {
        let shelves = self.shelves.lock().expect("store mutex poisoned");
        Ok(shelves
            .transitions
            .get(&Self::key(workflow_id, thread_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_session(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Session, StoreError> {
        let mut shelves = self.shelves.lock().expect("store mutex poisoned");
        let now = Utc::now();
        let session = shelves
            .sessions
            .entry(Self::key(workflow_id, thread_id))
            .or_insert_with(|| Session {
                session_id: Uuid::new_v4(),
                workflow_id: workflow_id.to_owned(),
                thread_id: thread_id.to_owned(),
                metadata: serde_json::Value::Null,
                status: SessionStatus::Active,
                created_at: now,
                updated_at: now,
            });
        Ok(session.clone())
    }

    async fn get_session(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let shelves = self.shelves.lock().expect("store mutex poisoned");
        Ok(shelves.sessions.get(&Self::key(workflow_id, thread_id)).cloned())
    }

    async fn update_session_status(
        &self,
        workflow_id: &str,
        thread_id: &str,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        let mut shelves = self.shelves.lock().expect("store mutex poisoned");
        let session = shelves
            .sessions
            .get_mut(&Self::key(workflow_id, thread_id))
            .ok_or_else(|| StoreError::SessionNotFound {
                workflow_id: workflow_id.to_owned(),
                thread_id: thread_id.to_owned(),
            })?;
        if session.status.is_terminal() {
            return Ok(());
        }
        session.status = status;
        session.updated_at = Utc::now();
        Ok(())
    }
}
