//! Human-in-loop pauses: prompt bookkeeping, resume validation, timeouts.
//!
//! When a run reaches a human node, the runner parks the state in the store
//! and registers a [`PendingPrompt`] here. A run resumes through exactly one
//! of two doors: an operator answering the prompt, or the timeout firing.
//! First actor wins; the loser observes the prompt already gone and backs
//! off. That race is decided by prompt removal under the manager's mutex.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::types::{NodeId, ThreadId, WorkflowId};

/// What a timeout does to a still-pending prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Resume the run as if the operator answered with `default_response`.
    Continue { default_response: Value },
    /// Abort the run.
    Abort,
}

/// A prompt issued by a human node, as handed to operators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingPrompt {
    pub prompt_id: Uuid,
    pub workflow_id: WorkflowId,
    pub thread_id: ThreadId,
    pub node: NodeId,
    pub message: String,
    pub issued_at: DateTime<Utc>,
    pub timeout: Option<Duration>,
    pub timeout_policy: TimeoutPolicy,
}

/// The action a fired timeout resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutAction {
    /// Resume with this response.
    Resume { default_response: Value },
    /// Abort the run.
    Abort,
}

#[derive(Debug, Error, Diagnostic)]
pub enum HumanError {
    #[error("workflow '{workflow_id}' thread '{thread_id}' is already paused at '{node}'")]
    #[diagnostic(
        code(probeflow::human::already_paused),
        help("resume or cancel the existing prompt before pausing again")
    )]
    AlreadyPaused {
        workflow_id: WorkflowId,
        thread_id: ThreadId,
        node: NodeId,
    },

    #[error("workflow '{workflow_id}' thread '{thread_id}' is not paused")]
    #[diagnostic(code(probeflow::human::not_paused))]
    NotPaused {
        workflow_id: WorkflowId,
        thread_id: ThreadId,
    },

    #[error("prompt id mismatch: expected {expected}, got {got}")]
    #[diagnostic(
        code(probeflow::human::prompt_mismatch),
        help("the prompt was reissued or already answered; fetch the current prompt id")
    )]
    PromptMismatch { expected: Uuid, got: Uuid },
}

type Key = (WorkflowId, ThreadId);

/// Tracks every paused run in this process.
#[derive(Default)]
pub struct HumanInLoopManager {
    pending: Mutex<FxHashMap<Key, PendingPrompt>>,
}

impl HumanInLoopManager {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn key(workflow_id: &str, thread_id: &str) -> Key {
        (workflow_id.to_owned(), thread_id.to_owned())
    }

    /// Register a pause. Rejected when the pair is already paused.
    #[instrument(skip(self, message, timeout_policy), err)]
    pub fn pause_workflow(
        &self,
        workflow_id: &str,
        thread_id: &str,
        node: &str,
        message: impl Into<String>,
        timeout: Option<Duration>,
        timeout_policy: TimeoutPolicy,
    ) -> Result<PendingPrompt, HumanError> {
        let mut pending = self.pending.lock().expect("prompt mutex poisoned");
        let key = Self::key(workflow_id, thread_id);
        if let Some(existing) = pending.get(&key) {
            return Err(HumanError::AlreadyPaused {
                workflow_id: existing.workflow_id.clone(),
                thread_id: existing.thread_id.clone(),
                node: existing.node.clone(),
            });
        }
        let prompt = PendingPrompt {
            prompt_id: Uuid::new_v4(),
            workflow_id: workflow_id.to_owned(),
            thread_id: thread_id.to_owned(),
            node: node.to_owned(),
            message: message.into(),
            issued_at: Utc::now(),
            timeout,
            timeout_policy,
        };
        pending.insert(key, prompt.clone());
        Ok(prompt)
    }

    #[must_use]
    pub fn is_workflow_paused(&self, workflow_id: &str, thread_id: &str) -> bool {
        self.pending
            .lock()
            .expect("prompt mutex poisoned")
            .contains_key(&Self::key(workflow_id, thread_id))
    }

    /// Current prompt for a paused pair, if any.
    #[must_use]
    pub fn pending_prompt(&self, workflow_id: &str, thread_id: &str) -> Option<PendingPrompt> {
        self.pending
            .lock()
            .expect("prompt mutex poisoned")
            .get(&Self::key(workflow_id, thread_id))
            .cloned()
    }

    /// Accept an operator response. Removes the prompt, so a later timeout
    /// for the same prompt becomes a no-op.
    #[instrument(skip(self, response), err)]
    pub fn resume_workflow(
        &self,
        workflow_id: &str,
        thread_id: &str,
        prompt_id: Uuid,
        response: Value,
    ) -> Result<Value, HumanError> {
        let mut pending = self.pending.lock().expect("prompt mutex poisoned");
        let key = Self::key(workflow_id, thread_id);
        let Some(prompt) = pending.get(&key) else {
            return Err(HumanError::NotPaused {
                workflow_id: workflow_id.to_owned(),
                thread_id: thread_id.to_owned(),
            });
        };
        if prompt.prompt_id != prompt_id {
            return Err(HumanError::PromptMismatch {
                expected: prompt.prompt_id,
                got: prompt_id,
            });
        }
        pending.remove(&key);
        Ok(response)
    }

    /// Resolve a fired timeout. Returns `None` when an operator already
    /// answered (or the prompt was reissued), meaning the timeout lost the
    /// race and must do nothing.
    #[instrument(skip(self))]
    pub fn handle_timeout(
        &self,
        workflow_id: &str,
        thread_id: &str,
        prompt_id: Uuid,
    ) -> Option<TimeoutAction> {
        let mut pending = self.pending.lock().expect("prompt mutex poisoned");
        let key = Self::key(workflow_id, thread_id);
        let prompt = pending.get(&key)?;
        if prompt.prompt_id != prompt_id {
            return None;
        }
        let prompt = pending.remove(&key)?;
        tracing::warn!(node = %prompt.node, "human prompt timed out");
        Some(match prompt.timeout_policy {
            TimeoutPolicy::Continue { default_response } => TimeoutAction::Resume {
                default_response,
            },
            TimeoutPolicy::Abort => TimeoutAction::Abort,
        })
    }

    /// Sleep out the prompt's timeout on the current task, then resolve it.
    ///
    /// The runner spawns this for every pause that carries a timeout; call
    /// it directly only for custom supervision. Resolves to `None`
    /// immediately when the prompt carries no timeout, and to `None` after
    /// the sleep when the operator won.
    pub async fn watch_timeout(self: Arc<Self>, prompt: PendingPrompt) -> Option<TimeoutAction> {
        let timeout = prompt.timeout?;
        tokio::time::sleep(timeout).await;
        self.handle_timeout(&prompt.workflow_id, &prompt.thread_id, prompt.prompt_id)
    }

    /// Drop any pending prompt for the pair. Used when a run aborts.
    pub fn cleanup(&self, workflow_id: &str, thread_id: &str) {
        self.pending
            .lock()
            .expect("prompt mutex poisoned")
            .remove(&Self::key(workflow_id, thread_id));
    }

    /// Drop every pending prompt. Used at shutdown; any armed
    /// `watch_timeout` tasks resolve to `None` when they fire.
    pub fn cleanup_all(&self) {
        self.pending.lock().expect("prompt mutex poisoned").clear();
    }
}
