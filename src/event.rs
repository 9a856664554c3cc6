//! Run lifecycle events.
//!
//! The runner emits a [`WorkflowEvent`] at every observable step of a run.
//! Events flow over a flume channel so listeners never block execution; the
//! bus drains them into [`EventSink`] implementations on a background task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::errors::ErrorEvent;
use crate::types::{NodeId, Severity, ThreadId, WorkflowId};

/// What happened during a run step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    NodeStarted {
        node: NodeId,
    },
    NodeCompleted {
        node: NodeId,
        elapsed_ms: u64,
        severity: Severity,
    },
    Transition {
        from: NodeId,
        to: NodeId,
        branch_id: Option<String>,
    },
    Paused {
        node: NodeId,
        prompt_id: String,
    },
    Resumed {
        node: NodeId,
        response: Value,
    },
    LoopBreak {
        node: NodeId,
        visits: u32,
    },
    Completed {
        severity: Severity,
    },
    ErrorRecorded {
        error: ErrorEvent,
    },
}

/// A timestamped lifecycle event, scoped to one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowEvent {
    pub workflow_id: WorkflowId,
    pub thread_id: ThreadId,
    pub when: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl WorkflowEvent {
    pub fn now(workflow_id: &str, thread_id: &str, kind: EventKind) -> Self {
        Self {
            workflow_id: workflow_id.to_owned(),
            thread_id: thread_id.to_owned(),
            when: Utc::now(),
            kind,
        }
    }
}

/// Destination for drained events.
pub trait EventSink: Send + Sync {
    fn accept(&self, event: &WorkflowEvent);
}

/// Forwards events to the `tracing` subscriber at info level.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn accept(&self, event: &WorkflowEvent) {
        tracing::info!(
            workflow = %event.workflow_id,
            thread = %event.thread_id,
            kind = ?event.kind,
            "workflow event"
        );
    }
}

/// Buffers events in memory. Intended for tests and reports.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn drained(&self) -> Vec<WorkflowEvent> {
        self.events.lock().expect("sink mutex poisoned").clone()
    }
}

impl EventSink for Arc<MemorySink> {
    fn accept(&self, event: &WorkflowEvent) {
        self.events
            .lock()
            .expect("sink mutex poisoned")
            .push(event.clone());
    }
}

/// Cloneable handle the runner uses to publish events.
#[derive(Clone)]
pub struct EventEmitter {
    sender: flume::Sender<WorkflowEvent>,
}

impl EventEmitter {
    /// Send without blocking; a full or closed channel drops the event
    /// rather than stalling the run.
    pub fn emit(&self, event: WorkflowEvent) {
        let _ = self.sender.try_send(event);
    }

    /// Emitter wired to nothing. Useful when a caller opts out of events.
    #[must_use]
    pub fn disconnected() -> Self {
        let (sender, _) = flume::bounded(0);
        Self { sender }
    }
}

/// Owns the channel and the sinks draining it.
pub struct EventBus {
    sender: flume::Sender<WorkflowEvent>,
    receiver: flume::Receiver<WorkflowEvent>,
    sinks: Vec<Box<dyn EventSink>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(vec![Box::new(TracingSink)])
    }
}

impl EventBus {
    #[must_use]
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            sender,
            receiver,
            sinks,
        }
    }

    #[must_use]
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter {
            sender: self.sender.clone(),
        }
    }

    /// Drain events into the sinks until every emitter is dropped.
    ///
    /// Spawn this on its own task; it finishes when the channel closes.
    pub async fn run(self) {
        let Self {
            sender,
            receiver,
            sinks,
        } = self;
        drop(sender);
        while let Ok(event) = receiver.recv_async().await {
            for sink in &sinks {
                sink.accept(&event);
            }
        }
    }
}
