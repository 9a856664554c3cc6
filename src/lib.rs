//! # Probeflow: Resumable Diagnostic Workflow Engine
//!
//! Probeflow runs graph-defined diagnostic workflows over a mutable run
//! state, checkpointing progress durably so runs survive process restarts,
//! routing between steps with declarative branch rules, and pausing
//! indefinitely for human input without holding a worker.
//!
//! ## Core Concepts
//!
//! - **Workflow graph**: nodes (plugin, decision, aggregation, human) wired
//!   by plain edges and prioritized branch rules, validated at registration
//! - **Run state**: findings, errors, severity, and the execution path of
//!   one run; owned by exactly one run loop at a time
//! - **State store**: durable checkpoints, an append-only transition log,
//!   and session records, in memory or SQLite
//! - **Human-in-loop**: prompt bookkeeping with timeout policies; the
//!   operator and the timer race, first actor wins
//! - **Visualization**: deterministic mermaid / JSON / markdown rendering
//!
//! ## Quick Start
//!
//! ```no_run
//! use async_trait::async_trait;
//! use probeflow::finding::Finding;
//! use probeflow::graph::{WorkflowBuilder, WorkflowRegistry, END};
//! use probeflow::human::HumanInLoopManager;
//! use probeflow::plugin::{DiagnosticContext, PluginError, PluginHandler, PluginOutput};
//! use probeflow::runner::{ExecutionOptions, WorkflowRunner};
//! use probeflow::state::RunState;
//! use probeflow::store::MemoryStore;
//! use std::sync::Arc;
//!
//! struct TlsProbe;
//!
//! #[async_trait]
//! impl PluginHandler for TlsProbe {
//!     async fn run(
//!         &self,
//!         ctx: &DiagnosticContext,
//!         _args: &serde_json::Value,
//!     ) -> Result<PluginOutput, PluginError> {
//!         Ok(PluginOutput::new()
//!             .with_finding(Finding::info("tls", format!("checked {}", ctx.endpoint))))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     let mut registry = WorkflowRegistry::new();
//!     let workflow = registry.create_workflow(
//!         WorkflowBuilder::new("tls-audit", "TLS audit")
//!             .entry_point("probe")
//!             .plugin_node("probe", "Probe endpoint", "tls-probe")
//!             .edge("probe", END)
//!             .register_plugin("tls-probe", TlsProbe),
//!     )?;
//!
//!     let runner = WorkflowRunner::new(Arc::new(MemoryStore::new()), HumanInLoopManager::new());
//!     let report = runner
//!         .execute_workflow(&workflow, RunState::new("api.example.com"), ExecutionOptions::default())
//!         .await?;
//!     assert!(report.success);
//!     Ok(())
//! }
//! ```

pub mod branching;
pub mod config;
pub mod errors;
pub mod event;
pub mod finding;
pub mod graph;
pub mod human;
pub mod persistence;
pub mod plugin;
pub mod runner;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod viz;
