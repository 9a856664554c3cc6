use async_trait::async_trait;
use std::sync::Arc;

use probeflow::errors::ErrorEvent;
use probeflow::finding::Finding;
use probeflow::human::HumanInLoopManager;
use probeflow::plugin::{DiagnosticContext, PluginError, PluginHandler, PluginOutput};
use probeflow::runner::WorkflowRunner;
use probeflow::state::RunState;
use probeflow::store::MemoryStore;
use probeflow::types::Severity;

/// Emits a single finding at the configured severity.
pub struct ProbePlugin {
    pub check: &'static str,
    pub severity: Severity,
}

#[async_trait]
impl PluginHandler for ProbePlugin {
    async fn run(
        &self,
        _ctx: &DiagnosticContext,
        _args: &serde_json::Value,
    ) -> Result<PluginOutput, PluginError> {
        Ok(PluginOutput::new().with_finding(Finding::new(
            self.check,
            self.severity,
            format!("{} at {}", self.check, self.severity),
        )))
    }
}

/// Always errors; the run loop must treat this as data, not a crash.
pub struct FailingPlugin;

#[async_trait]
impl PluginHandler for FailingPlugin {
    async fn run(
        &self,
        _ctx: &DiagnosticContext,
        _args: &serde_json::Value,
    ) -> Result<PluginOutput, PluginError> {
        Err(PluginError::Failed("simulated provider outage".into()))
    }
}

/// Succeeds but reports a recoverable error alongside a finding.
pub struct NoisyPlugin;

#[async_trait]
impl PluginHandler for NoisyPlugin {
    async fn run(
        &self,
        _ctx: &DiagnosticContext,
        _args: &serde_json::Value,
    ) -> Result<PluginOutput, PluginError> {
        Ok(PluginOutput::new()
            .with_finding(Finding::info("noisy", "partial result"))
            .with_error(ErrorEvent::run("upstream returned stale data")))
    }
}

/// Copies the run's context parameters into a finding detail so tests can
/// observe what the engine forwarded.
pub struct ContextEchoPlugin;

#[async_trait]
impl PluginHandler for ContextEchoPlugin {
    async fn run(
        &self,
        ctx: &DiagnosticContext,
        _args: &serde_json::Value,
    ) -> Result<PluginOutput, PluginError> {
        Ok(PluginOutput::new().with_finding(
            Finding::info("context", "echoed context params")
                .with_detail("params", ctx.params.clone()),
        ))
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub human: Arc<HumanInLoopManager>,
    pub runner: WorkflowRunner,
}

/// Runner wired to fresh in-memory backends.
pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let human = HumanInLoopManager::new();
    let runner = WorkflowRunner::new(
        Arc::clone(&store) as Arc<dyn probeflow::store::StateStore>,
        Arc::clone(&human),
    );
    Harness {
        store,
        human,
        runner,
    }
}

pub fn seed_state() -> RunState {
    RunState::new("api.example.com")
}
