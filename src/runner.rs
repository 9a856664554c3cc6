//! Run loop orchestration.
//!
//! [`WorkflowRunner`] drives a compiled workflow over one [`RunState`]:
//! invoke the current node's handler, merge its output, route to the next
//! node, persist a checkpoint and a transition record, repeat until the END
//! sentinel, a detected loop, or a human pause. A paused run returns
//! immediately; no task blocks waiting for a person. Pausing with a timeout
//! arms a background timer that resolves the prompt per its policy unless an
//! operator answers first. Resume re-enters the same loop from the latest
//! checkpoint.

use miette::Diagnostic;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::branching::{evaluate_branches, LoopPolicy, LoopReport, RoutingError};
use crate::errors::ErrorEvent;
use crate::event::{EventEmitter, EventKind, WorkflowEvent};
use crate::graph::{CompiledWorkflow, NodeKind, NodeSpec, END};
use crate::human::{HumanError, HumanInLoopManager, PendingPrompt, TimeoutAction, TimeoutPolicy};
use crate::plugin::DiagnosticContext;
use crate::state::RunState;
use crate::store::{recover_state, StateStore, StoreError, TransitionRecord};
use crate::types::{SessionStatus, ThreadId, TransitionType};

/// Per-run options.
#[derive(Clone, Debug)]
pub struct ExecutionOptions {
    /// Thread id for the run; a fresh UUID when absent.
    pub thread_id: Option<ThreadId>,
    /// Extra parameters forwarded to plugin handlers via the context.
    pub context_params: Value,
    /// Timeout armed when the run pauses at a human node.
    pub human_timeout: Option<Duration>,
    /// What an unanswered prompt resolves to.
    pub timeout_policy: TimeoutPolicy,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            thread_id: None,
            context_params: Value::Null,
            human_timeout: None,
            timeout_policy: TimeoutPolicy::Abort,
        }
    }
}

/// Outcome of an execute or resume call.
#[derive(Clone, Debug)]
pub struct ExecutionReport {
    /// False only when the run was aborted.
    pub success: bool,
    pub thread_id: ThreadId,
    pub final_state: RunState,
    /// Recoverable errors observed during the run, in order.
    pub errors: Vec<ErrorEvent>,
    /// Set when the run is suspended at a human node.
    pub prompt: Option<PendingPrompt>,
    /// Set when loop protection halted the run.
    pub loop_break: Option<LoopReport>,
}

impl ExecutionReport {
    /// True while the run waits for a human response.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.prompt.is_some()
    }
}

/// Fatal run failures. Recoverable node errors never surface here; they are
/// folded into the state's error log instead.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    #[error("node '{node}' is referenced during execution but not defined")]
    #[diagnostic(code(probeflow::runner::unknown_node))]
    UnknownNode { node: String },

    #[error("plugin '{plugin_id}' has no registered handler")]
    #[diagnostic(code(probeflow::runner::missing_handler))]
    MissingHandler { plugin_id: String },

    #[error("thread '{thread_id}' is {status}, not resumable")]
    #[diagnostic(
        code(probeflow::runner::session_terminal),
        help("terminal runs reject resumes and timeouts; start a new thread instead")
    )]
    SessionTerminal {
        thread_id: ThreadId,
        status: SessionStatus,
    },

    #[error("thread '{thread_id}' has no recoverable state awaiting input")]
    #[diagnostic(code(probeflow::runner::not_awaiting_input))]
    NotAwaitingInput { thread_id: ThreadId },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Human(#[from] HumanError),
}

/// Drives workflow runs against a store, a human-in-loop manager, and an
/// event emitter. One runner serves many concurrent runs; all per-run state
/// lives in the [`RunState`] each loop owns. Cloning shares the backends.
#[derive(Clone)]
pub struct WorkflowRunner {
    store: Arc<dyn StateStore>,
    human: Arc<HumanInLoopManager>,
    emitter: EventEmitter,
    loop_policy: LoopPolicy,
}

impl WorkflowRunner {
    pub fn new(store: Arc<dyn StateStore>, human: Arc<HumanInLoopManager>) -> Self {
        Self {
            store,
            human,
            emitter: EventEmitter::disconnected(),
            loop_policy: LoopPolicy::default(),
        }
    }

    /// Build a runner with the store the config names.
    pub async fn from_config(config: &crate::config::RuntimeConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn StateStore> = match config.store {
            crate::config::StoreType::InMemory => Arc::new(crate::store::MemoryStore::new()),
            #[cfg(feature = "sqlite")]
            crate::config::StoreType::Sqlite => {
                Arc::new(crate::store::SqliteStore::connect(&config.sqlite_url()).await?)
            }
        };
        Ok(Self::new(store, HumanInLoopManager::new()).with_loop_policy(config.loop_policy))
    }

    #[must_use]
    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    #[must_use]
    pub fn with_loop_policy(mut self, policy: LoopPolicy) -> Self {
        self.loop_policy = policy;
        self
    }

    /// Start a run at the workflow's entry point.
    #[instrument(skip(self, workflow, initial_state, options), fields(workflow = %workflow.id()))]
    pub async fn execute_workflow(
        &self,
        workflow: &Arc<CompiledWorkflow>,
        initial_state: RunState,
        options: ExecutionOptions,
    ) -> Result<ExecutionReport, RunnerError> {
        let thread_id = options
            .thread_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.store.create_session(workflow.id(), &thread_id).await?;

        let mut state = initial_state;
        state.current_node = workflow.entry_point().clone();
        self.run_loop(workflow, state, thread_id, &options).await
    }

    /// Resume a paused run with an operator response.
    ///
    /// Validates the prompt id against the pending prompt, rehydrates state
    /// from the latest checkpoint, and re-enters the run loop from the node
    /// after the human node. `options` govern the rest of the run; pass the
    /// options the run started with to keep its context parameters and
    /// timeout settings.
    #[instrument(skip(self, workflow, response, options), fields(workflow = %workflow.id()))]
    pub async fn resume_workflow(
        &self,
        workflow: &Arc<CompiledWorkflow>,
        thread_id: &str,
        prompt_id: Uuid,
        response: Value,
        options: ExecutionOptions,
    ) -> Result<ExecutionReport, RunnerError> {
        self.check_session_active(workflow, thread_id).await?;
        let response = self
            .human
            .resume_workflow(workflow.id(), thread_id, prompt_id, response)?;
        self.continue_from_pause(workflow, thread_id, response, None, &options)
            .await
    }

    /// Apply a fired timeout to a paused run.
    ///
    /// The action comes out of [`HumanInLoopManager::watch_timeout`]; by the
    /// time this is called the prompt is already gone, so an operator can no
    /// longer race us. Runs paused with a timeout invoke this themselves
    /// through the supervision task armed at pause time.
    #[instrument(skip(self, workflow, action, options), fields(workflow = %workflow.id()))]
    pub async fn resolve_timeout(
        &self,
        workflow: &Arc<CompiledWorkflow>,
        thread_id: &str,
        action: TimeoutAction,
        options: ExecutionOptions,
    ) -> Result<ExecutionReport, RunnerError> {
        self.check_session_active(workflow, thread_id).await?;
        match action {
            TimeoutAction::Resume { default_response } => {
                let node = self
                    .recover_paused_state(workflow, thread_id)
                    .await?
                    .current_node
                    .clone();
                let timeout_error = ErrorEvent::timeout(node, "prompt expired, continuing with default response");
                self.continue_from_pause(
                    workflow,
                    thread_id,
                    default_response,
                    Some(timeout_error),
                    &options,
                )
                .await
            }
            TimeoutAction::Abort => self.abort_workflow(workflow, thread_id).await,
        }
    }

    /// Mark a run aborted and drop any pending prompt.
    #[instrument(skip(self, workflow), fields(workflow = %workflow.id()))]
    pub async fn abort_workflow(
        &self,
        workflow: &CompiledWorkflow,
        thread_id: &str,
    ) -> Result<ExecutionReport, RunnerError> {
        self.human.cleanup(workflow.id(), thread_id);
        let mut state = recover_state(self.store.as_ref(), workflow.id(), thread_id)
            .await?
            .unwrap_or_default();
        state.awaiting_user_input = false;
        state.record_error(ErrorEvent::run("run aborted"));
        if workflow.definition.checkpointing_enabled {
            self.store
                .save_checkpoint(workflow.id(), thread_id, &state)
                .await?;
        }
        self.store
            .update_session_status(workflow.id(), thread_id, SessionStatus::Aborted)
            .await?;
        Ok(ExecutionReport {
            success: false,
            thread_id: thread_id.to_owned(),
            errors: state.errors.clone(),
            final_state: state,
            prompt: None,
            loop_break: None,
        })
    }

    async fn check_session_active(
        &self,
        workflow: &CompiledWorkflow,
        thread_id: &str,
    ) -> Result<(), RunnerError> {
        if let Some(session) = self.store.get_session(workflow.id(), thread_id).await? {
            if session.status.is_terminal() {
                return Err(RunnerError::SessionTerminal {
                    thread_id: thread_id.to_owned(),
                    status: session.status,
                });
            }
        }
        Ok(())
    }

    async fn recover_paused_state(
        &self,
        workflow: &CompiledWorkflow,
        thread_id: &str,
    ) -> Result<RunState, RunnerError> {
        let state = recover_state(self.store.as_ref(), workflow.id(), thread_id)
            .await?
            .filter(|s| s.awaiting_user_input)
            .ok_or_else(|| RunnerError::NotAwaitingInput {
                thread_id: thread_id.to_owned(),
            })?;
        Ok(state)
    }

    async fn continue_from_pause(
        &self,
        workflow: &Arc<CompiledWorkflow>,
        thread_id: &str,
        response: Value,
        timeout_error: Option<ErrorEvent>,
        options: &ExecutionOptions,
    ) -> Result<ExecutionReport, RunnerError> {
        let mut state = self.recover_paused_state(workflow, thread_id).await?;
        let human_node = state.current_node.clone();
        let spec = workflow
            .node(&human_node)
            .ok_or_else(|| RunnerError::UnknownNode {
                node: human_node.clone(),
            })?;

        state.awaiting_user_input = false;
        state.user_response = Some(response.clone());
        if let Some(error) = timeout_error {
            state.record_error(error.clone());
            self.emit(workflow, thread_id, EventKind::ErrorRecorded { error });
        }
        state.record_visit(&human_node, &spec.name, 0);
        self.emit(
            workflow,
            thread_id,
            EventKind::Resumed {
                node: human_node.clone(),
                response,
            },
        );

        let next = self.route(workflow, &state, thread_id, &human_node, 0).await?;
        state.current_node = next;
        self.run_loop(workflow, state, thread_id.to_owned(), options)
            .await
    }

    /// Execute, merge, route, persist, advance.
    async fn run_loop(
        &self,
        workflow: &Arc<CompiledWorkflow>,
        mut state: RunState,
        thread_id: ThreadId,
        options: &ExecutionOptions,
    ) -> Result<ExecutionReport, RunnerError> {
        let context = DiagnosticContext::new(&state.endpoint)
            .with_params(options.context_params.clone());

        loop {
            let current = state.current_node.clone();
            if current == END {
                return self.finish(workflow, &thread_id, state, None).await;
            }
            let spec = workflow
                .node(&current)
                .ok_or_else(|| RunnerError::UnknownNode {
                    node: current.clone(),
                })?
                .clone();

            self.emit(
                workflow,
                &thread_id,
                EventKind::NodeStarted {
                    node: current.clone(),
                },
            );
            let started = Instant::now();

            match &spec.kind {
                NodeKind::Plugin { plugin_id, args } => {
                    self.run_plugin(workflow, &thread_id, &mut state, &context, plugin_id, args)
                        .await?;
                }
                NodeKind::Decision | NodeKind::Aggregation => {
                    // routing-only nodes; the merge step is a no-op
                }
                NodeKind::Human => {
                    return self
                        .pause_at(workflow, &thread_id, state, &spec, options)
                        .await;
                }
            }

            let elapsed_ms = started.elapsed().as_millis() as u64;
            state.record_visit(&current, &spec.name, elapsed_ms);
            self.emit(
                workflow,
                &thread_id,
                EventKind::NodeCompleted {
                    node: current.clone(),
                    elapsed_ms,
                    severity: state.severity,
                },
            );

            if let Some(report) = self.loop_policy.detect_loop(&state) {
                return self
                    .break_loop(workflow, &thread_id, state, report, elapsed_ms)
                    .await;
            }

            let next = self
                .route(workflow, &state, &thread_id, &current, elapsed_ms)
                .await?;
            state.current_node = next;
        }
    }

    async fn run_plugin(
        &self,
        workflow: &CompiledWorkflow,
        thread_id: &str,
        state: &mut RunState,
        context: &DiagnosticContext,
        plugin_id: &str,
        args: &Value,
    ) -> Result<(), RunnerError> {
        let handler = workflow
            .handler(plugin_id)
            .ok_or_else(|| RunnerError::MissingHandler {
                plugin_id: plugin_id.to_owned(),
            })?;
        match handler.run(context, args).await {
            Ok(output) => {
                for finding in output.findings {
                    state.record_finding(finding);
                }
                for error in output.errors {
                    self.emit(
                        workflow,
                        thread_id,
                        EventKind::ErrorRecorded {
                            error: error.clone(),
                        },
                    );
                    state.record_error(error);
                }
            }
            Err(plugin_error) => {
                // handler failure is data, not a crash; the run keeps going
                let error = ErrorEvent::node(state.current_node.clone(), plugin_error.to_string())
                    .with_tag(plugin_id);
                tracing::warn!(plugin = plugin_id, %plugin_error, "plugin handler failed");
                self.emit(
                    workflow,
                    thread_id,
                    EventKind::ErrorRecorded {
                        error: error.clone(),
                    },
                );
                state.record_error(error);
            }
        }
        Ok(())
    }

    /// Decide the next node: branches when declared, otherwise the first
    /// plain edge, otherwise END. Persists the transition and a checkpoint.
    async fn route(
        &self,
        workflow: &CompiledWorkflow,
        state: &RunState,
        thread_id: &str,
        current: &str,
        elapsed_ms: u64,
    ) -> Result<String, RunnerError> {
        let (next, transition_type, branch_id) = match workflow.branches_for(current) {
            Some(branches) => {
                let node = current.to_owned();
                let decision = match evaluate_branches(&node, state, branches) {
                    Ok(decision) => decision,
                    Err(routing) => {
                        // unroutable state is fatal for this run
                        self.store
                            .update_session_status(
                                workflow.id(),
                                thread_id,
                                SessionStatus::Aborted,
                            )
                            .await?;
                        return Err(routing.into());
                    }
                };
                (decision.target, TransitionType::Branch, Some(decision.branch_id))
            }
            None => {
                let target = workflow
                    .edges_from(current)
                    .next()
                    .map(|edge| edge.to.clone())
                    .unwrap_or_else(|| END.to_string());
                (target, TransitionType::Normal, None)
            }
        };

        self.persist_step(workflow, thread_id, state, current, &next, transition_type, elapsed_ms)
            .await?;
        self.emit(
            workflow,
            thread_id,
            EventKind::Transition {
                from: current.to_owned(),
                to: next.clone(),
                branch_id,
            },
        );
        Ok(next)
    }

    async fn persist_step(
        &self,
        workflow: &CompiledWorkflow,
        thread_id: &str,
        state: &RunState,
        from: &str,
        to: &str,
        transition_type: TransitionType,
        duration_ms: u64,
    ) -> Result<(), RunnerError> {
        if !workflow.definition.checkpointing_enabled {
            return Ok(());
        }
        self.store
            .save_checkpoint(workflow.id(), thread_id, state)
            .await?;
        self.store
            .record_transition(TransitionRecord::new(
                workflow.id(),
                thread_id,
                from,
                to,
                transition_type,
                duration_ms,
            ))
            .await?;
        Ok(())
    }

    async fn pause_at(
        &self,
        workflow: &Arc<CompiledWorkflow>,
        thread_id: &str,
        mut state: RunState,
        spec: &NodeSpec,
        options: &ExecutionOptions,
    ) -> Result<ExecutionReport, RunnerError> {
        let prompt = self.human.pause_workflow(
            workflow.id(),
            thread_id,
            &spec.id,
            spec.name.clone(),
            options.human_timeout,
            options.timeout_policy.clone(),
        )?;
        if prompt.timeout.is_some() {
            self.spawn_timeout_watch(workflow, thread_id, &prompt, options);
        }
        state.awaiting_user_input = true;
        self.persist_step(
            workflow,
            thread_id,
            &state,
            &spec.id,
            &spec.id,
            TransitionType::Human,
            0,
        )
        .await?;
        self.emit(
            workflow,
            thread_id,
            EventKind::Paused {
                node: spec.id.clone(),
                prompt_id: prompt.prompt_id.to_string(),
            },
        );
        tracing::info!(node = %spec.id, "run paused for human input");
        Ok(ExecutionReport {
            success: true,
            thread_id: thread_id.to_owned(),
            errors: state.errors.clone(),
            final_state: state,
            prompt: Some(prompt),
            loop_break: None,
        })
    }

    /// Arm background supervision for a pending prompt. The task sleeps out
    /// the timeout and, unless an operator answered first, applies the
    /// prompt's policy with the same options the run was started with.
    fn spawn_timeout_watch(
        &self,
        workflow: &Arc<CompiledWorkflow>,
        thread_id: &str,
        prompt: &PendingPrompt,
        options: &ExecutionOptions,
    ) {
        let runner = self.clone();
        let workflow = Arc::clone(workflow);
        let thread_id = thread_id.to_owned();
        let prompt = prompt.clone();
        let options = options.clone();
        tokio::spawn(async move {
            let Some(action) = Arc::clone(&runner.human).watch_timeout(prompt).await else {
                return;
            };
            if let Err(error) = runner
                .resolve_timeout(&workflow, &thread_id, action, options)
                .await
            {
                tracing::error!(%error, %thread_id, "timeout resolution failed");
            }
        });
    }

    /// Loop protection tripped: stop gracefully and record why.
    async fn break_loop(
        &self,
        workflow: &CompiledWorkflow,
        thread_id: &str,
        mut state: RunState,
        report: LoopReport,
        elapsed_ms: u64,
    ) -> Result<ExecutionReport, RunnerError> {
        state.record_error(ErrorEvent::loop_break(report.node.clone(), report.visits));
        self.persist_step(
            workflow,
            thread_id,
            &state,
            &report.node,
            END,
            TransitionType::LoopBreak,
            elapsed_ms,
        )
        .await?;
        self.emit(
            workflow,
            thread_id,
            EventKind::LoopBreak {
                node: report.node.clone(),
                visits: report.visits as u32,
            },
        );
        tracing::warn!(node = %report.node, visits = report.visits, "loop detected, halting run");
        state.current_node = END.to_string();
        self.finish(workflow, thread_id, state, Some(report)).await
    }

    async fn finish(
        &self,
        workflow: &CompiledWorkflow,
        thread_id: &str,
        state: RunState,
        loop_break: Option<LoopReport>,
    ) -> Result<ExecutionReport, RunnerError> {
        if workflow.definition.checkpointing_enabled {
            self.store
                .save_checkpoint(workflow.id(), thread_id, &state)
                .await?;
        }
        self.store
            .update_session_status(workflow.id(), thread_id, SessionStatus::Completed)
            .await?;
        self.emit(
            workflow,
            thread_id,
            EventKind::Completed {
                severity: state.severity,
            },
        );
        Ok(ExecutionReport {
            success: true,
            thread_id: thread_id.to_owned(),
            errors: state.errors.clone(),
            final_state: state,
            prompt: None,
            loop_break,
        })
    }

    fn emit(&self, workflow: &CompiledWorkflow, thread_id: &str, kind: EventKind) {
        self.emitter
            .emit(WorkflowEvent::now(workflow.id(), thread_id, kind));
    }
}
