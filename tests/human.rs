use serde_json::json;
use std::time::Duration;

use probeflow::errors::ErrorScope;
use probeflow::graph::{WorkflowBuilder, WorkflowRegistry, END};
use probeflow::human::{TimeoutAction, TimeoutPolicy};
use probeflow::runner::{ExecutionOptions, RunnerError};
use probeflow::store::{recover_state, StateStore};
use probeflow::types::{SessionStatus, Severity, TransitionType};

mod common;
use common::*;

fn approval_builder() -> WorkflowBuilder {
    WorkflowBuilder::new("approval", "Approval run")
        .entry_point("scan")
        .plugin_node("scan", "Scan", "probe")
        .human_node("review", "Review")
        .plugin_node("fix", "Fix", "fixer")
        .edge("scan", "review")
        .edge("review", "fix")
        .edge("fix", END)
        .register_plugin(
            "probe",
            ProbePlugin {
                check: "cert",
                severity: Severity::Major,
            },
        )
        .register_plugin(
            "fixer",
            ProbePlugin {
                check: "renewal",
                severity: Severity::Info,
            },
        )
}

#[tokio::test]
async fn pause_then_resume_completes_the_run() {
    let h = harness();
    let mut registry = WorkflowRegistry::new();
    let workflow = registry.create_workflow(approval_builder()).unwrap();
    let options = ExecutionOptions {
        thread_id: Some("t1".into()),
        ..Default::default()
    };

    let paused = h
        .runner
        .execute_workflow(&workflow, seed_state(), options)
        .await
        .unwrap();
    assert!(paused.is_paused());
    assert!(paused.final_state.awaiting_user_input);
    assert!(h.human.is_workflow_paused("approval", "t1"));
    let prompt = paused.prompt.unwrap();
    assert_eq!(prompt.node, "review");

    let resumed = h
        .runner
        .resume_workflow(
            &workflow,
            "t1",
            prompt.prompt_id,
            json!({"approved": true}),
            ExecutionOptions::default(),
        )
        .await
        .unwrap();
    assert!(resumed.success);
    assert!(!resumed.final_state.awaiting_user_input);
    assert_eq!(
        resumed.final_state.user_response,
        Some(json!({"approved": true}))
    );
    assert_eq!(
        resumed.final_state.execution_path,
        vec!["Scan", "Review", "Fix"]
    );
    assert!(!h.human.is_workflow_paused("approval", "t1"));

    let history = h.store.transition_history("approval", "t1").await.unwrap();
    assert!(history
        .iter()
        .any(|t| t.transition_type == TransitionType::Human));
}

#[tokio::test]
async fn resume_keeps_the_original_context_params() {
    let h = harness();
    let mut registry = WorkflowRegistry::new();
    let workflow = registry
        .create_workflow(
            WorkflowBuilder::new("ctx", "Context run")
                .entry_point("scan")
                .plugin_node("scan", "Scan", "echo")
                .human_node("review", "Review")
                .plugin_node("after", "After", "echo")
                .edge("scan", "review")
                .edge("review", "after")
                .edge("after", END)
                .register_plugin("echo", ContextEchoPlugin),
        )
        .unwrap();
    let options = ExecutionOptions {
        thread_id: Some("t1".into()),
        context_params: json!({"region": "eu-1"}),
        ..Default::default()
    };

    let paused = h
        .runner
        .execute_workflow(&workflow, seed_state(), options.clone())
        .await
        .unwrap();
    let prompt = paused.prompt.unwrap();

    let resumed = h
        .runner
        .resume_workflow(&workflow, "t1", prompt.prompt_id, json!("ok"), options)
        .await
        .unwrap();
    assert!(resumed.success);
    // both the pre-pause and the post-pause plugin saw the same params
    assert_eq!(resumed.final_state.findings.len(), 2);
    for finding in &resumed.final_state.findings {
        assert_eq!(finding.details["params"], json!({"region": "eu-1"}));
    }
}

#[tokio::test]
async fn mismatched_prompt_id_rejects_without_mutation() {
    let h = harness();
    let mut registry = WorkflowRegistry::new();
    let workflow = registry.create_workflow(approval_builder()).unwrap();
    let options = ExecutionOptions {
        thread_id: Some("t1".into()),
        ..Default::default()
    };
    let paused = h
        .runner
        .execute_workflow(&workflow, seed_state(), options)
        .await
        .unwrap();
    assert!(paused.is_paused());

    let err = h
        .runner
        .resume_workflow(
            &workflow,
            "t1",
            uuid::Uuid::new_v4(),
            json!("yes"),
            ExecutionOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::Human(_)));
    assert!(h.human.is_workflow_paused("approval", "t1"));

    let recovered = recover_state(h.store.as_ref(), "approval", "t1")
        .await
        .unwrap()
        .unwrap();
    assert!(recovered.awaiting_user_input);
    assert_eq!(recovered.user_response, None);
}

#[tokio::test(start_paused = true)]
async fn unanswered_prompt_resolves_without_caller_supervision() {
    let h = harness();
    let mut registry = WorkflowRegistry::new();
    let workflow = registry.create_workflow(approval_builder()).unwrap();
    let options = ExecutionOptions {
        thread_id: Some("t1".into()),
        human_timeout: Some(Duration::from_secs(30)),
        timeout_policy: TimeoutPolicy::Continue {
            default_response: json!("auto-approved"),
        },
        ..Default::default()
    };
    let paused = h
        .runner
        .execute_workflow(&workflow, seed_state(), options)
        .await
        .unwrap();
    assert!(paused.is_paused());

    // nobody answers; the timer armed at pause time must finish the run
    let mut completed = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let session = h
            .store
            .get_session("approval", "t1")
            .await
            .unwrap()
            .unwrap();
        if session.status == SessionStatus::Completed {
            completed = true;
            break;
        }
    }
    assert!(completed);
    assert!(!h.human.is_workflow_paused("approval", "t1"));

    let recovered = recover_state(h.store.as_ref(), "approval", "t1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recovered.user_response, Some(json!("auto-approved")));
    assert!(recovered
        .errors
        .iter()
        .any(|e| matches!(e.scope, ErrorScope::Timeout { .. })));
}

#[tokio::test]
async fn timeout_with_continue_policy_finishes_with_default() {
    let h = harness();
    let mut registry = WorkflowRegistry::new();
    let workflow = registry.create_workflow(approval_builder()).unwrap();
    let options = ExecutionOptions {
        thread_id: Some("t1".into()),
        timeout_policy: TimeoutPolicy::Continue {
            default_response: json!("auto-approved"),
        },
        ..Default::default()
    };
    let paused = h
        .runner
        .execute_workflow(&workflow, seed_state(), options)
        .await
        .unwrap();
    let prompt = paused.prompt.unwrap();

    // force the expiry by hand; no timer was armed
    let action = h
        .human
        .handle_timeout("approval", "t1", prompt.prompt_id)
        .expect("prompt still pending");
    assert!(!h.human.is_workflow_paused("approval", "t1"));

    let report = h
        .runner
        .resolve_timeout(&workflow, "t1", action, ExecutionOptions::default())
        .await
        .unwrap();
    assert!(report.success);
    assert_eq!(report.final_state.user_response, Some(json!("auto-approved")));
    assert!(report
        .errors
        .iter()
        .any(|e| matches!(e.scope, ErrorScope::Timeout { .. })));
}

#[tokio::test]
async fn timeout_with_abort_policy_terminates_the_session() {
    let h = harness();
    let mut registry = WorkflowRegistry::new();
    let workflow = registry.create_workflow(approval_builder()).unwrap();
    let options = ExecutionOptions {
        thread_id: Some("t1".into()),
        timeout_policy: TimeoutPolicy::Abort,
        ..Default::default()
    };
    let paused = h
        .runner
        .execute_workflow(&workflow, seed_state(), options)
        .await
        .unwrap();
    let prompt = paused.prompt.unwrap();

    let action = h
        .human
        .handle_timeout("approval", "t1", prompt.prompt_id)
        .unwrap();
    assert_eq!(action, TimeoutAction::Abort);

    let report = h
        .runner
        .resolve_timeout(&workflow, "t1", action, ExecutionOptions::default())
        .await
        .unwrap();
    assert!(!report.success);

    let session = h
        .store
        .get_session("approval", "t1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Aborted);

    // aborted runs reject any further resume
    let err = h
        .runner
        .resume_workflow(
            &workflow,
            "t1",
            prompt.prompt_id,
            json!("late"),
            ExecutionOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::SessionTerminal { .. }));
}

#[tokio::test]
async fn operator_beats_the_timer() {
    let h = harness();
    let mut registry = WorkflowRegistry::new();
    let workflow = registry.create_workflow(approval_builder()).unwrap();
    let options = ExecutionOptions {
        thread_id: Some("t1".into()),
        human_timeout: Some(Duration::from_secs(3600)),
        timeout_policy: TimeoutPolicy::Abort,
        ..Default::default()
    };
    let paused = h
        .runner
        .execute_workflow(&workflow, seed_state(), options)
        .await
        .unwrap();
    let prompt = paused.prompt.unwrap();

    h.runner
        .resume_workflow(
            &workflow,
            "t1",
            prompt.prompt_id,
            json!("ok"),
            ExecutionOptions::default(),
        )
        .await
        .unwrap();

    // the late timer resolves to nothing
    assert_eq!(
        h.human.handle_timeout("approval", "t1", prompt.prompt_id),
        None
    );
}
