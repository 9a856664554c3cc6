use probeflow::finding::Finding;
use probeflow::state::RunState;
use probeflow::store::{recover_state, MemoryStore, StateStore, TransitionRecord};
use probeflow::types::{SessionStatus, Severity, TransitionType};

mod common;
use common::seed_state;

fn rich_state() -> RunState {
    let mut state = seed_state();
    state.record_finding(
        Finding::new("tls", Severity::Major, "weak cipher").with_detail("cipher", "RC4".into()),
    );
    state.record_finding(Finding::blocker("auth", "credentials rejected"));
    state.record_visit(&"probe".to_string(), "Probe", 42);
    state.current_node = "triage".into();
    state
}

#[tokio::test]
async fn checkpoint_round_trip_is_deep() {
    let store = MemoryStore::new();
    let state = rich_state();
    let saved = store.save_checkpoint("wf", "t1", &state).await.unwrap();

    let loaded = store
        .load_checkpoint(saved.checkpoint_id)
        .await
        .unwrap()
        .expect("checkpoint present");
    let restored: RunState = loaded.state.into();
    assert_eq!(restored, state);
    assert_eq!(restored.findings[0].details["cipher"], "RC4");
}

#[tokio::test]
async fn earlier_checkpoints_stay_reachable_by_id() {
    let store = MemoryStore::new();
    let mut state = seed_state();
    let first = store.save_checkpoint("wf", "t1", &state).await.unwrap();
    state.record_finding(Finding::blocker("auth", "second snapshot"));
    store.save_checkpoint("wf", "t1", &state).await.unwrap();

    // recovery sees the newest, by-id still returns the older snapshot
    let latest = store
        .latest_checkpoint("wf", "t1")
        .await
        .unwrap()
        .expect("latest present");
    assert_ne!(latest.checkpoint_id, first.checkpoint_id);
    let older = store
        .load_checkpoint(first.checkpoint_id)
        .await
        .unwrap()
        .expect("by-id hit");
    assert_eq!(older, first);

    assert!(store
        .load_checkpoint(uuid::Uuid::new_v4())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn recover_state_picks_the_latest_checkpoint() {
    let store = MemoryStore::new();
    let mut state = seed_state();
    store.save_checkpoint("wf", "t1", &state).await.unwrap();
    state.record_finding(Finding::blocker("auth", "second snapshot"));
    store.save_checkpoint("wf", "t1", &state).await.unwrap();

    let recovered = recover_state(&store, "wf", "t1").await.unwrap().unwrap();
    assert_eq!(recovered.findings.len(), 1);
    assert_eq!(recovered.severity, Severity::Blocker);

    assert!(recover_state(&store, "wf", "other").await.unwrap().is_none());
}

#[tokio::test]
async fn transition_history_preserves_insertion_order() {
    let store = MemoryStore::new();
    for (from, to, kind) in [
        ("a", "b", TransitionType::Normal),
        ("b", "c", TransitionType::Branch),
        ("c", "END", TransitionType::Normal),
    ] {
        store
            .record_transition(TransitionRecord::new("wf", "t1", from, to, kind, 5))
            .await
            .unwrap();
    }

    let history = store.transition_history("wf", "t1").await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].from_node, "a");
    assert_eq!(history[1].transition_type, TransitionType::Branch);
    assert_eq!(history[2].to_node, "END");

    assert!(store.transition_history("wf", "t2").await.unwrap().is_empty());
}

#[tokio::test]
async fn session_create_is_idempotent() {
    let store = MemoryStore::new();
    let first = store.create_session("wf", "t1").await.unwrap();
    let second = store.create_session("wf", "t1").await.unwrap();
    assert_eq!(first.session_id, second.session_id);
    assert_eq!(first.status, SessionStatus::Active);
}

#[tokio::test]
async fn terminal_sessions_stay_terminal() {
    let store = MemoryStore::new();
    store.create_session("wf", "t1").await.unwrap();
    store
        .update_session_status("wf", "t1", SessionStatus::Completed)
        .await
        .unwrap();
    // second terminal update is a no-op, not an error
    store
        .update_session_status("wf", "t1", SessionStatus::Aborted)
        .await
        .unwrap();

    let session = store.get_session("wf", "t1").await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn updating_a_missing_session_fails() {
    let store = MemoryStore::new();
    let err = store
        .update_session_status("wf", "ghost", SessionStatus::Completed)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("ghost"));
}
