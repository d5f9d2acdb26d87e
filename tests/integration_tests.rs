//! Integration tests for the complete Minder pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Speech capture → Interpreter → Confirmation → Store
//! - Multi-command sessions with the relationship pass in between
//! - Reconciliation keeping the local set converged
//!
//! Run with: cargo test --test integration_tests

use chrono::Utc;
use minder_intent::{
    collect_final, CommandOutcome, CommandSession, Interpreter, MockCompletion, ScriptedSpeech,
    SpeechCapture,
};
use minder_model::ItemKind;
use minder_store::{ItemStore, MemoryStore, OptimisticStore};
use std::sync::Arc;

fn session_with_responses(responses: Vec<String>) -> (Arc<MemoryStore>, CommandSession) {
    let backend = Arc::new(MemoryStore::new());
    let store = OptimisticStore::new(backend.clone(), "alice");
    let interpreter = Interpreter::new(Arc::new(MockCompletion::new(responses)));
    (backend, CommandSession::new(interpreter, store))
}

// ============================================================================
// Speech → Interpreter → Confirmation → Store
// ============================================================================

#[tokio::test(start_paused = true)]
async fn spoken_command_flows_from_capture_to_committed_item() {
    let capture = ScriptedSpeech::new(
        vec![("add task".into(), 0.4), ("add task buy groceries".into(), 0.7)],
        "add task buy groceries by friday",
        0.9,
    );
    let rx = capture.start().await.unwrap();
    let (transcript, asr_confidence) = collect_final(rx).await.unwrap();

    let due = (Utc::now() + chrono::Duration::days(4)).to_rfc3339();
    let response = format!(
        r#"{{"operation": "create", "confidence": 0.95,
            "items": [{{"kind": "task", "title": "buy groceries", "due_date": "{due}"}}]}}"#
    );
    let (backend, session) = session_with_responses(vec![response]);

    let outcome = session
        .submit(&transcript, Some(asr_confidence))
        .await
        .unwrap();
    let mut batch = match outcome {
        CommandOutcome::Confirmation(batch) => batch,
        other => panic!("expected cards, got {other:?}"),
    };
    let report = session.approve_all(&mut batch).await;
    assert_eq!(report.approved, 1);
    session.finalize(batch).await;

    let stored = backend.list("alice").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].title, "buy groceries");
    // Final confidence is min(asr 0.9, model 0.95).
    match stored[0].origin {
        minder_model::Origin::Voice { confidence } => assert!((confidence - 0.9).abs() < 1e-6),
        minder_model::Origin::Manual => panic!("expected voice origin"),
    }
}

// ============================================================================
// Multi-command session with the relationship pass
// ============================================================================

#[tokio::test(start_paused = true)]
async fn create_query_delete_across_one_session() {
    let create_response = serde_json::json!({
        "operation": "create",
        "confidence": 0.9,
        "items": [
            {
                "kind": "event",
                "title": "Planning Meeting",
                "description": "prepare agenda",
                "start_time": Utc::now().to_rfc3339(),
            },
            {"kind": "task", "title": "Prepare slides for meeting"},
        ]
    })
    .to_string();
    let query_response = r#"{"operation": "query", "items": [{"title": "planning"}]}"#;
    let delete_response = r#"{"operation": "delete", "items": [{"title": "all meetings"}]}"#;

    let (backend, session) = session_with_responses(vec![
        create_response,
        query_response.to_string(),
        delete_response.to_string(),
    ]);

    // 1. Create both items; the batch pass links them pairwise.
    let outcome = session
        .submit("plan the meeting and a slides task", Some(0.9))
        .await
        .unwrap();
    let mut batch = match outcome {
        CommandOutcome::Confirmation(batch) => batch,
        other => panic!("expected cards, got {other:?}"),
    };
    session.approve_all(&mut batch).await;
    let summary = session.finalize(batch).await;
    assert_eq!(summary.approved, 2);
    assert_eq!(summary.auto_links, 1);

    let stored = backend.list("alice").await.unwrap();
    let meeting = stored.iter().find(|i| i.kind() == ItemKind::Event).unwrap();
    let task = stored.iter().find(|i| i.kind() == ItemKind::Task).unwrap();
    assert!(meeting.linked_items.contains(&task.id));
    assert!(task.linked_items.contains(&meeting.id));

    // 2. Query resolves fuzzily, no cards.
    let outcome = session.submit("what's planned", None).await.unwrap();
    match outcome {
        CommandOutcome::Matches(items) => {
            assert!(items.iter().any(|i| i.title == "Planning Meeting"));
        }
        other => panic!("expected matches, got {other:?}"),
    }

    // 3. Bulk delete removes the event and scrubs it from the task's links.
    let outcome = session.submit("delete all meetings", None).await.unwrap();
    let mut batch = match outcome {
        CommandOutcome::Confirmation(batch) => batch,
        other => panic!("expected cards, got {other:?}"),
    };
    assert_eq!(batch.len(), 1);
    session.approve_all(&mut batch).await;
    session.finalize(batch).await;

    let remaining = backend.list("alice").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].kind(), ItemKind::Task);
    assert!(remaining[0].linked_items.is_empty());
}

// ============================================================================
// Reconciliation convergence
// ============================================================================

#[tokio::test(start_paused = true)]
async fn remote_writes_converge_through_the_debounced_fetch() {
    let (backend, session) = session_with_responses(vec![
        r#"{"operation": "create", "items": [{"kind": "note", "title": "local note"}]}"#.to_string(),
    ]);
    let _watcher = session.store().watch_remote();

    // Someone else writes directly to the backing store.
    let remote = minder_model::CandidateItem {
        kind: Some(ItemKind::Note),
        title: Some("remote note".into()),
        ..Default::default()
    }
    .into_item("alice", minder_model::Origin::Manual, Utc::now());
    backend.create(remote).await.unwrap();

    // Our own command also lands; both triggers coalesce.
    let outcome = session.submit("note local note", None).await.unwrap();
    let mut batch = match outcome {
        CommandOutcome::Confirmation(batch) => batch,
        other => panic!("expected cards, got {other:?}"),
    };
    session.approve_all(&mut batch).await;
    session.finalize(batch).await;

    tokio::time::sleep(minder_store::RECONCILE_QUIET_WINDOW * 2).await;
    let titles: Vec<String> = session
        .store()
        .items()
        .into_iter()
        .map(|i| i.title)
        .collect();
    assert!(titles.contains(&"local note".to_string()));
    assert!(titles.contains(&"remote note".to_string()));
}
