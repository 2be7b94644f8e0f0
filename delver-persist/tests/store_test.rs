//! Session store integration tests

use chrono::Utc;
use delver_core::{
    ContextSummary, DelverError, IterationRecord, ResearchSettings, Session, SessionStatus,
};
use delver_persist::SessionStore;
use std::sync::Arc;
use tempfile::TempDir;

fn iteration(n: u32, queries: &[&str], next_plan: Option<&str>) -> IterationRecord {
    IterationRecord {
        iteration: n,
        started_at: Utc::now(),
        finished_at: Utc::now(),
        plan: Some(format!("plan for iteration {}", n)),
        queries: queries.iter().map(|q| q.to_string()).collect(),
        contexts: queries
            .iter()
            .map(|q| ContextSummary::new(format!("https://example.com/{}", q), *q, "extracted"))
            .collect(),
        next_plan: next_plan.map(|p| p.to_string()),
    }
}

fn session_with_iterations(count: u32) -> Session {
    let mut session = Session::new(
        "how do rivers form?",
        Some("answer carefully".to_string()),
        ResearchSettings::default(),
        Some("user-1".to_string()),
    );
    for n in 1..=count {
        session.append_iteration(iteration(
            n,
            &[&format!("query-{}", n)],
            Some(&format!("plan for iteration {}", n + 1)),
        ));
    }
    session
}

async fn open_store() -> (TempDir, SessionStore) {
    let dir = TempDir::new().unwrap();
    let store = SessionStore::open(dir.path()).await.unwrap();
    (dir, store)
}

#[tokio::test]
async fn save_then_load_round_trips() {
    let (_dir, store) = open_store().await;
    let session = session_with_iterations(2);

    store.save(&session).await.unwrap();
    let loaded = store.load(&session.session_id).await.unwrap();

    assert_eq!(loaded, session);
}

#[tokio::test]
async fn load_missing_session_is_not_found() {
    let (_dir, store) = open_store().await;
    let err = store.load("no-such-session").await.unwrap_err();
    assert!(matches!(err, DelverError::NotFound { .. }));
}

#[tokio::test]
async fn tampered_record_is_reported_corrupt() {
    let (dir, store) = open_store().await;
    let session = session_with_iterations(1);
    store.save(&session).await.unwrap();

    let path = dir
        .path()
        .join("sessions")
        .join(format!("{}.json", session.session_id));
    let tampered = std::fs::read_to_string(&path)
        .unwrap()
        .replace("how do rivers form?", "how do mountains form?");
    std::fs::write(&path, tampered).unwrap();

    let err = store.load(&session.session_id).await.unwrap_err();
    assert!(matches!(err, DelverError::Validation { .. }));
}

#[tokio::test]
async fn unknown_record_version_is_rejected() {
    let (dir, store) = open_store().await;
    let session = session_with_iterations(1);
    store.save(&session).await.unwrap();

    let path = dir
        .path()
        .join("sessions")
        .join(format!("{}.json", session.session_id));
    let bumped = std::fs::read_to_string(&path)
        .unwrap()
        .replacen("\"version\": 1", "\"version\": 99", 1);
    std::fs::write(&path, bumped).unwrap();

    let err = store.load(&session.session_id).await.unwrap_err();
    assert!(matches!(err, DelverError::Storage { .. }));
}

#[tokio::test]
async fn list_orders_by_start_time_descending_and_filters_by_user() {
    let (_dir, store) = open_store().await;

    let mut first = session_with_iterations(1);
    first.started_at = Utc::now() - chrono::Duration::hours(2);
    let mut second = session_with_iterations(1);
    second.started_at = Utc::now() - chrono::Duration::hours(1);
    second.user_id = Some("user-2".to_string());
    let mut third = session_with_iterations(1);
    third.started_at = Utc::now();

    for session in [&first, &second, &third] {
        store.save(session).await.unwrap();
    }

    let all = store.list(None).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].session_id, third.session_id);
    assert_eq!(all[2].session_id, first.session_id);

    let filtered = store.list(Some("user-2")).await.unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].session_id, second.session_id);
}

#[tokio::test]
async fn delete_reports_whether_a_record_was_removed() {
    let (_dir, store) = open_store().await;
    let session = session_with_iterations(1);
    store.save(&session).await.unwrap();

    assert!(store.delete(&session.session_id).await.unwrap());
    assert!(!store.delete(&session.session_id).await.unwrap());
    assert!(matches!(
        store.load(&session.session_id).await.unwrap_err(),
        DelverError::NotFound { .. }
    ));
}

#[tokio::test]
async fn resume_rejects_terminal_sessions() {
    let (_dir, store) = open_store().await;

    let mut completed = session_with_iterations(1);
    completed.mark_completed("the report".to_string());
    store.save(&completed).await.unwrap();
    assert!(store.resume(&completed.session_id).await.is_err());

    let mut interrupted = session_with_iterations(1);
    interrupted.mark_interrupted();
    store.save(&interrupted).await.unwrap();
    let resumed = store.resume(&interrupted.session_id).await.unwrap();
    assert_eq!(resumed.session_id, interrupted.session_id);
}

#[tokio::test]
async fn history_projects_the_iteration_list() {
    let (_dir, store) = open_store().await;
    let session = session_with_iterations(3);
    store.save(&session).await.unwrap();

    let history = store.history(&session.session_id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(
        history.iter().map(|r| r.iteration).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

#[tokio::test]
async fn rollback_truncates_and_rebuilds() {
    let (_dir, store) = open_store().await;
    let mut session = session_with_iterations(3);
    session.mark_completed("final report".to_string());
    store.save(&session).await.unwrap();

    let rolled = store.rollback(&session.session_id, 2).await.unwrap();
    assert_eq!(
        rolled.iterations.iter().map(|r| r.iteration).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(rolled.aggregated.last_completed_iteration, 2);
    assert_eq!(rolled.aggregated.queries, vec!["query-1", "query-2"]);
    assert!(rolled.final_report.is_none());
    assert!(rolled.ended_at.is_none());
    assert_eq!(rolled.status, SessionStatus::Interrupted);
    rolled.check_invariants().unwrap();

    // The persisted value matches what was returned.
    let loaded = store.load(&session.session_id).await.unwrap();
    assert_eq!(loaded, rolled);
}

#[tokio::test]
async fn rollback_is_idempotent() {
    let (_dir, store) = open_store().await;
    let session = session_with_iterations(3);
    store.save(&session).await.unwrap();

    let once = store.rollback(&session.session_id, 1).await.unwrap();
    let twice = store.rollback(&session.session_id, 1).await.unwrap();
    assert_eq!(once, twice);
}

#[tokio::test]
async fn rollback_rejects_out_of_range_targets() {
    let (_dir, store) = open_store().await;
    let session = session_with_iterations(2);
    store.save(&session).await.unwrap();

    assert!(store.rollback(&session.session_id, 0).await.is_err());
    assert!(store.rollback(&session.session_id, 3).await.is_err());
}

#[tokio::test]
async fn concurrent_save_and_load_observe_committed_values() {
    let (_dir, store) = open_store().await;
    let store = Arc::new(store);
    let base = session_with_iterations(1);
    store.save(&base).await.unwrap();

    let writer = {
        let store = store.clone();
        let mut session = base.clone();
        tokio::spawn(async move {
            for n in 2..=20u32 {
                session.append_iteration(iteration(
                    n,
                    &[&format!("query-{}", n)],
                    Some("next"),
                ));
                store.save(&session).await.unwrap();
            }
        })
    };

    let reader = {
        let store = store.clone();
        let id = base.session_id.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                let loaded = store.load(&id).await.unwrap();
                // Every observed value is a committed prefix.
                loaded.check_invariants().unwrap();
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();
}
