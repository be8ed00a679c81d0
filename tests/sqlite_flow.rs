// End-to-end flows against the SQLite-backed ledger and store.

use std::sync::Arc;

use assert_matches::assert_matches;
use tempfile::tempdir;

use mockprep::collab::{LoggingPurchaseFlow, NullTranscriber};
use mockprep::error::SessionError;
use mockprep::ledger::{BalanceLedger, PrepPackage};
use mockprep::machine::{MachineState, SessionDeps, SessionMachine, SessionSettings};
use mockprep::model::{EndReason, SessionStatus, UserId};
use mockprep::policy::AbandonPolicy;
use mockprep::question_bank::QuestionBank;
use mockprep::registry::ActiveSessions;
use mockprep::reports::ReportSummary;
use mockprep::store::{SessionStore, SqliteStore};

fn alex() -> UserId {
    UserId::new("alex")
}

fn machine(
    store: &Arc<SqliteStore>,
    registry: &Arc<ActiveSessions>,
    settings: SessionSettings,
) -> SessionMachine {
    let deps = SessionDeps {
        ledger: store.clone(),
        store: store.clone(),
        transcriber: Arc::new(NullTranscriber),
        purchase: Arc::new(LoggingPurchaseFlow),
        registry: registry.clone(),
    };
    let questions = QuestionBank::load("software_engineer").unwrap().first(4);
    SessionMachine::new(alex(), questions, settings, deps).unwrap()
}

#[tokio::test]
async fn finished_interview_is_stored_and_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state").join("mockprep.db");
    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let registry = Arc::new(ActiveSessions::new());
    store.grant(&alex(), PrepPackage::Basic.preps()).await.unwrap();

    let mut m = machine(&store, &registry, SessionSettings::default());
    m.start().await.unwrap();
    for i in 0..4 {
        m.toggle_recording().await.unwrap();
        m.set_code(format!("// answer {i}")).unwrap();
        m.tick().await;
        m.advance().await.unwrap();
    }
    assert_eq!(m.state(), MachineState::Ended);

    // reopen to make sure everything hit the file
    drop(m);
    drop(store);
    let store = SqliteStore::open(&path).unwrap();

    let rows = store.sessions_for(&alex()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, SessionStatus::Ended);
    assert_eq!(rows[0].end_reason, Some(EndReason::Finished));
    assert_eq!(rows[0].questions_answered, 4);
    assert_eq!(rows[0].questions_total, 4);
    assert_eq!(rows[0].elapsed_secs, 4);

    let balance = store.balance(&alex()).await.unwrap();
    assert_eq!(balance.remaining, 4);
    assert_eq!(balance.total_purchased, 5);

    let summary = ReportSummary::build(&rows, &balance);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.preps_used, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_starts_share_one_prep() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("mockprep.db")).unwrap());
    let registry = Arc::new(ActiveSessions::new());
    store.grant(&alex(), 1).await.unwrap();

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let mut m = machine(&store, &registry, SessionSettings::default());
            tokio::spawn(async move {
                let result = m.start().await;
                (result, m.state())
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap());
    }

    let started = outcomes.iter().filter(|(r, _)| r.is_ok()).count();
    let refused = outcomes
        .iter()
        .filter(|(r, _)| matches!(r, Err(SessionError::InsufficientBalance)))
        .count();
    assert_eq!(started, 1);
    assert_eq!(refused, 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|(_, s)| *s == MachineState::Active)
            .count(),
        1
    );
    assert_eq!(store.balance(&alex()).await.unwrap().remaining, 0);

    // the winning debit wrote its session row in the same transaction
    let rows = store.sessions_for(&alex()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, SessionStatus::Active);
}

#[tokio::test]
async fn abandon_with_refund_restores_the_prep() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let registry = Arc::new(ActiveSessions::new());
    store.grant(&alex(), 1).await.unwrap();
    let settings = SessionSettings {
        abandon_policy: AbandonPolicy::Refund,
        ..SessionSettings::default()
    };

    let mut m = machine(&store, &registry, settings);
    m.start().await.unwrap();
    assert_eq!(store.balance(&alex()).await.unwrap().remaining, 0);

    m.abandon().await;

    assert_eq!(m.balance(), Some(1));
    assert_eq!(store.balance(&alex()).await.unwrap().remaining, 1);
    let rows = store.sessions_for(&alex()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, SessionStatus::Abandoned);
    assert_eq!(rows[0].end_reason, Some(EndReason::Abandoned));
    assert!(rows[0].credit_refunded);
}

#[tokio::test]
async fn second_screen_is_refunded_when_a_session_is_live() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let registry = Arc::new(ActiveSessions::new());
    store.grant(&alex(), 3).await.unwrap();

    let mut first = machine(&store, &registry, SessionSettings::default());
    let mut second = machine(&store, &registry, SessionSettings::default());
    first.start().await.unwrap();

    assert_matches!(second.start().await, Err(SessionError::SessionAlreadyActive));
    assert_eq!(store.balance(&alex()).await.unwrap().remaining, 2);
    // the refunded debit leaves no session row behind
    assert_eq!(store.sessions_for(&alex()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn a_second_process_cannot_start_while_a_session_is_live() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mockprep.db");
    let first_store = Arc::new(SqliteStore::open(&path).unwrap());
    let second_store = Arc::new(SqliteStore::open(&path).unwrap());
    first_store.grant(&alex(), 2).await.unwrap();

    // each process keeps its own in-memory registry
    let mut first = machine(&first_store, &Arc::new(ActiveSessions::new()), SessionSettings::default());
    let mut second = machine(&second_store, &Arc::new(ActiveSessions::new()), SessionSettings::default());
    first.start().await.unwrap();

    assert_matches!(second.start().await, Err(SessionError::SessionAlreadyActive));
    assert_eq!(second.state(), MachineState::Idle);
    assert_eq!(second_store.balance(&alex()).await.unwrap().remaining, 1);
    assert_eq!(second_store.sessions_for(&alex()).await.unwrap().len(), 1);

    first.end().await.unwrap();
    second.start().await.unwrap();
    assert_eq!(second_store.balance(&alex()).await.unwrap().remaining, 0);
}

#[tokio::test]
async fn session_left_active_by_an_exited_process_is_closed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mockprep.db");
    {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        store.grant(&alex(), 2).await.unwrap();
        let mut m = machine(&store, &Arc::new(ActiveSessions::new()), SessionSettings::default());
        m.start().await.unwrap();
        // exits without recording the abandonment
    }

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let registry = Arc::new(ActiveSessions::new());
    let mut m = machine(&store, &registry, SessionSettings::default());
    assert_matches!(m.start().await, Err(SessionError::SessionAlreadyActive));

    let closed = store.abandon_stale(&alex(), 0, AbandonPolicy::Refund).await.unwrap();
    assert_eq!(closed, 1);
    assert_eq!(store.balance(&alex()).await.unwrap().remaining, 2);

    m.start().await.unwrap();
    let rows = store.sessions_for(&alex()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows.iter().filter(|r| r.status == SessionStatus::Abandoned).count(),
        1
    );
}
