// Non-interactive command line paths: balance grants, purchases, reports and
// exports. Every run gets its own HOME so config and logs stay in a tempdir.

use std::path::Path;
use std::process::Output;
use std::sync::Arc;

use assert_cmd::Command;
use tempfile::{tempdir, TempDir};

use mockprep::collab::{LoggingPurchaseFlow, NullTranscriber};
use mockprep::ledger::BalanceLedger;
use mockprep::machine::{SessionDeps, SessionMachine, SessionSettings};
use mockprep::model::UserId;
use mockprep::question_bank::QuestionBank;
use mockprep::registry::ActiveSessions;
use mockprep::store::SqliteStore;

fn run(home: &TempDir, db: &Path, args: &[&str]) -> Output {
    Command::cargo_bin("mockprep")
        .unwrap()
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env_remove("MOCKPREP_LOG")
        .arg("--db")
        .arg(db)
        .args(args)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Runs one finished interview for `user` straight through the library.
fn seed_finished_interview(db: &Path, user: &str) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let store = Arc::new(SqliteStore::open(db).unwrap());
        let user = UserId::new(user);
        store.grant(&user, 2).await.unwrap();

        let deps = SessionDeps {
            ledger: store.clone(),
            store: store.clone(),
            transcriber: Arc::new(NullTranscriber),
            purchase: Arc::new(LoggingPurchaseFlow),
            registry: Arc::new(ActiveSessions::new()),
        };
        let questions = QuestionBank::load("behavioral").unwrap().first(2);
        let mut m = SessionMachine::new(user, questions, SessionSettings::default(), deps).unwrap();
        m.start().await.unwrap();
        m.toggle_recording().await.unwrap();
        m.advance().await.unwrap();
        m.advance().await.unwrap();
    });
}

#[test]
fn grant_adds_preps_and_report_shows_them() {
    let home = tempdir().unwrap();
    let db = home.path().join("mockprep.db");

    let granted = run(&home, &db, &["--user", "alex", "--grant", "3"]);
    assert!(granted.status.success());
    assert!(stdout(&granted).contains("granted 3 preps to alex, 3 remaining"));

    let report = run(&home, &db, &["--user", "alex", "--report"]);
    assert!(report.status.success());
    let text = stdout(&report);
    assert!(text.contains("3 remaining / 3 purchased / 0 used"));
    assert!(text.contains("No interviews yet."));
}

#[test]
fn buying_a_package_grants_its_preps() {
    let home = tempdir().unwrap();
    let db = home.path().join("mockprep.db");

    let bought = run(&home, &db, &["--user", "sam", "--buy", "premium"]);
    assert!(bought.status.success());
    let text = stdout(&bought);
    assert!(text.contains("25 preps"));
    assert!(text.contains("$34.99"));
    assert!(text.contains("25 remaining"));
}

#[test]
fn report_and_export_list_finished_interviews() {
    let home = tempdir().unwrap();
    let db = home.path().join("mockprep.db");
    seed_finished_interview(&db, "alex");

    let report = run(&home, &db, &["--user", "alex", "--report"]);
    assert!(report.status.success());
    let text = stdout(&report);
    assert!(text.contains("1 remaining / 2 purchased / 1 used"));
    assert!(text.contains("1 completed"));
    assert!(text.contains("finished"));

    let export = run(&home, &db, &["--user", "alex", "--export", "-"]);
    assert!(export.status.success());
    let csv = stdout(&export);
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("session_id,started_at,status,end_reason"));
    assert!(lines[1].contains(",ended,finished,1,2,"));
}

#[test]
fn reports_are_per_user() {
    let home = tempdir().unwrap();
    let db = home.path().join("mockprep.db");
    seed_finished_interview(&db, "alex");

    let report = run(&home, &db, &["--user", "sam", "--report"]);
    assert!(report.status.success());
    assert!(stdout(&report).contains("No interviews yet."));
}

#[test]
fn list_sets_names_the_bundled_sets() {
    let home = tempdir().unwrap();
    let db = home.path().join("mockprep.db");

    let listed = run(&home, &db, &["--list-sets"]);
    assert!(listed.status.success());
    let text = stdout(&listed);
    assert!(text.contains("software_engineer"));
    assert!(text.contains("behavioral"));
}

#[test]
fn interview_needs_a_terminal() {
    let home = tempdir().unwrap();
    let db = home.path().join("mockprep.db");

    let output = run(&home, &db, &["--user", "alex"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("stdin must be a tty"));
}
