// Minimal integration test that drives the compiled binary through a PTY.
// This exercises the real event loop and crossterm input handling across
// the main boundaries without relying on internal modules.
//
// Notes:
// - Requires a TTY; uses expectrl which allocates a pseudo terminal.
// - Marked Unix-only and ignored by default to avoid CI/platform issues.
// - Run manually via: `cargo test --test integration_min_session -- --ignored`.

#![cfg(unix)]

use std::time::Duration;

use expectrl::{spawn, Eof};

#[test]
#[ignore]
fn minimal_interview_starts_and_exits() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("mockprep.db");
    let bin = assert_cmd::cargo::cargo_bin("mockprep");

    // Give the user a prep first
    let granted = std::process::Command::new(&bin)
        .args(["--user", "pty", "--grant", "1", "--db"])
        .arg(&db)
        .status()?;
    assert!(granted.success());

    let cmd = format!(
        "{} --user pty --secs 30 --questions 2 --db {}",
        bin.display(),
        db.display()
    );
    let mut p = spawn(cmd)?;

    // Give the app a moment to initialize the terminal/alternate screen
    std::thread::sleep(Duration::from_millis(300));

    // Start, answer the first question, then end early
    p.send("s")?;
    std::thread::sleep(Duration::from_millis(200));
    p.send("r")?;
    std::thread::sleep(Duration::from_millis(100));
    p.send("hello there\r")?;
    p.send("\r")?;
    std::thread::sleep(Duration::from_millis(100));
    p.send("e")?;
    std::thread::sleep(Duration::from_millis(300));

    // q leaves the results screen
    p.send("q")?;
    p.expect(Eof)?;
    Ok(())
}
