//! Session driver tests against /bin/sh standing in for the tool's REPL

#![cfg(unix)]

use bitsmith_core::{BitsmithError, Console, MessagePolicy, Severity};
use bitsmith_tool::{Session, SessionConfig};
use std::time::Duration;
use tempfile::TempDir;

fn sh_config(dir: &std::path::Path) -> SessionConfig {
    SessionConfig::new("/bin/sh")
        .with_args(Vec::<String>::new())
        .in_dir(dir)
        .with_init(false)
        .with_sentinel_command("echo \"@PROMPT@\"")
        .with_exit_timeout(Duration::from_millis(500))
}

async fn launch(dir: &TempDir) -> Session {
    Session::launch(sh_config(dir.path()), MessagePolicy::new(), Console::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_run_command_collects_and_classifies() {
    let dir = TempDir::new().unwrap();
    let mut session = launch(&dir).await;

    let out = session
        .run_command("printf 'WARNING: [Synth 8-327] inferring latch\\nplain text\\n'")
        .await
        .unwrap();

    assert_eq!(out.content, "WARNING: [Synth 8-327] inferring latch\nplain text\n");
    assert_eq!(out.count(Severity::Warning), 1);
    assert!(!out.has_errors());
    assert!(!out.content.contains("@PROMPT@"));

    session.close(true).await.unwrap();
    assert!(!session.alive());
}

#[tokio::test]
async fn test_commands_do_not_share_output() {
    let dir = TempDir::new().unwrap();
    let mut session = launch(&dir).await;

    assert_eq!(session.run_command("echo one").await.unwrap().content, "one\n");
    assert_eq!(session.run_command("echo two").await.unwrap().content, "two\n");
    assert_eq!(session.run_command("true").await.unwrap().content, "");
}

#[tokio::test]
async fn test_stream_command_reports_errors() {
    let dir = TempDir::new().unwrap();
    let mut session = launch(&dir).await;

    let out = session
        .stream_command("echo 'ERROR: [Synth 8-439] module not found [/p/top.vhd:12]'")
        .await
        .unwrap();

    assert!(out.has_errors());
    let err = out.first_error().unwrap();
    assert_eq!(err.code, "Synth 8-439");
    assert_eq!(err.location.as_ref().unwrap().line, 12);
}

#[tokio::test]
async fn test_override_applies_to_session_output() {
    let dir = TempDir::new().unwrap();
    let policy = MessagePolicy::new().with_override("Synth 8-327", Severity::Error);
    let mut session = Session::launch(sh_config(dir.path()), policy, Console::new())
        .await
        .unwrap();

    let out = session
        .run_command("echo 'WARNING: [Synth 8-327] latch'")
        .await
        .unwrap();
    assert!(out.has_errors());
}

#[tokio::test]
async fn test_exit_mid_command_is_an_error() {
    let dir = TempDir::new().unwrap();
    let mut session = launch(&dir).await;

    let result = session.run_command("exit 3").await;
    assert!(matches!(result, Err(BitsmithError::SessionTerminated)));
    assert!(!session.alive());
}

#[tokio::test]
async fn test_async_command_is_drained_before_next() {
    let dir = TempDir::new().unwrap();
    let mut session = launch(&dir).await;

    session
        .run_command_async("sleep 0.2; echo background")
        .await
        .unwrap();
    let out = session.run_command("echo foreground").await.unwrap();
    assert_eq!(out.content, "foreground\n");
}

#[tokio::test]
async fn test_relaunch_moves_working_directory() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let mut session = launch(&first).await;

    session
        .relaunch(Vec::<String>::new(), second.path())
        .await
        .unwrap();
    let out = session.run_command("pwd").await.unwrap();

    let reported = std::path::PathBuf::from(out.content.trim()).canonicalize().unwrap();
    assert_eq!(reported, second.path().canonicalize().unwrap());
    assert_eq!(session.working_dir(), second.path());
}

#[tokio::test]
async fn test_constraint_files_cleared_on_project_close() {
    let dir = TempDir::new().unwrap();
    let mut session = launch(&dir).await;

    session.add_constraint_file("pins.xdc").await.unwrap();
    assert!(session.have_constraint_file("pins.xdc"));

    session.close_project().await.unwrap();
    assert!(!session.have_constraint_file("pins.xdc"));
}

#[tokio::test]
async fn test_banner_mismatch_is_environment_error() {
    let dir = TempDir::new().unwrap();
    let config = sh_config(dir.path()).with_init(true);

    let err = match Session::launch(config, MessagePolicy::new(), Console::new()).await {
        Ok(_) => panic!("sh does not print a tool banner"),
        Err(e) => e,
    };
    assert!(matches!(err, BitsmithError::UnexpectedBanner(_)));
    assert!(err.is_environment());
}

#[tokio::test]
async fn test_missing_binary_is_environment_error() {
    let dir = TempDir::new().unwrap();
    let config = SessionConfig::new(dir.path().join("no-such-tool")).with_init(false);

    let err = match Session::launch(config, MessagePolicy::new(), Console::new()).await {
        Ok(_) => panic!("launch should fail"),
        Err(e) => e,
    };
    assert!(err.is_environment());
}
