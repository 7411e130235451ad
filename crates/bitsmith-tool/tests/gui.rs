//! GUI automation against a fake tool: a shell script that behaves like a
//! REPL in batch mode and appends to its journal in GUI mode.

#![cfg(unix)]

use bitsmith_core::{Console, MessagePolicy};
use bitsmith_tool::{GuiAutomation, JournalOutcome, JournalWatcherConfig, SessionConfig};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Arguments in GUI mode are `-mode gui -nolog -appjournal -journal <file> <xpr>`
fn fake_tool(dir: &Path, gui_branch: &str) -> PathBuf {
    let script = format!(
        "#!/bin/sh\nif [ \"$2\" = \"gui\" ]; then\n{}\nfi\nexec /bin/sh\n",
        gui_branch
    );
    let path = dir.join("fake-vivado");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn automation(tool: PathBuf, project_root: &Path) -> GuiAutomation {
    let base = SessionConfig::new(tool)
        .with_args(Vec::<String>::new())
        .with_init(false)
        .with_sentinel_command("echo \"@PROMPT@\"")
        .with_exit_timeout(Duration::from_millis(200));

    GuiAutomation::new(
        base,
        "xc7a35ticsg324-1L",
        project_root,
        MessagePolicy::new(),
        Console::new(),
    )
    .with_watcher_config(JournalWatcherConfig {
        poll_interval: Duration::from_millis(20),
        ..JournalWatcherConfig::default()
    })
}

fn scratch_dirs(root: &Path) -> Vec<String> {
    std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("xx-scratch-"))
        .collect()
}

#[tokio::test]
async fn test_predicate_completes_without_tool_exit() {
    let tools = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let tool = fake_tool(
        tools.path(),
        "  echo 'create_bd_design system' >> \"$6\"\n  \
         sleep 0.2\n  \
         echo 'close_bd_design [get_bd_designs system]' >> \"$6\"\n  \
         sleep 5\n  exit 0",
    );

    let mut scratch_seen = None;
    let outcome = automation(tool, root.path())
        .run_gui_and_wait_for_journal(
            false,
            |scratch| {
                scratch_seen = Some(scratch.to_path_buf());
                Ok(vec!["echo preloading".to_string()])
            },
            |lines| lines.last().map_or(false, |l| l.starts_with("close_bd_design")),
        )
        .await
        .unwrap();

    let JournalOutcome::Completed(lines) = outcome else {
        panic!("expected the journal predicate to match");
    };
    assert_eq!(
        lines,
        vec![
            "create_bd_design system",
            "close_bd_design [get_bd_designs system]"
        ]
    );

    let scratch = scratch_seen.unwrap();
    assert!(scratch.starts_with(root.path()));
    assert!(!scratch.exists());
    assert!(scratch_dirs(root.path()).is_empty());
}

#[tokio::test]
async fn test_tool_exit_is_cancellation() {
    let tools = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let tool = fake_tool(tools.path(), "  echo 'start_gui' >> \"$6\"\n  sleep 0.1\n  exit 0");

    let outcome = automation(tool, root.path())
        .run_gui_and_wait_for_journal(false, |_| Ok(Vec::new()), |_| false)
        .await
        .unwrap();

    assert_eq!(outcome, JournalOutcome::Cancelled);
    assert!(scratch_dirs(root.path()).is_empty());
}

#[tokio::test]
async fn test_setup_failure_cleans_up() {
    let tools = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let tool = fake_tool(tools.path(), "  exit 0");

    let result = automation(tool, root.path())
        .run_gui_and_wait_for_journal(
            true,
            |_| Ok(vec!["echo 'ERROR: [Vivado 12-3523] cannot source script'".to_string()]),
            |_| false,
        )
        .await;

    assert!(result.is_err());
    assert!(scratch_dirs(root.path()).is_empty());
}
