//! GUI automation
//!
//! GUI operations run inside a throwaway project in a scratch directory under
//! the project root. The scratch directory and the journal are removed on every
//! exit path, cancellation and errors included.

use bitsmith_core::{BitsmithError, Console, MessagePolicy, Project, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, instrument};

use crate::journal::{JournalOutcome, JournalWatcher, JournalWatcherConfig};
use crate::session::{Session, SessionConfig};

/// Name of the throwaway project inside the scratch directory
pub const SCRATCH_PROJECT: &str = "scratch";
pub const JOURNAL_NAME: &str = "xx-vivado-journal.jou";
const SCRATCH_PREFIX: &str = "xx-scratch-";

/// A scratch directory holding the throwaway project and its journal
#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: TempDir,
}

impl ScratchWorkspace {
    pub fn create_in(parent: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix(SCRATCH_PREFIX).tempdir_in(parent)?;
        debug!("Scratch workspace at {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory the throwaway project is created in
    pub fn project_dir(&self) -> PathBuf {
        self.path().join(SCRATCH_PROJECT)
    }

    pub fn project_file(&self) -> PathBuf {
        self.project_dir().join(format!("{}.xpr", SCRATCH_PROJECT))
    }

    pub fn journal(&self) -> PathBuf {
        self.path().join(JOURNAL_NAME)
    }
}

/// Launches the tool's GUI on a throwaway project and waits for the user
#[derive(Debug, Clone)]
pub struct GuiAutomation {
    base: SessionConfig,
    part: String,
    project_root: PathBuf,
    policy: MessagePolicy,
    console: Console,
    watcher: JournalWatcherConfig,
}

impl GuiAutomation {
    pub fn new(
        base: SessionConfig,
        part: impl Into<String>,
        project_root: impl Into<PathBuf>,
        policy: MessagePolicy,
        console: Console,
    ) -> Self {
        Self {
            base,
            part: part.into(),
            project_root: project_root.into(),
            policy,
            console,
            watcher: JournalWatcherConfig::default(),
        }
    }

    /// GUI automation for `project`, using its tool binary and policy
    pub fn for_project(project: &Project, console: Console) -> Result<Self> {
        Ok(Self::new(
            SessionConfig::for_project(project)?,
            &project.part,
            &project.location,
            project.policy.clone(),
            console,
        ))
    }

    pub fn with_watcher_config(mut self, config: JournalWatcherConfig) -> Self {
        self.watcher = config;
        self
    }

    /// Arguments for the GUI relaunch
    pub fn gui_args(journal: &Path, project_file: &Path) -> Vec<String> {
        vec![
            "-mode".to_string(),
            "gui".to_string(),
            "-nolog".to_string(),
            "-appjournal".to_string(),
            "-journal".to_string(),
            journal.display().to_string(),
            project_file.display().to_string(),
        ]
    }

    /// Run the GUI until `predicate` accepts the journal or the user closes it.
    ///
    /// `setup` receives the scratch directory and returns the commands to run
    /// in the throwaway project before the GUI opens.
    #[instrument(skip_all, fields(part = %self.part, ip_project = ip_project))]
    pub async fn run_gui_and_wait_for_journal<S, P>(
        &self,
        ip_project: bool,
        setup: S,
        predicate: P,
    ) -> Result<JournalOutcome>
    where
        S: FnOnce(&Path) -> Result<Vec<String>>,
        P: FnMut(&[String]) -> bool,
    {
        let scratch = ScratchWorkspace::create_in(&self.project_root)?;

        let config = self.base.clone().in_dir(scratch.path());
        let mut session = Session::launch(config, self.policy.clone(), self.console.clone()).await?;

        let create = format!(
            "create_project {}-force -part {} {} {{{}}}",
            if ip_project { "-ip " } else { "" },
            self.part,
            SCRATCH_PROJECT,
            scratch.project_dir().display()
        );
        if session.stream_command(&create).await?.has_errors() {
            return Err(BitsmithError::Command(
                "error creating temporary project".to_string(),
            ));
        }

        self.console.log("running pre-setup");
        for command in setup(scratch.path())? {
            if session.stream_command(&command).await?.has_errors() {
                return Err(BitsmithError::Command(format!(
                    "setup command failed: {}",
                    command
                )));
            }
        }
        session.close(true).await?;

        let mut journal =
            JournalWatcher::create_with_config(scratch.journal(), self.watcher.clone()).await?;

        self.console.log("starting gui");
        session
            .relaunch(
                Self::gui_args(journal.path(), &scratch.project_file()),
                scratch.path(),
            )
            .await?;
        journal.mark_launched();

        self.console.log("waiting for user action");
        let outcome = journal.wait(&mut session, predicate, &self.console).await?;

        match &outcome {
            JournalOutcome::Completed(lines) => {
                info!("GUI action completed ({} journal lines)", lines.len());
                session.close(true).await?;
            }
            JournalOutcome::Cancelled => {
                self.console.warn("vivado exited before the action completed, cancelling");
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_workspace_is_removed_on_drop() {
        let root = tempfile::TempDir::new().unwrap();
        let scratch = ScratchWorkspace::create_in(root.path()).unwrap();
        let path = scratch.path().to_path_buf();

        assert!(path.starts_with(root.path()));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(SCRATCH_PREFIX));
        assert_eq!(scratch.project_file(), path.join("scratch/scratch.xpr"));

        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn test_gui_args() {
        let args = GuiAutomation::gui_args(Path::new("/s/j.jou"), Path::new("/s/scratch/scratch.xpr"));
        assert_eq!(
            args,
            vec![
                "-mode",
                "gui",
                "-nolog",
                "-appjournal",
                "-journal",
                "/s/j.jou",
                "/s/scratch/scratch.xpr"
            ]
        );
    }
}
