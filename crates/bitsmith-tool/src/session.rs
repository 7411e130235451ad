//! Tool session driver
//!
//! The tool is a line-oriented REPL with no framing of its own. After every
//! command we ask it to print [`SENTINEL`]; the command is finished once
//! standard output ends with the sentinel followed by a newline.
//!
//! Both pipes are read by background tasks that forward raw chunks over a
//! channel. All consumers of that channel lock it first, which is what keeps
//! commands on one session strictly serialized.

use bitsmith_core::{BitsmithError, Console, MessagePolicy, Project, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::classifier::classify;
use crate::journal::Liveness;
use crate::output::CommandOutput;
use crate::progress::{pretty_duration, ProgressIndicator, DEFAULT_TICK};

/// Completion marker printed after every command
pub const SENTINEL: &str = "@PROMPT@";

const BANNER_PREFIX: &str = "****** Vivado ";
const PARTS_COMMAND: &str = r#"puts [join [get_parts] "\n"]"#;

const PROGRESS_DELAY: Duration = Duration::from_millis(1000);
const PROGRESS_TIME_DELAY: Duration = Duration::from_millis(5000);
const PROGRESS_WIDTH: usize = 30;
const READ_CHUNK: usize = 8192;

/// How to start the tool
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub tool: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Perform the banner handshake and load the part list after spawning
    pub run_init: bool,
    /// Command that makes the tool print [`SENTINEL`] on its own line
    pub sentinel_command: String,
    /// How long `close` waits for a graceful exit
    pub exit_timeout: Duration,
    /// Liveness poll interval while waiting for exit
    pub exit_poll_interval: Duration,
    /// Read timeout between progress checks while streaming
    pub read_poll_interval: Duration,
}

impl SessionConfig {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            args: Self::default_args(),
            working_dir: PathBuf::from("."),
            run_init: true,
            sentinel_command: format!("puts \"{}\"", SENTINEL),
            exit_timeout: Duration::from_secs(3),
            exit_poll_interval: Duration::from_millis(250),
            read_poll_interval: Duration::from_millis(50),
        }
    }

    /// Quiet batch mode with no log or journal files
    pub fn default_args() -> Vec<String> {
        ["-mode", "tcl", "-notrace", "-nolog", "-nojournal"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Session rooted at the project, using the project's tool binary
    pub fn for_project(project: &Project) -> Result<Self> {
        Ok(Self::new(project.tool_path()?).in_dir(&project.location))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_init(mut self, run_init: bool) -> Self {
        self.run_init = run_init;
        self
    }

    pub fn with_sentinel_command(mut self, command: impl Into<String>) -> Self {
        self.sentinel_command = command.into();
        self
    }

    pub fn with_exit_timeout(mut self, timeout: Duration) -> Self {
        self.exit_timeout = timeout;
        self
    }
}

enum Chunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

enum Poll {
    Data,
    Idle,
    Closed,
}

/// Receiving end of the pipe readers plus what has arrived for the
/// command in flight
struct OutputChannel {
    rx: mpsc::UnboundedReceiver<Chunk>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    closed: bool,
}

impl OutputChannel {
    fn new(rx: mpsc::UnboundedReceiver<Chunk>) -> Self {
        Self {
            rx,
            stdout: Vec::new(),
            stderr: Vec::new(),
            closed: false,
        }
    }

    fn reset(&mut self) {
        self.stdout.clear();
        self.stderr.clear();
    }

    fn push(&mut self, chunk: Chunk) {
        match chunk {
            Chunk::Stdout(bytes) => self.stdout.extend_from_slice(&bytes),
            Chunk::Stderr(bytes) => self.stderr.extend_from_slice(&bytes),
        }
    }

    fn drain_ready(&mut self) {
        while let Ok(chunk) = self.rx.try_recv() {
            self.push(chunk);
        }
    }

    /// Wait up to `timeout` for more output
    async fn poll(&mut self, timeout: Duration) -> Poll {
        if self.closed {
            return Poll::Closed;
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(chunk)) => {
                self.push(chunk);
                self.drain_ready();
                Poll::Data
            }
            Ok(None) => {
                self.closed = true;
                Poll::Closed
            }
            Err(_) => Poll::Idle,
        }
    }

    fn complete(&self) -> bool {
        self.stdout.ends_with(sentinel_line().as_bytes())
    }
}

fn sentinel_line() -> String {
    format!("{}\n", SENTINEL)
}

/// Next complete line starting at `*offset`, advancing the offset
fn next_line(buf: &[u8], offset: &mut usize) -> Option<String> {
    let rest = buf.get(*offset..)?;
    let end = rest.iter().position(|&b| b == b'\n')?;
    *offset += end + 1;
    let line = String::from_utf8_lossy(&rest[..end]);
    Some(line.trim_end_matches('\r').to_string())
}

fn spawn_reader<R>(mut reader: R, tx: mpsc::UnboundedSender<Chunk>, wrap: fn(Vec<u8>) -> Chunk)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(wrap(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

struct Process {
    child: Child,
    stdin: ChildStdin,
    output: Arc<Mutex<OutputChannel>>,
}

#[instrument(skip(config), fields(tool = %config.tool.display()))]
fn spawn_process(config: &SessionConfig) -> Result<Process> {
    debug!("Spawning {:?} in {}", config.args, config.working_dir.display());

    let mut child = Command::new(&config.tool)
        .args(&config.args)
        .current_dir(&config.working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BitsmithError::ToolLaunch(format!("{}: {}", config.tool.display(), e)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| BitsmithError::ToolLaunch("stdin was not captured".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BitsmithError::ToolLaunch("stdout was not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BitsmithError::ToolLaunch("stderr was not captured".to_string()))?;

    let (tx, rx) = mpsc::unbounded_channel();
    spawn_reader(stdout, tx.clone(), Chunk::Stdout);
    spawn_reader(stderr, tx, Chunk::Stderr);

    Ok(Process {
        child,
        stdin,
        output: Arc::new(Mutex::new(OutputChannel::new(rx))),
    })
}

/// Version string from the startup banner, if it looks like the tool's
/// What the progress indicator shows after a command has run for a while
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProgressPhase {
    Hidden,
    Bar,
    Timed,
}

fn progress_phase(elapsed: Duration) -> ProgressPhase {
    if elapsed > PROGRESS_TIME_DELAY {
        ProgressPhase::Timed
    } else if elapsed > PROGRESS_DELAY {
        ProgressPhase::Bar
    } else {
        ProgressPhase::Hidden
    }
}

pub fn parse_banner(output: &str) -> Option<String> {
    output
        .lines()
        .nth(1)
        .and_then(|line| line.strip_prefix(BANNER_PREFIX))
        .map(|rest| rest.trim().to_string())
}

/// One running tool subprocess
pub struct Session {
    config: SessionConfig,
    process: Process,
    policy: Arc<MessagePolicy>,
    console: Console,
    constraints: HashSet<String>,
    parts: HashSet<String>,
    version: Option<String>,
}

impl Session {
    /// Spawn the tool and, if configured, perform the startup handshake
    #[instrument(skip_all, fields(tool = %config.tool.display()))]
    pub async fn launch(config: SessionConfig, policy: MessagePolicy, console: Console) -> Result<Self> {
        let process = spawn_process(&config)?;
        let mut session = Self {
            config,
            process,
            policy: Arc::new(policy),
            console,
            constraints: HashSet::new(),
            parts: HashSet::new(),
            version: None,
        };

        if session.config.run_init {
            session.handshake().await?;
        }
        Ok(session)
    }

    async fn handshake(&mut self) -> Result<()> {
        self.console.log("starting vivado");
        let start = Instant::now();

        let banner = self.execute("", |_| false, false).await?;
        let version = parse_banner(&banner.content)
            .ok_or_else(|| BitsmithError::UnexpectedBanner(banner.content.clone()))?;
        info!("Tool version {}", version);
        self.version = Some(version);

        let parts = self.run_command(PARTS_COMMAND).await?;
        self.parts = parts
            .content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        debug!("Loaded {} parts", self.parts.len());

        self.console.log(format!(
            "vivado started ({})",
            pretty_duration(start.elapsed())
        ));
        Ok(())
    }

    /// Version reported by the startup banner
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn working_dir(&self) -> &Path {
        &self.config.working_dir
    }

    pub fn policy(&self) -> &MessagePolicy {
        &self.policy
    }

    pub fn set_policy(&mut self, policy: MessagePolicy) {
        self.policy = Arc::new(policy);
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn part_exists(&self, part: &str) -> bool {
        self.parts.contains(part)
    }

    pub fn alive(&mut self) -> bool {
        matches!(self.process.child.try_wait(), Ok(None))
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let stdin = &mut self.process.stdin;
        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        write.await.map_err(|e| {
            warn!("Write to tool failed: {}", e);
            BitsmithError::SessionTerminated
        })
    }

    /// Send `command` and the sentinel, then read until the sentinel arrives.
    ///
    /// `on_line` sees every complete line as soon as it is read and returns
    /// whether it printed anything. With `progress` the indicator is drawn
    /// once the command has been running for a while.
    async fn execute<F>(&mut self, command: &str, mut on_line: F, progress: bool) -> Result<CommandOutput>
    where
        F: FnMut(&str) -> bool,
    {
        let output = Arc::clone(&self.process.output);
        let mut chan = output.lock().await;
        chan.reset();

        debug!("> {}", command);
        self.send_line(command).await?;
        let sentinel = self.config.sentinel_command.clone();
        self.send_line(&sentinel).await?;

        let mut bar = progress.then(|| {
            ProgressIndicator::new(2 * (1 + self.console.depth()), PROGRESS_WIDTH)
        });
        let start = Instant::now();
        let mut last_tick = start;
        let mut out_offset = 0;
        let mut err_offset = 0;

        loop {
            let poll = chan.poll(self.config.read_poll_interval).await;

            let mut redraw = false;
            while let Some(line) = next_line(&chan.stdout, &mut out_offset) {
                if line != SENTINEL {
                    redraw |= on_line(&line);
                }
            }
            while let Some(line) = next_line(&chan.stderr, &mut err_offset) {
                redraw |= on_line(&line);
            }

            if chan.complete() {
                break;
            }

            match poll {
                Poll::Closed => return Err(self.terminated(&bar)),
                Poll::Idle if !self.alive() => {
                    chan.drain_ready();
                    if chan.complete() {
                        break;
                    }
                    return Err(self.terminated(&bar));
                }
                _ => {}
            }

            if let Some(bar) = bar.as_mut() {
                let now = Instant::now();
                let phase = progress_phase(now - start);
                if phase != ProgressPhase::Hidden {
                    if phase == ProgressPhase::Timed {
                        bar.show_time();
                    }
                    if now - last_tick >= DEFAULT_TICK {
                        last_tick = now;
                        bar.update();
                        redraw = true;
                    }
                    if redraw {
                        bar.draw();
                    }
                }
            }
        }

        if let Some(bar) = &bar {
            bar.clear();
        }

        let sentinel_len = sentinel_line().len();
        let content_len = chan.stdout.len() - sentinel_len;
        let content = String::from_utf8_lossy(&chan.stdout[..content_len]).into_owned();
        let stderr = String::from_utf8_lossy(&chan.stderr).into_owned();
        chan.reset();

        Ok(CommandOutput::from_raw(content, stderr, &self.policy))
    }

    fn terminated(&self, bar: &Option<ProgressIndicator>) -> BitsmithError {
        if let Some(bar) = bar {
            bar.clear();
        }
        warn!("Tool exited before printing the sentinel");
        BitsmithError::SessionTerminated
    }

    /// Run a command, printing nothing until it finishes
    #[instrument(skip(self))]
    pub async fn run_command(&mut self, command: &str) -> Result<CommandOutput> {
        self.execute(command, |_| false, false).await
    }

    /// Run a command, printing its messages as they arrive
    #[instrument(skip(self))]
    pub async fn stream_command(&mut self, command: &str) -> Result<CommandOutput> {
        let policy = Arc::clone(&self.policy);
        let console = self.console.clone();
        self.execute(
            command,
            move |line| match classify(line, &policy) {
                Some(msg) if !msg.suppressed => {
                    console.line(msg.render(&policy));
                    true
                }
                _ => false,
            },
            true,
        )
        .await
    }

    /// Send a command and drain its output in the background.
    ///
    /// The drain holds the output lock, so the next command on this session
    /// waits until the sentinel for this one has been seen.
    #[instrument(skip(self))]
    pub async fn run_command_async(&mut self, command: &str) -> Result<()> {
        let mut chan = Arc::clone(&self.process.output).lock_owned().await;
        chan.reset();

        debug!("> {} (background)", command);
        self.send_line(command).await?;
        let sentinel = self.config.sentinel_command.clone();
        self.send_line(&sentinel).await?;

        tokio::spawn(async move {
            while !chan.complete() {
                match chan.rx.recv().await {
                    Some(chunk) => chan.push(chunk),
                    None => {
                        chan.closed = true;
                        break;
                    }
                }
            }
            chan.reset();
        });
        Ok(())
    }

    /// Ask the tool to exit, killing it if it has not gone within the timeout
    #[instrument(skip(self))]
    pub async fn close(&mut self, quiet: bool) -> Result<()> {
        if !self.alive() {
            return Ok(());
        }
        if !quiet {
            self.console.log("waiting for vivado to exit");
        }

        // The pipe may already be gone; liveness below is what counts
        let _ = self.send_line("exit").await;

        let deadline = Instant::now() + self.config.exit_timeout;
        while self.alive() {
            if Instant::now() >= deadline {
                warn!("Tool did not exit within {:?}, killing it", self.config.exit_timeout);
                return self.force_close().await;
            }
            tokio::time::sleep(self.config.exit_poll_interval).await;
        }
        info!("Tool exited");
        Ok(())
    }

    /// Kill the tool without asking
    pub async fn force_close(&mut self) -> Result<()> {
        if self.alive() {
            self.process.child.kill().await?;
        }
        Ok(())
    }

    /// Replace the subprocess with one started with new arguments
    #[instrument(skip(self, args))]
    pub async fn relaunch<I, S>(&mut self, args: I, working_dir: &Path) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.force_close().await?;

        self.config.args = args.into_iter().map(Into::into).collect();
        self.config.working_dir = working_dir.to_path_buf();
        self.process = spawn_process(&self.config)?;
        self.constraints.clear();
        Ok(())
    }

    pub async fn close_project(&mut self) -> Result<()> {
        // Errors here only mean nothing was open
        self.run_command("close_project").await?;
        self.constraints.clear();
        Ok(())
    }

    pub fn have_constraint_file(&self, path: &str) -> bool {
        self.constraints.contains(path)
    }

    pub async fn add_constraint_file(&mut self, path: &str) -> Result<CommandOutput> {
        self.constraints.insert(path.to_string());
        self.stream_command(&format!("read_xdc \"{}\"", path)).await
    }
}

impl Liveness for Session {
    fn is_alive(&mut self) -> bool {
        self.alive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Ok(None) = self.process.child.try_wait() {
            debug!("Session dropped with tool still running, killing it");
            let _ = self.process.child.start_kill();
        }
    }
}
