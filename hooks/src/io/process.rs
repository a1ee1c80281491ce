//! Helpers for running engine scripts and rsync as child processes.
//!
//! Output is read on reader threads and handed to the calling thread over a
//! channel, so the per-chunk callback runs synchronously and needs no `Send`.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::{Pid, User};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Per-chunk output callback.
pub type OnData<'a> = Box<dyn FnMut(&str) + 'a>;

/// One external command invocation.
pub struct ExecutionSpec<'a> {
    /// Short description used in diagnostics.
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    /// Exported as `PATH` when set; otherwise the parent's is inherited.
    pub search_path: Option<Vec<PathBuf>>,
    /// Account to run as; `None` keeps the current identity.
    pub user: Option<String>,
    /// Deliver output through `on_data` as it arrives instead of capturing it.
    pub stream: bool,
    pub on_data: Option<OnData<'a>>,
    /// Kill the child after this long; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl<'a> ExecutionSpec<'a> {
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            search_path: None,
            user: None,
            stream: false,
            on_data: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn search_path(mut self, path: Vec<PathBuf>) -> Self {
        self.search_path = Some(path);
        self
    }

    pub fn user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stream output chunks to `on_data`.
    pub fn streaming(mut self, on_data: impl FnMut(&str) + 'a) -> Self {
        self.stream = true;
        self.on_data = Some(Box::new(on_data));
        self
    }

    /// Render the command line for logs.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|arg| arg.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}

/// Result of a finished command.
///
/// `stdout`/`stderr` hold output only when the spec was not streamed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.timed_out
    }
}

/// Abstraction over process execution so orchestration can be tested
/// without spawning anything.
pub trait CommandRunner {
    /// Run the command to completion. `Err` means it could not be run at all;
    /// a non-zero exit is reported through [`ExecOutput::code`].
    fn run(&self, spec: ExecutionSpec<'_>) -> Result<ExecOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, spec: ExecutionSpec<'_>) -> Result<ExecOutput> {
        (**self).run(spec)
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: ExecutionSpec<'_>) -> Result<ExecOutput> {
        run_command(spec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Stdout,
    Stderr,
}

/// Spawn `spec` and block until it exits, delivering output as it arrives.
#[instrument(skip_all, fields(label = %spec.label, streaming = spec.stream))]
pub fn run_command(mut spec: ExecutionSpec<'_>) -> Result<ExecOutput> {
    let mut cmd = build_command(&spec)?;

    debug!(command = %spec.display_command(), "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = %spec.program.display(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {}", spec.program.display()));
        }
    };

    let (tx, rx) = mpsc::channel();
    let readers = spawn_readers(&mut child, tx)?;
    let deadline = spec.timeout.map(|t| Instant::now() + t);

    let mut output = ExecOutput::default();
    let mut timed_out = drain(&rx, deadline, &mut spec, &mut output);
    // Output still arriving after the deadline is dropped with the receiver.
    drop(rx);
    if timed_out {
        // Grandchildren hold the pipes open, so the readers only finish once
        // the whole group is gone.
        kill(&mut child)?;
    }

    for reader in readers {
        match reader.join() {
            Ok(result) => result?,
            Err(_) => return Err(anyhow!("output reader thread panicked")),
        }
    }

    let status = match wait_remaining(&mut child, deadline)? {
        Some(status) => status,
        None => {
            timed_out = true;
            kill(&mut child)?;
            child.wait().context("wait command after kill")?
        }
    };

    output.code = status.code();
    output.timed_out = timed_out;
    debug!(exit_code = ?output.code, timed_out, "command finished");
    Ok(output)
}

fn build_command(spec: &ExecutionSpec<'_>) -> Result<Command> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    if let Some(path) = &spec.search_path {
        let joined = std::env::join_paths(path).context("join search path")?;
        cmd.env("PATH", joined);
    }
    if let Some(name) = &spec.user {
        let user = User::from_name(name)
            .with_context(|| format!("look up user {name}"))?
            .ok_or_else(|| anyhow!("unknown user {name}"))?;
        cmd.uid(user.uid.as_raw())
            .gid(user.gid.as_raw())
            .env("HOME", &user.dir)
            .env("USER", name);
    }
    Ok(cmd)
}

fn spawn_readers(
    child: &mut Child,
    tx: Sender<(Source, String)>,
) -> Result<Vec<thread::JoinHandle<Result<()>>>> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stderr_tx = tx.clone();
    Ok(vec![
        thread::spawn(move || forward_lines(stdout, Source::Stdout, tx)),
        thread::spawn(move || forward_lines(stderr, Source::Stderr, stderr_tx)),
    ])
}

/// Send each line, terminator included, as one chunk.
fn forward_lines<R: Read>(reader: R, source: Source, tx: Sender<(Source, String)>) -> Result<()> {
    let mut reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        let chunk = String::from_utf8_lossy(&line).into_owned();
        // After a timeout nobody listens, but the pipe is still drained.
        let _ = tx.send((source, chunk));
    }
}

/// Deliver chunks until every reader hangs up. Returns true on deadline.
fn drain(
    rx: &Receiver<(Source, String)>,
    deadline: Option<Instant>,
    spec: &mut ExecutionSpec<'_>,
    output: &mut ExecOutput,
) -> bool {
    loop {
        let next = match deadline {
            Some(deadline) => {
                rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match next {
            Ok((source, chunk)) => deliver(spec, output, source, &chunk),
            Err(RecvTimeoutError::Timeout) => {
                warn!(label = %spec.label, "command timed out, killing");
                return true;
            }
            Err(RecvTimeoutError::Disconnected) => return false,
        }
    }
}

fn deliver(spec: &mut ExecutionSpec<'_>, output: &mut ExecOutput, source: Source, chunk: &str) {
    if spec.stream {
        if let Some(on_data) = spec.on_data.as_mut() {
            on_data(chunk);
        }
        return;
    }
    match source {
        Source::Stdout => output.stdout.push_str(chunk),
        Source::Stderr => output.stderr.push_str(chunk),
    }
}

fn wait_remaining(child: &mut Child, deadline: Option<Instant>) -> Result<Option<ExitStatus>> {
    match deadline {
        Some(deadline) => child
            .wait_timeout(deadline.saturating_duration_since(Instant::now()))
            .context("wait for command"),
        None => child.wait().map(Some).context("wait for command"),
    }
}

/// Kill the child's whole process group. The child leads its own group.
fn kill(child: &mut Child) -> Result<()> {
    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        // Group already gone.
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(e).context("kill command process group"),
    }
}
