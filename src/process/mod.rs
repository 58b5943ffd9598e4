//! Execution of external commands
//!
//! Standard output and standard error are forwarded to caller supplied
//! sinks while the command runs. Every child is tracked in a
//! [`ProcessTable`] for the whole of its lifetime so a global cancellation
//! can reach it.

mod sink;
mod table;

pub use sink::{CaptureBuffer, Console, Discard, OutputSink, SharedSink, Tee};
pub use table::{ProcessGuard, ProcessTable};

use crate::error::{RmkError, RmkResult};
use crate::paths::relativize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tracing::debug;

const READ_CHUNK: usize = 4096;

/// A command line, either as argument vector or as shell text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Executed directly, no shell involved
    Argv(Vec<String>),
    /// Executed through `sh -c`
    Shell(String),
}

impl Command {
    /// The command as it would be typed
    pub fn display(&self) -> String {
        match self {
            Self::Argv(argv) => argv.join(" "),
            Self::Shell(text) => text.clone(),
        }
    }

    fn to_tokio(&self) -> RmkResult<tokio::process::Command> {
        match self {
            Self::Argv(argv) => {
                let (program, args) = argv
                    .split_first()
                    .ok_or_else(|| RmkError::User("Empty command".to_string()))?;
                let mut cmd = tokio::process::Command::new(program);
                cmd.args(args);
                Ok(cmd)
            }
            Self::Shell(text) => {
                let mut cmd = tokio::process::Command::new("sh");
                cmd.arg("-c").arg(text);
                Ok(cmd)
            }
        }
    }
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Self::Shell(text.to_string())
    }
}

impl From<String> for Command {
    fn from(text: String) -> Self {
        Self::Shell(text)
    }
}

impl From<Vec<String>> for Command {
    fn from(argv: Vec<String>) -> Self {
        Self::Argv(argv)
    }
}

impl From<&[&str]> for Command {
    fn from(argv: &[&str]) -> Self {
        Self::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

/// Per-invocation options; unset sinks fall back to the runner's console
#[derive(Default, Clone)]
pub struct RunOptions {
    cwd: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
    stdout: Option<SharedSink>,
    stderr: Option<SharedSink>,
    trace: Option<bool>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn stdout(mut self, sink: SharedSink) -> Self {
        self.stdout = Some(sink);
        self
    }

    pub fn stderr(mut self, sink: SharedSink) -> Self {
        self.stderr = Some(sink);
        self
    }

    /// Echo the command line to stdout before running it
    pub fn trace(mut self, enabled: bool) -> Self {
        self.trace = Some(enabled);
        self
    }
}

/// Spawns commands and streams their output
#[derive(Clone)]
pub struct ProcessRunner {
    table: ProcessTable,
    trace: bool,
    verbose: bool,
    stdout: SharedSink,
    stderr: SharedSink,
}

impl ProcessRunner {
    /// Create a runner writing to the terminal, tracing command lines
    pub fn new(table: ProcessTable) -> Self {
        Self {
            table,
            trace: true,
            verbose: false,
            stdout: Arc::new(Console::Stdout),
            stderr: Arc::new(Console::Stderr),
        }
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Verbose runners print command lines with absolute paths
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Replace the default destinations for child output
    pub fn with_console(mut self, stdout: SharedSink, stderr: SharedSink) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    /// The table tracking this runner's children
    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    /// Run `cmd`, returning its stdout while also echoing it to the console
    pub async fn system(&self, cmd: impl Into<Command>, cwd: Option<&Path>) -> RmkResult<String> {
        let out = CaptureBuffer::new();
        let tee = Tee::new(vec![Arc::new(out.clone()), self.stdout.clone()]);
        let mut opts = RunOptions::new().stdout(Arc::new(tee));
        if let Some(dir) = cwd {
            opts = opts.cwd(dir);
        }
        self.run(cmd, opts).await?;
        Ok(out.contents())
    }

    /// Run `cmd` quietly and return its stdout
    pub async fn capture(&self, cmd: impl Into<Command>, cwd: Option<&Path>) -> RmkResult<String> {
        let out = CaptureBuffer::new();
        let mut opts = RunOptions::new().stdout(Arc::new(out.clone())).trace(false);
        if let Some(dir) = cwd {
            opts = opts.cwd(dir);
        }
        self.run(cmd, opts).await?;
        Ok(out.contents())
    }

    /// Run `cmd` to completion.
    ///
    /// Fails with [`RmkError::Process`] (embedding everything written to
    /// stderr) on a non-zero exit and with [`RmkError::Killed`] when the
    /// process was cancelled through the process table.
    pub async fn run(&self, cmd: impl Into<Command>, opts: RunOptions) -> RmkResult<()> {
        let cmd = cmd.into();
        let line = cmd.display();
        let stdout = opts.stdout.unwrap_or_else(|| self.stdout.clone());
        let stderr = opts.stderr.unwrap_or_else(|| self.stderr.clone());

        if opts.trace.unwrap_or(self.trace) {
            let traced = if self.verbose {
                line.clone()
            } else {
                let base = match &opts.cwd {
                    Some(dir) => dir.clone(),
                    None => std::env::current_dir()
                        .map_err(|e| RmkError::io("getting current directory", e))?,
                };
                relativize(&line, &base)
            };
            stdout.write(format!("{}\n", traced).as_bytes());
        }

        let mut command = cmd.to_tokio()?;
        command
            .stdin(if opts.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &opts.cwd {
            command.current_dir(dir);
        }
        // Own process group, so cancellation also reaches grandchildren
        #[cfg(unix)]
        command.process_group(0);

        debug!("Executing: {}", line);
        let mut child = command
            .spawn()
            .map_err(|e| RmkError::command_failed(&line, e))?;
        let pid = child
            .id()
            .ok_or_else(|| RmkError::Internal(format!("no pid for {}", line)))?;
        let guard = self.table.register(pid, &line);

        let captured_err = CaptureBuffer::new();
        let err_tee = Tee::new(vec![stderr, Arc::new(captured_err.clone())]);

        let child_out = child.stdout.take();
        let child_err = child.stderr.take();
        let (fed, pumped) = tokio::join!(
            feed_stdin(child.stdin.take(), opts.stdin),
            pump(child_out, child_err, stdout.as_ref(), &err_tee)
        );
        if let Err(e) = fed {
            debug!("Writing stdin of {} failed: {}", line, e);
        }
        pumped.map_err(|e| RmkError::io(format!("reading output of {}", line), e))?;

        let status = child
            .wait()
            .await
            .map_err(|e| RmkError::command_failed(&line, e))?;

        if !guard.release() {
            return Err(RmkError::Killed { command: line });
        }
        if !status.success() {
            return Err(RmkError::command_exec(line, captured_err.contents()));
        }
        Ok(())
    }
}

async fn feed_stdin(stdin: Option<ChildStdin>, data: Option<Vec<u8>>) -> std::io::Result<()> {
    if let (Some(mut stdin), Some(data)) = (stdin, data) {
        stdin.write_all(&data).await?;
        stdin.shutdown().await?;
    }
    Ok(())
}

async fn read_some<R: AsyncRead + Unpin>(reader: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize> {
    match reader {
        Some(r) => r.read(buf).await,
        None => Ok(0),
    }
}

/// Forward both pipes to their sinks until each reaches end of file
async fn pump<O, E>(
    mut out: Option<O>,
    mut err: Option<E>,
    out_sink: &dyn OutputSink,
    err_sink: &dyn OutputSink,
) -> std::io::Result<()>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out_buf = [0u8; READ_CHUNK];
    let mut err_buf = [0u8; READ_CHUNK];
    let mut out_done = out.is_none();
    let mut err_done = err.is_none();

    while !out_done || !err_done {
        tokio::select! {
            n = read_some(&mut out, &mut out_buf), if !out_done => {
                match n? {
                    0 => out_done = true,
                    n => out_sink.write(&out_buf[..n]),
                }
            }
            n = read_some(&mut err, &mut err_buf), if !err_done => {
                match n? {
                    0 => err_done = true,
                    n => err_sink.write(&err_buf[..n]),
                }
            }
        }
    }
    Ok(())
}
