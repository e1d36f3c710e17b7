use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tokio::process::{Child, Command};

use crate::console::Console;
use crate::models::CommandLine;

pub const EXIT_TIMEOUT: i32 = 124;
pub const EXIT_NOT_FOUND: i32 = 127;
pub const EXIT_INTERRUPTED: i32 = 130;

/// Bound for captures the operator asked for.
pub const CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound for background discovery probes.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);

const TERMINATE_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub code: i32,
    pub output: String,
}

/// The ways a built command can be run. `exec_replace` is separate because it
/// never hands control back.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Child inherits the terminal.
    async fn run_interactive(&self, cmd: &CommandLine, preview: bool) -> Result<i32>;

    /// Output forwarded to the console line by line as it arrives.
    async fn run_streaming(&self, cmd: &CommandLine, preview: bool) -> Result<i32>;

    /// Run to completion within [`CAPTURE_TIMEOUT`]; stdout followed by stderr.
    async fn run_capture(&self, cmd: &CommandLine, preview: bool) -> Result<Captured>;

    /// No preview, caller-chosen bound, trimmed stdout only.
    async fn run_capture_silent(&self, cmd: &CommandLine, timeout: Duration) -> Result<Captured>;
}

pub struct ProcessExecutor {
    console: Arc<dyn Console>,
}

impl ProcessExecutor {
    pub fn new(console: Arc<dyn Console>) -> Self {
        Self { console }
    }

    /// `Ok(None)` when the program does not exist.
    fn spawn(&self, mut command: Command, cmd: &CommandLine, report: bool) -> Result<Option<Child>> {
        match command.spawn() {
            Ok(child) => Ok(Some(child)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!("Command not found: {}", cmd.program());
                if report {
                    self.console
                        .error(&format!("Command not found: {}", cmd.program()));
                }
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to start {}", cmd.program())),
        }
    }

    fn interrupted(&self) {
        self.console.warn("\nInterrupted.");
    }

    async fn capture(&self, cmd: &CommandLine, limit: Duration) -> Result<CaptureOutcome> {
        let mut command = base_command(cmd);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = match self.spawn(command, cmd, false)? {
            Some(child) => child,
            None => return Ok(CaptureOutcome::NotFound),
        };

        match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => {
                let output = output.context("Failed to collect command output")?;
                Ok(CaptureOutcome::Finished {
                    code: exit_code(output.status),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            // dropping the future drops the child, and kill_on_drop ends it
            Err(_) => {
                tracing::warn!("Command timed out after {:?}: {}", limit, cmd);
                Ok(CaptureOutcome::TimedOut)
            }
        }
    }
}

enum CaptureOutcome {
    Finished {
        code: i32,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    NotFound,
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn run_interactive(&self, cmd: &CommandLine, preview: bool) -> Result<i32> {
        if preview {
            self.console.preview(cmd);
        }
        tracing::info!("Running interactively: {}", cmd);

        let mut command = base_command(cmd);
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let mut child = match self.spawn(command, cmd, true)? {
            Some(child) => child,
            None => return Ok(EXIT_NOT_FOUND),
        };

        tokio::select! {
            status = child.wait() => {
                let code = exit_code(status.context("Failed to wait for command")?);
                tracing::info!("Interactive command exited with {}", code);
                Ok(code)
            }
            _ = tokio::signal::ctrl_c() => {
                self.interrupted();
                terminate(&mut child).await;
                Ok(EXIT_INTERRUPTED)
            }
        }
    }

    async fn run_streaming(&self, cmd: &CommandLine, preview: bool) -> Result<i32> {
        if preview {
            self.console.preview(cmd);
        }
        tracing::info!("Streaming: {}", cmd);

        let mut command = base_command(cmd);
        command.stdin(Stdio::inherit());
        let merged = merge_output(&mut command).context("Failed to create output pipe")?;

        // spawn consumes `command`, closing our copies of the write end
        let mut child = match self.spawn(command, cmd, true)? {
            Some(child) => child,
            None => return Ok(EXIT_NOT_FOUND),
        };

        let mut output = merged.or_else(|| child.stdout.take().map(line_reader));

        let interrupt = tokio::signal::ctrl_c();
        tokio::pin!(interrupt);

        while output.is_some() {
            tokio::select! {
                line = next_line(&mut output) => match line {
                    Some(line) => self.console.print(&line),
                    None => output = None,
                },
                _ = &mut interrupt => {
                    self.interrupted();
                    terminate(&mut child).await;
                    return Ok(EXIT_INTERRUPTED);
                }
            }
        }

        tokio::select! {
            status = child.wait() => {
                let code = exit_code(status.context("Failed to wait for command")?);
                tracing::info!("Streamed command exited with {}", code);
                Ok(code)
            }
            _ = &mut interrupt => {
                self.interrupted();
                terminate(&mut child).await;
                Ok(EXIT_INTERRUPTED)
            }
        }
    }

    async fn run_capture(&self, cmd: &CommandLine, preview: bool) -> Result<Captured> {
        if preview {
            self.console.preview(cmd);
        }

        Ok(match self.capture(cmd, CAPTURE_TIMEOUT).await? {
            CaptureOutcome::Finished {
                code,
                stdout,
                stderr,
            } => Captured {
                code,
                output: stdout + &stderr,
            },
            CaptureOutcome::TimedOut => Captured {
                code: EXIT_TIMEOUT,
                output: format!(
                    "Command timed out after {} seconds.",
                    CAPTURE_TIMEOUT.as_secs()
                ),
            },
            CaptureOutcome::NotFound => Captured {
                code: EXIT_NOT_FOUND,
                output: format!("Command not found: {}", cmd.program()),
            },
        })
    }

    async fn run_capture_silent(&self, cmd: &CommandLine, timeout: Duration) -> Result<Captured> {
        Ok(match self.capture(cmd, timeout).await? {
            CaptureOutcome::Finished { code, stdout, .. } => Captured {
                code,
                output: stdout.trim().to_string(),
            },
            CaptureOutcome::TimedOut => Captured {
                code: EXIT_TIMEOUT,
                output: String::new(),
            },
            CaptureOutcome::NotFound => Captured {
                code: EXIT_NOT_FOUND,
                output: String::new(),
            },
        })
    }
}

fn base_command(cmd: &CommandLine) -> Command {
    let mut command = Command::new(cmd.program());
    command.args(cmd.arguments()).kill_on_drop(true);
    command
}

/// Points stdout and stderr of `command` at one pipe so lines arrive in the
/// order the child wrote them.
#[cfg(unix)]
fn merge_output(command: &mut Command) -> std::io::Result<Option<LineReader>> {
    use std::os::fd::OwnedFd;
    use tokio::net::unix::pipe::Receiver;

    let (reader, writer) = std::io::pipe()?;
    command.stdout(writer.try_clone()?).stderr(writer);
    let receiver = Receiver::from_owned_fd(OwnedFd::from(reader))?;
    Ok(Some(line_reader(receiver)))
}

/// Without unix pipes only stdout is read; stderr goes straight to the terminal.
#[cfg(not(unix))]
fn merge_output(command: &mut Command) -> std::io::Result<Option<LineReader>> {
    command.stdout(Stdio::piped()).stderr(Stdio::inherit());
    Ok(None)
}

type LineReader = Split<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;

fn line_reader<R: AsyncRead + Send + Unpin + 'static>(pipe: R) -> LineReader {
    let boxed: Box<dyn AsyncRead + Send + Unpin> = Box::new(pipe);
    BufReader::new(boxed).split(b'\n')
}

/// Next line of a pipe, lossily decoded. `None` at EOF or on a read error.
async fn next_line(reader: &mut Option<LineReader>) -> Option<String> {
    let reader = reader.as_mut()?;
    match reader.next_segment().await {
        Ok(Some(bytes)) => {
            let line = String::from_utf8_lossy(&bytes);
            Some(line.trim_end_matches('\r').to_string())
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Stopped reading command output: {}", e);
            None
        }
    }
}

/// Ask the child to stop, then kill it if it is still around after a grace period.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
            && tokio::time::timeout(TERMINATE_GRACE, child.wait())
                .await
                .is_ok()
        {
            return;
        }
    }

    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill child process: {}", e);
    }
}

/// Exit code of a finished child; signal deaths map to 128 + signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

/// Replace the current process with `cmd`.
///
/// Only returns when the exec failed, with the exit code the caller should
/// terminate with. Anything that must be persisted has to be written before
/// calling this.
pub fn exec_replace(cmd: &CommandLine, console: &dyn Console, preview: bool) -> i32 {
    if preview {
        console.preview(cmd);
    }
    tracing::info!("Exec: {}", cmd);

    #[cfg(unix)]
    let err = {
        use std::os::unix::process::CommandExt;
        std::process::Command::new(cmd.program())
            .args(cmd.arguments())
            .exec()
    };

    #[cfg(not(unix))]
    let err = match std::process::Command::new(cmd.program())
        .args(cmd.arguments())
        .status()
    {
        Ok(status) => return exit_code(status),
        Err(e) => e,
    };

    if err.kind() == ErrorKind::NotFound {
        console.error(&format!("Command not found: {}", cmd.program()));
        EXIT_NOT_FOUND
    } else {
        console.error(&format!("Failed to run {}: {}", cmd.program(), err));
        1
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Executor that runs nothing: it records each call and replays queued
    /// results for silent captures.
    #[derive(Default)]
    pub struct RecordingExecutor {
        pub code: i32,
        calls: Mutex<Vec<(&'static str, Vec<String>)>>,
        captures: Mutex<VecDeque<Captured>>,
    }

    impl RecordingExecutor {
        pub fn with_code(code: i32) -> Self {
            Self {
                code,
                ..Self::default()
            }
        }

        pub fn with_captures(captures: Vec<Captured>) -> Self {
            Self {
                captures: Mutex::new(captures.into()),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<(&'static str, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn modes(&self) -> Vec<&'static str> {
            self.calls().into_iter().map(|(mode, _)| mode).collect()
        }

        fn record(&self, mode: &'static str, cmd: &CommandLine) {
            self.calls
                .lock()
                .unwrap()
                .push((mode, cmd.tokens().to_vec()));
        }
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        async fn run_interactive(&self, cmd: &CommandLine, _preview: bool) -> Result<i32> {
            self.record("interactive", cmd);
            Ok(self.code)
        }

        async fn run_streaming(&self, cmd: &CommandLine, _preview: bool) -> Result<i32> {
            self.record("streaming", cmd);
            Ok(self.code)
        }

        async fn run_capture(&self, cmd: &CommandLine, _preview: bool) -> Result<Captured> {
            self.record("capture", cmd);
            Ok(Captured {
                code: self.code,
                output: String::new(),
            })
        }

        async fn run_capture_silent(&self, cmd: &CommandLine, _timeout: Duration) -> Result<Captured> {
            self.record("silent", cmd);
            Ok(self.captures.lock().unwrap().pop_front().unwrap_or(Captured {
                code: 0,
                output: String::new(),
            }))
        }
    }
}
