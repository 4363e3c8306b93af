//! External process execution.
//!
//! [`ProcessRunner`] spawns a tool, streams its stdout and stderr line by
//! line to callbacks and kills the whole process tree when the caller's
//! cancellation token fires.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read process output: {0}")]
    Io(#[from] std::io::Error),
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Exited(i32),
    /// Terminated by a signal we did not send
    Signaled,
    /// Killed because the cancellation token fired
    Canceled,
}

/// Runs one external program; the resolved path is supplied by the caller
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    base_args: Vec<String>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
        }
    }

    /// Arguments placed before every call's own arguments
    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Command preloaded with the program and base arguments
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.base_args);
        command
    }

    /// Run to completion or cancellation.
    ///
    /// Each output line is handed to its callback as soon as it is read.
    /// Cancellation kills the process tree once; a token that fires after
    /// the process exited has no effect.
    pub async fn run<O, E>(
        &self,
        args: &[String],
        token: &CancellationToken,
        mut on_stdout: O,
        mut on_stderr: E,
    ) -> Result<ProcessExit, RunnerError>
    where
        O: FnMut(String),
        E: FnMut(String),
    {
        if token.is_cancelled() {
            debug!(program = %self.program.display(), "Canceled before start");
            return Ok(ProcessExit::Canceled);
        }

        let mut command = self.command();
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        debug!(
            program = %self.program.display(),
            pid = child.id(),
            "Process started"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr was not captured"))?;
        let mut stdout_lines = BufReader::new(stdout).split(b'\n');
        let mut stderr_lines = BufReader::new(stderr).split(b'\n');
        let mut stdout_open = true;
        let mut stderr_open = true;

        let ended = loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break Ended::Canceled,

                line = stdout_lines.next_segment(), if stdout_open => match line {
                    Ok(Some(line)) => on_stdout(decode_line(&line)),
                    Ok(None) => stdout_open = false,
                    Err(e) => break Ended::Failed(e),
                },

                line = stderr_lines.next_segment(), if stderr_open => match line {
                    Ok(Some(line)) => on_stderr(decode_line(&line)),
                    Ok(None) => stderr_open = false,
                    Err(e) => break Ended::Failed(e),
                },

                status = child.wait(), if !stdout_open && !stderr_open => match status {
                    Ok(status) => break Ended::Exited(status),
                    Err(e) => break Ended::Failed(e),
                },
            }
        };

        match ended {
            Ended::Exited(status) => {
                debug!(program = %self.program.display(), status = %status, "Process exited");
                Ok(match status.code() {
                    Some(code) => ProcessExit::Exited(code),
                    None => ProcessExit::Signaled,
                })
            }
            Ended::Canceled => {
                kill_process_tree(&mut child).await;
                Ok(ProcessExit::Canceled)
            }
            Ended::Failed(e) => {
                warn!(program = %self.program.display(), error = %e, "Lost process output");
                kill_process_tree(&mut child).await;
                Err(RunnerError::Io(e))
            }
        }
    }
}

enum Ended {
    Exited(ExitStatus),
    Canceled,
    Failed(std::io::Error),
}

/// Tools echo file names and tags in whatever encoding they carry
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Kill the child and everything it started, then reap it
async fn kill_process_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        debug!(pid, "Killing process tree");

        #[cfg(unix)]
        let result = {
            let group = format!("-{}", pid);
            Command::new("kill")
                .args(["-KILL", "--", group.as_str()])
                .output()
                .await
        };

        #[cfg(windows)]
        let result = {
            let pid = pid.to_string();
            Command::new("taskkill")
                .args(["/F", "/T", "/PID", pid.as_str()])
                .output()
                .await
        };

        if let Err(e) = result {
            warn!(pid, error = %e, "Failed to kill process tree");
        }
    }

    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Process already gone");
    }
    if let Err(e) = child.wait().await {
        warn!(error = %e, "Failed to reap killed process");
    }
}
