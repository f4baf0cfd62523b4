//! Child-process runner used by the device bridge and the analyzer.

use std::ffi::OsStr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// The outcome of running one external command to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// The exit code, or `None` if the process was killed by a signal or
    /// timed out.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Whether the process was killed for exceeding its timeout.
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// A one-line description of a failed run, for error messages.
    pub fn failure_summary(&self) -> String {
        if self.timed_out {
            return format!("timed out after {:.1}s", self.duration.as_secs_f64());
        }
        let code = self
            .exit_code
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exit {code}")
        } else {
            format!("exit {code}: {}", truncate_snippet(stderr, 512))
        }
    }
}

/// Run `program` with `args`, capturing output, killing it after `timeout`.
///
/// Returns `Err` only when the process could not be spawned or waited on.
/// A non-zero exit or a timeout is reported through [`CommandOutput`].
pub async fn run_command<P, I, S>(program: P, args: I, timeout: Duration) -> Result<CommandOutput>
where
    P: AsRef<OsStr>,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let start = Instant::now();
    let program = program.as_ref();
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    let cmdline = command_line(program, &args);

    tracing::debug!(command = %cmdline, "running command");

    let mut child = Command::new(program)
        .args(&args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to execute {cmdline}"))?;

    // Read both pipes while waiting so a chatty child cannot fill a pipe
    // buffer and block forever.
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let read_stdout = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stdout_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    let read_stderr = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stderr_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    match tokio::time::timeout(timeout, async {
        tokio::join!(child.wait(), read_stdout, read_stderr)
    })
    .await
    {
        Ok((Ok(status), stdout, stderr)) => {
            let output = CommandOutput {
                exit_code: status.code(),
                stdout,
                stderr,
                duration: start.elapsed(),
                timed_out: false,
            };
            tracing::debug!(
                command = %cmdline,
                exit_code = ?output.exit_code,
                elapsed_ms = output.duration.as_millis() as u64,
                "command finished"
            );
            Ok(output)
        }
        Ok((Err(e), _, _)) => Err(e).with_context(|| format!("failed to wait on {cmdline}")),
        Err(_) => {
            let _ = child.kill().await;
            tracing::warn!(command = %cmdline, timeout_secs = timeout.as_secs(), "command timed out");
            Ok(CommandOutput {
                exit_code: None,
                stdout: String::new(),
                stderr: format!("{cmdline} timed out after {}s", timeout.as_secs()),
                duration: start.elapsed(),
                timed_out: true,
            })
        }
    }
}

fn command_line(program: &OsStr, args: &[std::ffi::OsString]) -> String {
    let mut line = program.to_string_lossy().into_owned();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

/// Truncate a string to at most `max_bytes` bytes, appending "..." if
/// truncated.
fn truncate_snippet(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_owned();
    truncated.push_str("...");
    truncated
}
