//! Child processes with a wall-clock limit and bounded output capture.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long pipe threads may keep running once a timed-out command is killed.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Limits applied to every external command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLimits {
    /// Kill the command after this long.
    pub timeout: Duration,
    /// Keep at most this many bytes of stdout and of stderr.
    pub output_limit_bytes: usize,
}

/// What a finished (or killed) child left behind.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes of stdout that were drained but not kept.
    pub stdout_dropped: usize,
    pub stderr_dropped: usize,
    pub timed_out: bool,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Last line of stderr, for error messages.
    pub fn stderr_tail(&self) -> String {
        String::from_utf8_lossy(&self.stderr)
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

/// Run `cmd`, feeding `stdin` if given, and capture its output within `limits`.
///
/// Stdin is written and both pipes are drained on their own threads, so a child
/// that writes before it finishes reading cannot deadlock us. On Unix the
/// command runs in its own process group and a timeout kills the whole group;
/// pipes still held open after that are abandoned.
#[instrument(
    skip_all,
    fields(program = ?cmd.get_program(), timeout_ms = limits.timeout.as_millis() as u64)
)]
pub fn run_with_limits(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    limits: CommandLimits,
) -> Result<CapturedOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning command");
    let mut child = cmd.spawn().map_err(|err| {
        error!(%err, "failed to spawn command");
        anyhow!(err).context(format!("spawn {:?}", cmd.get_program()))
    })?;

    let writer = match stdin {
        Some(input) => {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            Some(PipeThread::spawn("stdin", move || -> Result<()> {
                match pipe.write_all(&input) {
                    // The child may exit without reading everything.
                    Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                    other => other.context("write stdin"),
                }
            }))
        }
        None => None,
    };
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let limit = limits.output_limit_bytes;
    let stdout_reader = PipeThread::spawn("stdout", move || drain_bounded(stdout, limit));
    let stderr_reader = PipeThread::spawn("stderr", move || drain_bounded(stderr, limit));

    let mut timed_out = false;
    let status = match child
        .wait_timeout(limits.timeout)
        .context("wait for command")?
    {
        Some(status) => status,
        None => {
            warn!(
                timeout_ms = limits.timeout.as_millis() as u64,
                "command timed out, killing"
            );
            timed_out = true;
            kill_group(&mut child)?;
            child.wait().context("wait for killed command")?
        }
    };

    let grace = timed_out.then_some(KILL_GRACE);
    if let Some(writer) = writer {
        writer.finish(grace)?;
    }
    let (stdout, stdout_dropped) = stdout_reader.finish(grace)?.unwrap_or_default();
    let (stderr, stderr_dropped) = stderr_reader.finish(grace)?.unwrap_or_default();
    if stdout_dropped > 0 || stderr_dropped > 0 {
        warn!(stdout_dropped, stderr_dropped, "command output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CapturedOutput {
        status,
        stdout,
        stderr,
        stdout_dropped,
        stderr_dropped,
        timed_out,
    })
}

#[cfg(unix)]
fn kill_group(child: &mut Child) -> Result<()> {
    // The child leads its own group, so the group id is its pid.
    let group = format!("-{}", child.id());
    match Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => Ok(()),
        other => {
            warn!(?other, "failed to kill process group, killing child only");
            child.kill().context("kill command")
        }
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

/// A pipe worker whose result can be awaited with a deadline.
struct PipeThread<T> {
    name: &'static str,
    rx: mpsc::Receiver<Result<T>>,
}

impl<T: Send + 'static> PipeThread<T> {
    fn spawn(name: &'static str, work: impl FnOnce() -> Result<T> + Send + 'static) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            // The receiver is gone only if we abandoned this pipe.
            let _ = tx.send(work());
        });
        Self { name, rx }
    }

    /// Wait for the worker. With a `grace` period, give up after it and
    /// return `None`; the worker is left to finish on its own.
    fn finish(self, grace: Option<Duration>) -> Result<Option<T>> {
        let received = match grace {
            None => self.rx.recv().ok(),
            Some(grace) => match self.rx.recv_timeout(grace) {
                Ok(result) => Some(result),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(pipe = self.name, "pipe still open after kill, abandoning");
                    return Ok(None);
                }
                Err(RecvTimeoutError::Disconnected) => None,
            },
        };
        match received {
            Some(result) => result.with_context(|| format!("{} pipe", self.name)).map(Some),
            None => bail!("{} pipe thread panicked", self.name),
        }
    }
}

fn drain_bounded<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(kept.len()));
        kept.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }
    Ok((kept, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(timeout_ms: u64, output_limit_bytes: usize) -> CommandLimits {
        CommandLimits {
            timeout: Duration::from_millis(timeout_ms),
            output_limit_bytes,
        }
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn pipes_stdin_through() {
        let output = run_with_limits(sh("cat"), Some(b"hello".to_vec()), limits(5_000, 1_000))
            .expect("run");
        assert!(output.success());
        assert_eq!(output.stdout, b"hello");
    }

    #[test]
    fn bounds_captured_output() {
        let output =
            run_with_limits(sh("printf 0123456789"), None, limits(5_000, 4)).expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_dropped, 6);
    }

    #[test]
    fn kills_on_timeout() {
        let output = run_with_limits(sh("sleep 5"), None, limits(100, 1_000)).expect("run");
        assert!(output.timed_out);
        assert!(!output.success());
    }

    #[test]
    fn timeout_does_not_wait_for_grandchildren() {
        let started = std::time::Instant::now();
        let output =
            run_with_limits(sh("sleep 3; echo hi"), None, limits(200, 1_000)).expect("run");
        assert!(output.timed_out);
        assert!(output.stdout.is_empty());
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn reports_last_stderr_line() {
        let output = run_with_limits(
            sh("echo first >&2; echo 'model unavailable' >&2; exit 3"),
            None,
            limits(5_000, 1_000),
        )
        .expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stderr_tail(), "model unavailable");
    }

    #[test]
    fn missing_program_is_an_error() {
        let err = run_with_limits(
            Command::new("promptree-no-such-program"),
            None,
            limits(1_000, 1_000),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("spawn"));
    }
}
