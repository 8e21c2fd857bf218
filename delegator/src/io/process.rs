//! Piped child processes for the model and executor adapters.
//!
//! Both adapters hand text to a configured command on stdin and read its
//! reply from stdout. [`run_piped`] bounds the call with a timeout and keeps
//! at most `output_limit_bytes` of each stream in memory.

use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::io::config::CommandConfig;

/// Bytes kept from one output stream, plus how many were discarded.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// How a piped child finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Finished(ExitStatus),
    /// Killed after exceeding its timeout.
    TimedOut,
}

/// Result of [`run_piped`].
#[derive(Debug)]
pub struct PipedRun {
    pub exit: Exit,
    pub stdout: Captured,
    pub stderr: Captured,
}

impl PipedRun {
    pub fn succeeded(&self) -> bool {
        matches!(self.exit, Exit::Finished(status) if status.success())
    }

    /// Exit code of a finished child; `None` on timeout or signal.
    pub fn exit_code(&self) -> Option<i32> {
        match self.exit {
            Exit::Finished(status) => status.code(),
            Exit::TimedOut => None,
        }
    }

    /// Text explaining an unsuccessful exit: stderr when the child wrote any,
    /// stdout otherwise, with a note when stderr was cut short.
    pub fn failure_text(&self) -> String {
        let stderr = self.stderr.text();
        if stderr.trim().is_empty() {
            return self.stdout.text().trim().to_string();
        }
        let mut detail = stderr.trim().to_string();
        if self.stderr.dropped > 0 {
            detail.push_str(&format!(" [stderr truncated {} bytes]", self.stderr.dropped));
        }
        detail
    }
}

/// Build a [`Command`] from an argv-style list (`["program", "arg", ...]`).
pub fn command_from_argv(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Spawn `config.command`, write `input` to its stdin and wait up to `timeout`.
///
/// Both output pipes are drained on their own threads while the child runs,
/// so a chatty child cannot block on a full pipe. A child that exits without
/// reading all of its stdin is not an error.
#[instrument(skip_all, fields(program = ?config.command.first(), timeout_ms = timeout.as_millis() as u64))]
pub fn run_piped(config: &CommandConfig, input: &[u8], timeout: Duration) -> Result<PipedRun> {
    let mut cmd = command_from_argv(&config.command)?;
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {:?}", config.command))?;
    debug!(pid = child.id(), "spawned child");

    let limit = config.output_limit_bytes;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;

    // Stdin is written off-thread so the timeout also covers a child that
    // never reads it.
    let (exit, stdout, stderr) = thread::scope(|scope| -> Result<_> {
        let feeder = scope.spawn(move || feed_stdin(stdin, input));
        let out = scope.spawn(move || drain(stdout, limit));
        let err = scope.spawn(move || drain(stderr, limit));
        let exit = wait_or_kill(&mut child, timeout).inspect_err(|_| {
            // Unblocks the scoped threads before the scope joins them.
            let _ = child.kill();
        })?;
        feeder
            .join()
            .map_err(|_| anyhow!("stdin writer panicked"))??;
        let stdout = out
            .join()
            .map_err(|_| anyhow!("stdout reader panicked"))?
            .context("read stdout")?;
        let stderr = err
            .join()
            .map_err(|_| anyhow!("stderr reader panicked"))?
            .context("read stderr")?;
        Ok((exit, stdout, stderr))
    })?;

    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "child output exceeded limit"
        );
    }
    debug!(?exit, "child finished");
    Ok(PipedRun {
        exit,
        stdout,
        stderr,
    })
}

fn feed_stdin(mut stdin: ChildStdin, input: &[u8]) -> Result<()> {
    // `stdin` is dropped on return so the child sees EOF.
    match stdin.write_all(input) {
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
            debug!("child closed stdin early");
            Ok(())
        }
        other => other.context("write stdin"),
    }
}

fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<Exit> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for child")? {
        return Ok(Exit::Finished(status));
    }
    warn!(timeout_ms = timeout.as_millis() as u64, "child timed out; killing");
    child.kill().context("kill child")?;
    child.wait().context("reap killed child")?;
    Ok(Exit::TimedOut)
}

fn drain<R: Read>(mut reader: R, limit: usize) -> std::io::Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}
