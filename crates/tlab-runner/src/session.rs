//! Interactive line-protocol driver for one client process.
//!
//! The peer frames responses only by a trailing prompt; there is no length
//! or tag prefix. Reads therefore accumulate until the output ends with the
//! 3-byte sentinel. That sentinel contract is the peer's existing behavior
//! and is reproduced here as-is; the buffered suffix scan merely replaces
//! per-byte blocking reads.

use anyhow::{anyhow, bail, Context, Result};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ProcessConfig;

/// Trailing byte sequence marking the end of one response/prompt cycle.
pub const PROMPT_SENTINEL: &str = "\n> ";

/// Literal substring the client prints once asynchronous work finished.
pub const COMPLETION_MARKER: &str = "Calculation complete!";

/// One client process driven over bidirectional text pipes. Strict
/// request/response turn-taking: every `write_command` is followed by
/// exactly one `read_to_prompt`, and neither may run concurrently on the
/// same session.
pub struct ClientSession {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: Option<BufReader<ChildStdout>>,
    // Dedup state so repeated identical protocol traffic (status polls)
    // is logged once and repeats demoted to debug.
    last_command: String,
    last_response: String,
}

impl ClientSession {
    pub fn spawn(cfg: &ProcessConfig) -> Result<Self> {
        let mut child = Command::new(cfg.program())
            .args(cfg.args())
            .current_dir(&cfg.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("unable to spawn client {:?}", cfg.command))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("client stdin pipe unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("client stdout pipe unavailable"))?;
        debug!(command = ?cfg.command, "client session started");
        Ok(Self {
            child,
            stdin: Some(stdin),
            reader: Some(BufReader::new(stdout)),
            last_command: String::new(),
            last_response: String::new(),
        })
    }

    /// Reads until the accumulated output ends with the prompt sentinel
    /// and returns everything read. Blocks for as long as the peer stays
    /// silent; EOF before the sentinel is an error. Relies on the peer
    /// emitting nothing after its prompt until the next command arrives.
    pub fn read_to_prompt(&mut self) -> Result<String> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("client stdout already closed"))?;
        let mut out: Vec<u8> = Vec::new();
        loop {
            let chunk = reader.fill_buf().context("reading client stdout")?;
            if chunk.is_empty() {
                bail!(
                    "client closed stdout before the prompt; partial output: {:?}",
                    String::from_utf8_lossy(&out)
                );
            }
            let n = chunk.len();
            out.extend_from_slice(chunk);
            reader.consume(n);
            if out.ends_with(PROMPT_SENTINEL.as_bytes()) {
                break;
            }
        }
        let out = String::from_utf8_lossy(&out).into_owned();
        if out != self.last_response {
            info!(response = %out.trim_end(), "client response");
            self.last_response = out.clone();
        } else {
            debug!("client response unchanged");
        }
        Ok(out)
    }

    /// Writes one command line and flushes so the peer observes it without
    /// buffering delay.
    pub fn write_command(&mut self, command: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("client stdin already closed"))?;
        if command != self.last_command {
            info!(%command, "sending command");
            self.last_command = command.to_string();
        } else {
            debug!(%command, "resending command");
        }
        stdin
            .write_all(command.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush())
            .with_context(|| format!("writing command {:?}", command))?;
        Ok(())
    }

    /// Closes the input side first (so the peer observes end-of-input
    /// after an already-sent `exit`), then the output side, then waits.
    /// A non-zero exit is logged, never fatal, never retried.
    pub fn close(mut self) -> Result<()> {
        drop(self.stdin.take());
        drop(self.reader.take());
        let status = self.child.wait().context("waiting for client exit")?;
        if status.success() {
            debug!("client session closed");
        } else {
            warn!(%status, "client exited with non-zero status");
        }
        Ok(())
    }
}

/// Doubling poll interval: 0.1s, 0.2s, ..., capped at 5s.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub const INITIAL: Duration = Duration::from_millis(100);
    pub const CAP: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self {
            current: Self::INITIAL,
        }
    }

    /// Returns the interval to sleep now and doubles it for the next poll.
    pub fn next_interval(&mut self) -> Duration {
        let current = self.current;
        self.current = (current * 2).min(Self::CAP);
        current
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a completed calculation poll.
#[derive(Debug)]
pub struct Completion {
    /// Produced file, already resolved against the client's workdir.
    pub produced_path: PathBuf,
    /// Wall-clock time from `start_calculation` to completion observed.
    pub elapsed: Duration,
}

/// Polls `get_status` until the completion marker appears, sleeping with
/// doubling backoff between misses. There is no retry limit or timeout: a
/// peer that never completes blocks the calling worker forever.
pub fn poll_to_completion(
    session: &mut ClientSession,
    client_workdir: &Path,
    started: Instant,
) -> Result<Completion> {
    let mut backoff = Backoff::new();
    loop {
        session.write_command("get_status")?;
        let response = session.read_to_prompt()?;
        if response.contains(COMPLETION_MARKER) {
            let elapsed = started.elapsed();
            let relative = extract_result_path(&response)?;
            return Ok(Completion {
                produced_path: client_workdir.join(relative),
                elapsed,
            });
        }
        thread::sleep(backoff.next_interval());
    }
}

/// Pulls the produced file path out of a completion response: the text
/// after `"to file "` up to the next `".\n"`.
fn extract_result_path(response: &str) -> Result<&str> {
    let (_, after) = response.split_once("to file ").ok_or_else(|| {
        anyhow!(
            "completion response does not name a result file: {:?}",
            response
        )
    })?;
    let (path, _) = after.split_once(".\n").ok_or_else(|| {
        anyhow!(
            "completion response result path is unterminated: {:?}",
            response
        )
    })?;
    Ok(path)
}
