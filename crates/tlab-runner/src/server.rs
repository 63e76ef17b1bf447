use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

use crate::config::ProcessConfig;

/// Substring the server must print on a completed line once it accepts
/// connections.
pub const READY_MARKER: &str = "Listening on port ";

/// The shared server process: spawned once, readiness-gated, stopped only
/// after every worker has joined.
#[derive(Debug)]
pub struct ServerHandle {
    child: Child,
    drain: Option<JoinHandle<io::Result<u64>>>,
}

impl ServerHandle {
    /// Spawns the server and blocks until its stdout contains the
    /// readiness marker on a completed line. Output seen so far and all
    /// later output is written to the log sink; a server that never emits
    /// the marker blocks this call indefinitely.
    pub fn start(cfg: &ProcessConfig, log_path: &Path) -> Result<Self> {
        let mut child = Command::new(cfg.program())
            .args(cfg.args())
            .current_dir(&cfg.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("unable to spawn server {:?}", cfg.command))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("server stdout pipe unavailable"))?;

        let mut seen = String::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stdout.read(&mut buf).context("reading server stdout")?;
            if n == 0 {
                bail!(
                    "server exited before becoming ready; output so far: {:?}",
                    seen
                );
            }
            seen.push_str(&String::from_utf8_lossy(&buf[..n]));
            if seen.contains(READY_MARKER) && seen.ends_with('\n') {
                break;
            }
        }
        info!("server is ready");

        let mut log = fs::File::create(log_path)
            .with_context(|| format!("unable to create {}", log_path.display()))?;
        log.write_all(seen.as_bytes())?;
        let drain = thread::spawn(move || {
            let copied = io::copy(&mut stdout, &mut log);
            let _ = log.flush();
            copied
        });

        Ok(Self {
            child,
            drain: Some(drain),
        })
    }

    /// Sends the graceful termination signal, waits for exit, and joins
    /// the log drain.
    pub fn stop(mut self) -> Result<()> {
        terminate(&mut self.child)?;
        let status = self.child.wait().context("waiting for server exit")?;
        if let Some(drain) = self.drain.take() {
            match drain.join() {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(%err, "server log drain failed"),
                Err(_) => warn!("server log drain panicked"),
            }
        }
        info!(%status, "server stopped");
        Ok(())
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> Result<()> {
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        return Err(io::Error::last_os_error()).context("sending SIGTERM to server");
    }
    Ok(())
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> Result<()> {
    child.kill().context("killing server")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tlab_server_{}_{}_{}",
            tag,
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    fn sh(dir: &Path, script: &str) -> ProcessConfig {
        let path = dir.join("peer.sh");
        fs::write(&path, script).expect("write script");
        ProcessConfig {
            command: vec!["sh".into(), path.to_string_lossy().into_owned()],
            workdir: dir.to_path_buf(),
        }
    }

    #[test]
    fn start_waits_for_readiness_and_stop_terminates() {
        let dir = temp_dir("ready");
        let cfg = sh(
            &dir,
            "echo 'Server starting'\necho 'Listening on port 7878'\nexec sleep 600\n",
        );
        let log_path = dir.join("server.log");
        let server = ServerHandle::start(&cfg, &log_path).expect("server becomes ready");
        server.stop().expect("server stops on signal");
        let log = fs::read_to_string(&log_path).expect("log exists");
        assert!(log.contains("Listening on port 7878"), "log: {:?}", log);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn start_fails_when_server_exits_without_marker() {
        let dir = temp_dir("noready");
        let cfg = sh(&dir, "echo 'booting'\nexit 0\n");
        let err = ServerHandle::start(&cfg, &dir.join("server.log"))
            .expect_err("must fail without readiness line");
        assert!(
            err.to_string().contains("before becoming ready"),
            "{}",
            err
        );
        let _ = fs::remove_dir_all(dir);
    }
}
