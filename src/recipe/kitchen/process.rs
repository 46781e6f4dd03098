// src/recipe/kitchen/process.rs

//! Subprocess boundary for build and test steps
//!
//! Steps run through `sh -c` with stdin closed. The kitchen only ever sees
//! the exit code and the captured output streams.

use crate::error::{Error, Result};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// What a finished (or killed) step left behind
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout and stderr joined for diagnostics
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    fn killed_after(timeout: Duration) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: format!("timed out after {}s", timeout.as_secs()),
            timed_out: true,
        }
    }
}

/// Run `command` with `sh -c` in `workdir`
///
/// `env` is applied on top of the inherited environment. The shell leads its
/// own process group. Once `timeout` elapses the whole group is killed; that
/// is reported with `timed_out` set and no exit code, never as an `Err`.
///
/// The deadline covers the output streams too: a background job that keeps
/// stdout or stderr open after the shell exits counts against it.
pub fn run_shell(
    command: &str,
    workdir: &Path,
    env: &[(String, String)],
    timeout: Duration,
) -> Result<ProcessOutput> {
    debug!("sh -c {:?} (in {})", command, workdir.display());
    let deadline = Instant::now() + timeout;

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workdir)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .map_err(|e| Error::IoError(format!("Failed to spawn shell: {}", e)))?;

    // Drain both pipes while waiting so a chatty step cannot block on a full pipe
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let Some(status) = child.wait_timeout(timeout)? else {
        warn!("Step timed out after {}s, killing", timeout.as_secs());
        kill_group(&mut child);
        return Ok(ProcessOutput::killed_after(timeout));
    };

    match (collect(stdout, deadline), collect(stderr, deadline)) {
        (Some(stdout), Some(stderr)) => Ok(ProcessOutput {
            exit_code: status.code(),
            stdout,
            stderr,
            timed_out: false,
        }),
        _ => {
            warn!(
                "Step left processes holding its output after {}s, killing",
                timeout.as_secs()
            );
            kill_group(&mut child);
            Ok(ProcessOutput::killed_after(timeout))
        }
    }
}

/// SIGKILL every process in the step's group, then reap the shell
fn kill_group(child: &mut Child) {
    let group = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(group, Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", group, e);
        let _ = child.kill();
    }
    let _ = child.wait();
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// `None` when the stream is still open at `deadline`
fn collect(reader: Option<Receiver<String>>, deadline: Instant) -> Option<String> {
    match reader {
        None => Some(String::new()),
        Some(rx) => rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .ok(),
    }
}
