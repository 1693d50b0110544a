//! Deadline-bound subprocess execution.
//!
//! Children run in their own process group with stdout and stderr merged
//! into one pipe. Once the child exits, or the deadline expires, the whole
//! group is SIGKILLed, so helpers forked by an interpreter die with it and
//! cannot hold the pipe open.

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::process::Command;

use crate::error::{InfraError, StratoResult};

/// How long to wait for a killed group to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to keep reading output after the group was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 8192;

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    /// Toolchain variables, applied before the function environment.
    pub env: Vec<(String, String)>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// What a finished (or killed) child left behind.
#[derive(Debug)]
pub struct ProcessOutput {
    /// `None` when the child was killed at the deadline.
    pub status: Option<ExitStatus>,
    /// Combined stdout/stderr, lossily decoded.
    pub output: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }
}

/// Run `command` in `cwd` with `environment` layered over the inherited
/// environment, killing it if it outlives `deadline`.
pub async fn run(
    command: &CommandLine,
    cwd: &Path,
    environment: &HashMap<String, String>,
    deadline: Duration,
) -> StratoResult<ProcessOutput> {
    let spawn_failure = |reason: String| InfraError::Spawn {
        program: command.program.clone(),
        reason,
    };

    // Close-on-exec so concurrently spawned children never inherit our write end.
    let (reader, writer) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
        .map_err(|e| spawn_failure(e.to_string()))?;
    let writer_err: OwnedFd = writer
        .try_clone()
        .map_err(|e| spawn_failure(e.to_string()))?;

    let started = Instant::now();

    // The Command owns the parent's copies of the write end; dropping it
    // right after spawn lets the reader see EOF once the child exits.
    let mut child = {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(cwd)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .envs(environment)
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(writer_err))
            .process_group(0)
            .kill_on_drop(true);
        cmd.spawn().map_err(|e| spawn_failure(e.to_string()))?
    };

    let pid = child.id();
    tracing::debug!(program = %command.program, pid = ?pid, "Spawned subprocess");

    let mut receiver =
        pipe::Receiver::from_owned_fd(reader).map_err(|e| spawn_failure(e.to_string()))?;
    let mut captured = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut eof = false;
    let expires = tokio::time::Instant::now() + deadline;

    // Exit of the child ends the run, not EOF: a background process it left
    // behind may still hold the write end.
    let finished = loop {
        tokio::select! {
            status = child.wait() => break Some(status),
            read = receiver.read(&mut chunk), if !eof => match read {
                Ok(0) => eof = true,
                Ok(n) => captured.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    tracing::debug!(program = %command.program, error = %e, "Output pipe read failed");
                    eof = true;
                }
            },
            _ = tokio::time::sleep_until(expires) => break None,
        }
    };

    kill_group(pid);
    let (status, timed_out) = match finished {
        Some(Ok(status)) => (Some(status), false),
        Some(Err(e)) => {
            return Err(InfraError::Spawn {
                program: command.program.clone(),
                reason: format!("waiting for child: {}", e),
            }
            .into());
        }
        None => {
            let _ = tokio::time::timeout(REAP_TIMEOUT, child.wait()).await;
            tracing::debug!(
                program = %command.program,
                pid = ?pid,
                deadline_ms = deadline.as_millis() as u64,
                "Subprocess killed at deadline"
            );
            (None, true)
        }
    };

    if !eof {
        let _ = tokio::time::timeout(DRAIN_GRACE, receiver.read_to_end(&mut captured)).await;
    }

    Ok(ProcessOutput {
        status,
        output: String::from_utf8_lossy(&captured).into_owned(),
        timed_out,
        elapsed: started.elapsed(),
    })
}

/// SIGKILL the child's process group (the group id equals the child's pid).
fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid = pid, error = %e, "Failed to kill process group"),
    }
}

/// Whether `program` resolves to a file, either directly or through `PATH`.
pub fn is_available(program: &str) -> bool {
    if program.contains('/') {
        return Path::new(program).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths)
                .map(|dir: PathBuf| dir.join(program))
                .any(|candidate| candidate.is_file())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandLine {
        CommandLine::new("/bin/sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_merges_output_streams() {
        let dir = tempfile::tempdir().unwrap();
        let out = run(
            &sh("echo out; echo err 1>&2; echo done"),
            dir.path(),
            &HashMap::new(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(out.success());
        assert!(!out.timed_out);
        assert!(out.output.contains("out\n"));
        assert!(out.output.contains("err\n"));
        assert!(out.output.ends_with("done\n"));
    }

    #[tokio::test]
    async fn test_environment_layered() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = HashMap::new();
        env.insert("STRATO_TEST_VALUE".to_string(), "layered".to_string());

        let out = run(
            &sh("printf '%s' \"$STRATO_TEST_VALUE\"; pwd"),
            dir.path(),
            &env,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(out.output.starts_with("layered"));
        assert!(std::env::var("STRATO_TEST_VALUE").is_err());
    }

    #[tokio::test]
    async fn test_deadline_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let out = run(
            &sh("echo starting; sleep 30 & sleep 30"),
            dir.path(),
            &HashMap::new(),
            Duration::from_millis(300),
        )
        .await
        .unwrap();

        assert!(out.timed_out);
        assert!(out.status.is_none());
        assert!(out.output.contains("starting"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_background_child_does_not_hold_run_open() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let out = run(
            &sh("sleep 30 & echo '{\"message\":\"X\"}'"),
            dir.path(),
            &HashMap::new(),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert!(out.success());
        assert!(!out.timed_out);
        assert!(out.output.contains(r#"{"message":"X"}"#));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let out = run(&sh("exit 3"), dir.path(), &HashMap::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.status.and_then(|s| s.code()), Some(3));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(
            &CommandLine::new("/nonexistent/strato-runtime"),
            dir.path(),
            &HashMap::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::StratoError::Infrastructure(InfraError::Spawn { .. })
        ));
    }

    #[test]
    fn test_is_available() {
        assert!(is_available("sh"));
        assert!(!is_available("strato-definitely-missing-binary"));
    }
}
