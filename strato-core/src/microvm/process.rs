//! Hypervisor process management.
//!
//! Spawns the hypervisor in its own process group and waits for its API
//! socket to appear.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::error::InfraError;

/// Poll interval while waiting for the API socket.
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A running hypervisor.
///
/// Dropping the handle kills the process group and removes the socket.
#[derive(Debug)]
pub struct HypervisorProcess {
    vm_id: String,
    child: Child,
    pid: Option<u32>,
    socket_path: PathBuf,
}

impl HypervisorProcess {
    /// Spawn `binary --api-sock <socket_path>` and wait for the socket.
    ///
    /// # Errors
    /// Returns InfraError if spawn fails, the process exits early, or the
    /// socket does not appear within `socket_timeout`.
    pub async fn spawn(
        vm_id: &str,
        binary: &Path,
        socket_path: &Path,
        log_path: &Path,
        socket_timeout: Duration,
    ) -> Result<Self, InfraError> {
        // Remove stale socket if exists
        let _ = tokio::fs::remove_file(socket_path).await;

        let log = std::fs::File::create(log_path).map_err(|e| InfraError::Spawn {
            program: binary.display().to_string(),
            reason: format!("creating log {}: {}", log_path.display(), e),
        })?;
        let log_err = log.try_clone().map_err(|e| InfraError::Spawn {
            program: binary.display().to_string(),
            reason: e.to_string(),
        })?;

        let child = Command::new(binary)
            .arg("--api-sock")
            .arg(socket_path)
            .arg("--id")
            .arg(vm_id)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InfraError::Spawn {
                program: binary.display().to_string(),
                reason: e.to_string(),
            })?;

        let pid = child.id();
        tracing::debug!(vm_id = %vm_id, pid = ?pid, "Spawned hypervisor");

        let mut process = Self {
            vm_id: vm_id.to_string(),
            child,
            pid,
            socket_path: socket_path.to_path_buf(),
        };

        let start = Instant::now();
        while start.elapsed() < socket_timeout {
            if tokio::fs::try_exists(socket_path).await.unwrap_or(false) {
                tracing::debug!(
                    vm_id = %vm_id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Hypervisor API socket ready"
                );
                return Ok(process);
            }
            if let Ok(Some(status)) = process.child.try_wait() {
                return Err(InfraError::Hypervisor {
                    stage: "spawn",
                    reason: format!("hypervisor exited early with {}", status),
                });
            }
            tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
        }

        // `process` is dropped here, which kills the hypervisor.
        Err(InfraError::Hypervisor {
            stage: "spawn",
            reason: format!(
                "API socket {} not ready after {}ms",
                socket_path.display(),
                socket_timeout.as_millis()
            ),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the process group and reap the child.
    pub async fn kill(&mut self) {
        self.signal_group();
        if let Err(e) = self.child.kill().await {
            tracing::debug!(vm_id = %self.vm_id, error = %e, "Hypervisor already gone");
        }
        if let Err(e) = tokio::fs::remove_file(&self.socket_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(vm_id = %self.vm_id, error = %e, "Failed to remove API socket");
            }
        }
    }

    fn signal_group(&self) {
        let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) else {
            return;
        };
        match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => tracing::warn!(vm_id = %self.vm_id, error = %e, "Failed to kill hypervisor group"),
        }
    }
}

impl Drop for HypervisorProcess {
    fn drop(&mut self) {
        // Clean up socket
        let _ = std::fs::remove_file(&self.socket_path);

        // Kill the process group if still running
        if self.is_running() {
            self.signal_group();
            let _ = self.child.start_kill();
        }
    }
}
