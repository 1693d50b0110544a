// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Single-VM provisioning and teardown.
//!
//! A [`MicroVm`] records every host resource as soon as it is acquired, so
//! [`VmLauncher::teardown`] can release exactly what exists no matter where
//! provisioning stopped (including a stage future dropped at a deadline).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::process::Command;

use super::api::ApiClient;
use super::guest::{GuestClient, GuestInvocation};
use super::network::{NetworkAllocator, NetworkLease, TapProvisioner};
use super::process::HypervisorProcess;
use super::state::{VmState, VmStateMachine};
use crate::config::MicroVmConfig;
use crate::error::{InfraError, StratoError, StratoResult};
use crate::function::ExecutionOutcome;
use crate::types::Runtime;

const API_SOCKET: &str = "firecracker.sock";
const HYPERVISOR_LOG: &str = "firecracker.log";
const OVERLAY_FILE: &str = "rootfs.ext4";

/// One disposable VM and the host resources it holds.
#[derive(Debug)]
pub struct MicroVm {
    id: String,
    runtime: Runtime,
    memory_mb: u32,
    dir: PathBuf,
    lease: NetworkLease,
    tap_attached: bool,
    process: Option<HypervisorProcess>,
    guest: Option<GuestClient>,
    state: VmStateMachine,
}

impl MicroVm {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime
    }

    pub fn memory_mb(&self) -> u32 {
        self.memory_mb
    }

    pub fn state(&self) -> VmState {
        self.state.state()
    }

    pub fn lease(&self) -> &NetworkLease {
        &self.lease
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn overlay_path(&self) -> PathBuf {
        self.dir.join(OVERLAY_FILE)
    }
}

/// Registry view of a live VM.
#[derive(Debug, Clone)]
pub struct VmRecord {
    pub runtime: Runtime,
    pub state: VmState,
    pub pid: Option<u32>,
    pub tap_name: String,
    pub dir: PathBuf,
    pub created_at: Instant,
}

/// Creates, boots and destroys VMs.
pub struct VmLauncher {
    config: MicroVmConfig,
    network: NetworkAllocator,
    taps: Arc<dyn TapProvisioner>,
    live: DashMap<String, VmRecord>,
    closed: AtomicBool,
}

impl VmLauncher {
    pub fn new(config: MicroVmConfig, taps: Arc<dyn TapProvisioner>) -> Self {
        let network = NetworkAllocator::new(config.subnet_base);
        Self {
            config,
            network,
            taps,
            live: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &MicroVmConfig {
        &self.config
    }

    pub fn network(&self) -> &NetworkAllocator {
        &self.network
    }

    /// Snapshot of every VM that has not been torn down.
    pub fn live_vms(&self) -> Vec<(String, VmRecord)> {
        self.live
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Reserve an identity and a network slot. No host resources yet.
    pub fn prepare(&self, runtime: Runtime, memory_mb: u32) -> StratoResult<MicroVm> {
        if self.closed.load(Ordering::Acquire) {
            return Err(InfraError::Hypervisor {
                stage: "provision",
                reason: "orchestrator is shutting down".to_string(),
            }
            .into());
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let lease = self.network.allocate()?;
        let dir = self.config.data_dir.join("vms").join(&id);

        let vm = MicroVm {
            state: VmStateMachine::new(id.clone()),
            id,
            runtime,
            memory_mb,
            dir,
            lease,
            tap_attached: false,
            process: None,
            guest: None,
        };

        self.live.insert(
            vm.id.clone(),
            VmRecord {
                runtime,
                state: vm.state(),
                pid: None,
                tap_name: vm.lease.tap_name.clone(),
                dir: vm.dir.clone(),
                created_at: Instant::now(),
            },
        );
        Ok(vm)
    }

    /// Provision, attach networking and boot until the guest answers.
    pub async fn boot(&self, vm: &mut MicroVm) -> StratoResult<()> {
        let started = Instant::now();

        tokio::fs::create_dir_all(&vm.dir)
            .await
            .map_err(|e| InfraError::Hypervisor {
                stage: "provision",
                reason: format!("creating {}: {}", vm.dir.display(), e),
            })?;
        create_overlay(&self.config.rootfs_path, &vm.overlay_path()).await?;

        let socket = vm.dir.join(API_SOCKET);
        let process = HypervisorProcess::spawn(
            &vm.id,
            &self.config.firecracker_bin,
            &socket,
            &vm.dir.join(HYPERVISOR_LOG),
            self.config.api_socket_timeout,
        )
        .await?;
        let pid = process.pid();
        vm.process = Some(process);
        if let Some(mut record) = self.live.get_mut(&vm.id) {
            record.pid = pid;
        }

        let api = ApiClient::new(socket, self.config.api_socket_timeout);
        let boot_args = format!("{} {}", self.config.boot_args, vm.lease.kernel_ip_arg());
        api.put_boot_source(&self.config.kernel_path, &boot_args)
            .await?;
        api.put_rootfs(&vm.overlay_path()).await?;
        api.put_machine_config(self.config.vcpus, vm.memory_mb)
            .await?;

        self.taps.create(&vm.lease).await?;
        vm.tap_attached = true;
        api.put_network_interface(&vm.lease.tap_name, &vm.lease.guest_mac)
            .await?;
        self.transition(vm, VmState::NetworkAttached)?;

        api.start_instance().await?;
        let guest = GuestClient::new(vm.lease.guest_ip, self.config.guest_port)?;
        guest.wait_ready(self.config.boot_timeout).await?;
        vm.guest = Some(guest);
        self.transition(vm, VmState::Booted)?;

        tracing::info!(
            vm_id = %vm.id,
            runtime = %vm.runtime,
            guest_ip = %vm.lease.guest_ip,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "MicroVM booted"
        );
        Ok(())
    }

    /// Send one invocation to a booted VM.
    pub async fn execute(
        &self,
        vm: &mut MicroVm,
        invocation: &GuestInvocation<'_>,
    ) -> StratoResult<ExecutionOutcome> {
        self.transition(vm, VmState::Executing)?;
        let guest = vm.guest.as_ref().ok_or_else(|| InfraError::Guest {
            reason: format!("VM {} has no guest connection", vm.id),
        })?;
        Ok(guest.invoke(invocation).await)
    }

    /// Release everything `vm` holds. Safe to call more than once.
    pub async fn teardown(&self, vm: &mut MicroVm) {
        if vm.state().is_terminal() {
            return;
        }

        if let Some(mut process) = vm.process.take() {
            process.kill().await;
        }

        if vm.tap_attached {
            if let Err(e) = self.taps.delete(&vm.lease.tap_name).await {
                tracing::warn!(vm_id = %vm.id, tap = %vm.lease.tap_name, error = %e, "Failed to remove TAP device");
            }
            vm.tap_attached = false;
        }
        self.network.release(&vm.lease);

        remove_dir(&vm.id, &vm.dir).await;

        vm.guest = None;
        if let Err(e) = vm.state.transition_to(VmState::TornDown) {
            tracing::warn!(vm_id = %vm.id, error = %e, "Unexpected teardown transition");
        }
        self.live.remove(&vm.id);

        tracing::debug!(vm_id = %vm.id, "MicroVM torn down");
    }

    /// Stop accepting new VMs and destroy every live one.
    ///
    /// VMs owned by in-flight invocations are destroyed through their
    /// registry record; the owner's own teardown then finds nothing left.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);

        for (id, record) in self.live_vms() {
            if let Some(pid) = record.pid.and_then(|p| i32::try_from(p).ok()) {
                let _ = nix::sys::signal::killpg(
                    nix::unistd::Pid::from_raw(pid),
                    nix::sys::signal::Signal::SIGKILL,
                );
            }
            if let Err(e) = self.taps.delete(&record.tap_name).await {
                tracing::warn!(vm_id = %id, error = %e, "Failed to remove TAP device");
            }
            remove_dir(&id, &record.dir).await;
            self.live.remove(&id);
        }
        // Covers VMs whose owner was dropped mid-boot without a teardown.
        self.network.release_all();
    }

    fn transition(&self, vm: &mut MicroVm, target: VmState) -> Result<(), InfraError> {
        vm.state.transition_to(target)?;
        if let Some(mut record) = self.live.get_mut(&vm.id) {
            record.state = target;
        }
        Ok(())
    }
}

/// Copy-on-write copy of the shared base image.
async fn create_overlay(base: &Path, overlay: &Path) -> StratoResult<()> {
    let reflinked = Command::new("cp")
        .arg("--reflink=auto")
        .arg("--sparse=always")
        .arg(base)
        .arg(overlay)
        .kill_on_drop(true)
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false);

    if reflinked {
        return Ok(());
    }

    // Plain copy for `cp` implementations without reflink support.
    tokio::fs::copy(base, overlay)
        .await
        .map(|_| ())
        .map_err(|e| {
            StratoError::from(InfraError::Hypervisor {
                stage: "overlay",
                reason: format!("copying {}: {}", base.display(), e),
            })
        })
}

async fn remove_dir(vm_id: &str, dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(vm_id = %vm_id, dir = %dir.display(), error = %e, "Failed to remove VM directory");
        }
    }
}
