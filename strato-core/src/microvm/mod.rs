// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! MicroVM orchestrator (production isolation path).
//!
//! Every invocation gets a disposable VM:
//! Provision → Network-attach → Start → Execute → Teardown.
//! Teardown runs on every exit path, including a deadline that expires in
//! the middle of a stage.

pub mod api;
pub mod guest;
pub mod network;
pub mod pool;
pub mod process;
pub mod state;
pub mod vm;

pub use guest::{GuestClient, GuestInvocation};
pub use network::{IpTapProvisioner, NetworkAllocator, NetworkLease, TapProvisioner};
pub use pool::{WarmPool, WarmPoolStats};
pub use state::{VmState, VmStateMachine};
pub use vm::{MicroVm, VmLauncher, VmRecord};

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::MicroVmConfig;
use crate::error::StratoError;
use crate::function::{ExecutionOutcome, Function};

/// Runs invocations inside single-use microVMs.
pub struct MicroVmOrchestrator {
    launcher: Arc<VmLauncher>,
    pool: Arc<WarmPool>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl MicroVmOrchestrator {
    pub fn new(config: MicroVmConfig, taps: Arc<dyn TapProvisioner>) -> Self {
        let pool = Arc::new(WarmPool::new(config.warm_pool.clone()));
        Self {
            launcher: Arc::new(VmLauncher::new(config, taps)),
            pool,
            maintenance: Mutex::new(None),
        }
    }

    /// Orchestrator that manages host TAP devices with `ip`.
    pub fn with_ip_taps(config: MicroVmConfig) -> Self {
        Self::new(config, Arc::new(IpTapProvisioner::new()))
    }

    pub fn launcher(&self) -> &VmLauncher {
        &self.launcher
    }

    pub fn pool(&self) -> &WarmPool {
        &self.pool
    }

    /// Number of VMs not yet torn down (pooled ones included).
    pub fn live_count(&self) -> usize {
        self.launcher.live_count()
    }

    /// Run one invocation in a fresh (or pre-warmed) VM.
    pub async fn execute(&self, function: &Function, code: &[u8], event: &Value) -> ExecutionOutcome {
        let started = Instant::now();
        let deadline = function.timeout_sec.as_duration();
        let runtime = function.runtime;
        let memory_mb = function.memory_mb.megabytes();

        let mut vm = match self.pool.acquire(runtime, memory_mb).await {
            Some(vm) => vm,
            None => match self.launcher.prepare(runtime, memory_mb) {
                Ok(vm) => vm,
                Err(e) => return ExecutionOutcome::failed(e, None),
            },
        };
        let warm = vm.state() == VmState::Booted;

        let code = String::from_utf8_lossy(code);
        let invocation = GuestInvocation {
            handler: &function.handler,
            code: &code,
            event,
            env: &function.environment,
            function_name: function.name.as_str(),
            memory_mb,
            timeout_sec: function.timeout_sec.seconds(),
        };

        let stages = async {
            if vm.state() != VmState::Booted {
                self.launcher.boot(&mut vm).await?;
            }
            self.launcher.execute(&mut vm, &invocation).await
        };
        let result = tokio::time::timeout(deadline, stages).await;

        let vm_id = vm.id().to_string();
        let reached = vm.state();
        self.launcher.teardown(&mut vm).await;

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => ExecutionOutcome::failed(e, None),
            Err(_) => {
                tracing::warn!(
                    function = %function.name,
                    vm_id = %vm_id,
                    state = reached.name(),
                    "Invocation deadline expired"
                );
                ExecutionOutcome::failed(StratoError::Timeout { after: deadline }, None)
            }
        };

        tracing::debug!(
            function = %function.name,
            vm_id = %vm_id,
            warm = warm,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "MicroVM invocation finished"
        );
        outcome
    }

    /// Periodically evict idle VMs and refill the warm pool.
    ///
    /// No-op when pooling is disabled or the task is already running.
    pub fn start_maintenance(&self, interval: Duration) {
        if !self.pool.is_enabled() {
            return;
        }
        let mut slot = self.maintenance.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_some() {
            return;
        }

        let launcher = self.launcher.clone();
        let pool = self.pool.clone();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                pool.evict_idle(&launcher).await;
                pool.replenish(&launcher).await;
            }
        }));
        tracing::info!(interval_ms = interval.as_millis() as u64, "Warm pool maintenance started");
    }

    /// Stop maintenance and tear down every VM, pooled or in flight.
    pub async fn shutdown(&self) {
        let task = self
            .maintenance
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }

        for mut vm in self.pool.drain().await {
            self.launcher.teardown(&mut vm).await;
        }
        self.launcher.close().await;
        tracing::info!("MicroVM orchestrator shut down");
    }
}
