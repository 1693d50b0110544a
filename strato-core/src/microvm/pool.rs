// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Warm pool of pre-booted microVMs.
//!
//! Keeps up to `size` idle, booted VMs per runtime so invocations can skip
//! the cold start. Policy:
//! 1. Only runtimes that have been requested at least once are kept warm
//! 2. A pooled VM serves an invocation only if its memory size matches
//! 3. VMs are single-use: the invocation that takes one also tears it down
//! 4. VMs idle longer than `idle_timeout` are torn down by `evict_idle`

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use tokio::sync::RwLock;

use super::vm::{MicroVm, VmLauncher};
use crate::config::WarmPoolConfig;
use crate::types::Runtime;

#[derive(Debug)]
struct IdleVm {
    vm: MicroVm,
    since: Instant,
}

/// Statistics from the warm pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmPoolStats {
    pub idle: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Warm Pool Manager - pre-booted VMs keyed by runtime.
#[derive(Debug)]
pub struct WarmPool {
    config: WarmPoolConfig,
    idle: RwLock<HashMap<Runtime, VecDeque<IdleVm>>>,
    demand: RwLock<HashSet<Runtime>>,
    stats: RwLock<WarmPoolStats>,
}

impl WarmPool {
    pub fn new(config: WarmPoolConfig) -> Self {
        Self {
            config,
            idle: RwLock::new(HashMap::new()),
            demand: RwLock::new(HashSet::new()),
            stats: RwLock::new(WarmPoolStats::default()),
        }
    }

    /// Check if warm pool is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.size > 0
    }

    /// Take an idle VM for `runtime` if one with `memory_mb` is available.
    pub async fn acquire(&self, runtime: Runtime, memory_mb: u32) -> Option<MicroVm> {
        if !self.is_enabled() {
            return None;
        }
        self.demand.write().await.insert(runtime);

        let taken = if memory_mb == self.config.memory_mb {
            self.idle
                .write()
                .await
                .get_mut(&runtime)
                .and_then(VecDeque::pop_front)
        } else {
            None
        };

        let mut stats = self.stats.write().await;
        match taken {
            Some(entry) => {
                stats.hits += 1;
                tracing::debug!(vm_id = %entry.vm.id(), runtime = %runtime, "Warm pool hit");
                Some(entry.vm)
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    /// Add a booted VM to the idle queue of its runtime.
    ///
    /// Returns the VM back if the queue is already full.
    pub async fn offer(&self, vm: MicroVm) -> Result<(), MicroVm> {
        let mut idle = self.idle.write().await;
        let queue = idle.entry(vm.runtime()).or_default();
        if queue.len() >= self.config.size {
            return Err(vm);
        }
        queue.push_back(IdleVm {
            vm,
            since: Instant::now(),
        });
        Ok(())
    }

    /// Boot VMs until every demanded runtime has `size` idle ones.
    /// Returns how many were added.
    pub async fn replenish(&self, launcher: &VmLauncher) -> usize {
        if !self.is_enabled() {
            return 0;
        }

        let runtimes: Vec<Runtime> = self.demand.read().await.iter().copied().collect();
        let mut added = 0;

        for runtime in runtimes {
            let deficit = {
                let idle = self.idle.read().await;
                self.config
                    .size
                    .saturating_sub(idle.get(&runtime).map_or(0, VecDeque::len))
            };

            // Boot outside the lock; acquire() must not wait on a cold start.
            for _ in 0..deficit {
                let mut vm = match launcher.prepare(runtime, self.config.memory_mb) {
                    Ok(vm) => vm,
                    Err(e) => {
                        tracing::warn!(runtime = %runtime, error = %e, "Warm pool provisioning failed");
                        return added;
                    }
                };
                if let Err(e) = launcher.boot(&mut vm).await {
                    tracing::warn!(runtime = %runtime, error = %e, "Warm pool boot failed");
                    launcher.teardown(&mut vm).await;
                    // Skip this runtime for now; the next cycle retries.
                    break;
                }
                match self.offer(vm).await {
                    Ok(()) => added += 1,
                    Err(mut surplus) => {
                        launcher.teardown(&mut surplus).await;
                        break;
                    }
                }
            }
        }

        if added > 0 {
            tracing::info!(added = added, "Warm pool replenished");
        }
        added
    }

    /// Tear down VMs idle longer than the configured timeout.
    pub async fn evict_idle(&self, launcher: &VmLauncher) -> usize {
        let expired: Vec<MicroVm> = {
            let mut idle = self.idle.write().await;
            let mut expired = Vec::new();
            for queue in idle.values_mut() {
                let (stale, fresh): (VecDeque<IdleVm>, VecDeque<IdleVm>) = queue
                    .drain(..)
                    .partition(|entry| entry.since.elapsed() >= self.config.idle_timeout);
                *queue = fresh;
                expired.extend(stale.into_iter().map(|entry| entry.vm));
            }
            expired
        };

        let count = expired.len();
        for mut vm in expired {
            tracing::debug!(vm_id = %vm.id(), "Evicting idle VM");
            launcher.teardown(&mut vm).await;
        }
        count
    }

    /// Remove every idle VM from the pool.
    pub async fn drain(&self) -> Vec<MicroVm> {
        self.idle
            .write()
            .await
            .drain()
            .flat_map(|(_, queue)| queue.into_iter().map(|entry| entry.vm))
            .collect()
    }

    pub async fn idle_count(&self, runtime: Runtime) -> usize {
        self.idle.read().await.get(&runtime).map_or(0, VecDeque::len)
    }

    /// Get pool statistics.
    pub async fn stats(&self) -> WarmPoolStats {
        let idle = self.idle.read().await.values().map(VecDeque::len).sum();
        WarmPoolStats {
            idle,
            ..self.stats.read().await.clone()
        }
    }
}
