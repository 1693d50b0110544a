// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-VM point-to-point networking.
//!
//! A /16 is carved into /30 slots. Each live VM holds exactly one slot: its
//! own TAP device with the host on `.1` and the guest on `.2` of the slot.
//! Slots return to the allocator at teardown.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::InfraError;

/// Number of /30 slots in a /16.
const SLOT_COUNT: u32 = 1 << 14;

/// Prefix of every TAP device we create.
pub const TAP_PREFIX: &str = "stratotap";

/// Addressing owned by one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkLease {
    pub slot: u16,
    pub tap_name: String,
    pub host_ip: Ipv4Addr,
    pub guest_ip: Ipv4Addr,
    pub guest_mac: String,
}

impl NetworkLease {
    /// Kernel `ip=` argument configuring the guest side of the link.
    pub fn kernel_ip_arg(&self) -> String {
        format!(
            "ip={}::{}:255.255.255.252::eth0:off",
            self.guest_ip, self.host_ip
        )
    }
}

#[derive(Debug)]
struct SlotTable {
    in_use: HashSet<u16>,
    cursor: u32,
}

/// Hands out unique /30 slots from a /16.
#[derive(Debug)]
pub struct NetworkAllocator {
    base: u32,
    slots: Mutex<SlotTable>,
}

impl NetworkAllocator {
    /// `base` must be the network address of a /16.
    pub fn new(base: Ipv4Addr) -> Self {
        Self {
            base: u32::from(base) & 0xFFFF_0000,
            slots: Mutex::new(SlotTable {
                in_use: HashSet::new(),
                cursor: 0,
            }),
        }
    }

    /// Reserve a free slot.
    pub fn allocate(&self) -> Result<NetworkLease, InfraError> {
        let mut table = self.slots.lock().unwrap_or_else(|p| p.into_inner());

        // Round-robin so a just-released slot is not immediately reused.
        for offset in 0..SLOT_COUNT {
            let candidate = ((table.cursor + offset) % SLOT_COUNT) as u16;
            if table.in_use.insert(candidate) {
                table.cursor = (u32::from(candidate) + 1) % SLOT_COUNT;
                return Ok(self.lease(candidate));
            }
        }

        Err(InfraError::Network {
            reason: format!("all {} network slots are in use", SLOT_COUNT),
        })
    }

    /// Return a slot to the pool. Releasing twice is harmless.
    pub fn release(&self, lease: &NetworkLease) {
        let mut table = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        table.in_use.remove(&lease.slot);
    }

    /// Return every slot. Only valid once no VM is left alive.
    pub fn release_all(&self) {
        let mut table = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        table.in_use.clear();
    }

    pub fn in_use(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .in_use
            .len()
    }

    fn lease(&self, slot: u16) -> NetworkLease {
        let network = self.base + u32::from(slot) * 4;
        let [hi, lo] = slot.to_be_bytes();
        NetworkLease {
            slot,
            tap_name: format!("{}{}", TAP_PREFIX, slot),
            host_ip: Ipv4Addr::from(network + 1),
            guest_ip: Ipv4Addr::from(network + 2),
            guest_mac: format!("AA:FC:00:00:{:02X}:{:02X}", hi, lo),
        }
    }
}

/// Host-side TAP device management.
#[async_trait]
pub trait TapProvisioner: Send + Sync {
    /// Create `lease.tap_name`, address it with the host IP and bring it up.
    async fn create(&self, lease: &NetworkLease) -> Result<(), InfraError>;

    /// Remove the device. Removing an absent device is not an error.
    async fn delete(&self, tap_name: &str) -> Result<(), InfraError>;
}

/// Manages TAP devices with the `ip` tool (requires CAP_NET_ADMIN).
#[derive(Debug, Clone)]
pub struct IpTapProvisioner {
    ip_bin: String,
}

impl IpTapProvisioner {
    pub fn new() -> Self {
        Self {
            ip_bin: "ip".to_string(),
        }
    }

    async fn ip(&self, args: &[&str]) -> Result<(), InfraError> {
        let output = Command::new(&self.ip_bin)
            .args(args)
            .output()
            .await
            .map_err(|e| InfraError::Network {
                reason: format!("running {}: {}", self.ip_bin, e),
            })?;

        if output.status.success() {
            return Ok(());
        }
        Err(InfraError::Network {
            reason: format!(
                "`{} {}` failed: {}",
                self.ip_bin,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })
    }
}

impl Default for IpTapProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TapProvisioner for IpTapProvisioner {
    async fn create(&self, lease: &NetworkLease) -> Result<(), InfraError> {
        let tap = lease.tap_name.as_str();
        // A leftover device from a crashed run would make `tuntap add` fail.
        let _ = self.ip(&["link", "del", tap]).await;

        self.ip(&["tuntap", "add", "dev", tap, "mode", "tap"]).await?;
        let address = format!("{}/30", lease.host_ip);
        if let Err(e) = self.ip(&["addr", "add", &address, "dev", tap]).await {
            let _ = self.delete(tap).await;
            return Err(e);
        }
        if let Err(e) = self.ip(&["link", "set", tap, "up"]).await {
            let _ = self.delete(tap).await;
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, tap_name: &str) -> Result<(), InfraError> {
        match self.ip(&["link", "del", tap_name]).await {
            Err(InfraError::Network { reason }) if reason.contains("Cannot find device") => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Tracks devices in memory instead of touching the host.
    #[derive(Debug, Default)]
    pub struct RecordingTapProvisioner {
        pub live: Mutex<HashSet<String>>,
    }

    impl RecordingTapProvisioner {
        pub fn live_devices(&self) -> usize {
            self.live.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TapProvisioner for RecordingTapProvisioner {
        async fn create(&self, lease: &NetworkLease) -> Result<(), InfraError> {
            self.live.lock().unwrap().insert(lease.tap_name.clone());
            Ok(())
        }

        async fn delete(&self, tap_name: &str) -> Result<(), InfraError> {
            self.live.lock().unwrap().remove(tap_name);
            Ok(())
        }
    }
}
