// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! MicroVM lifecycle state machine with typed state transitions.
//!
//! Implements the per-invocation lifecycle:
//! Provisioning → NetworkAttached → Booted → Executing → TornDown.
//! TornDown is reachable from every state; invalid transitions are errors.


use crate::error::InfraError;

/// MicroVM lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Hypervisor process spawned, overlay and machine being configured.
    Provisioning,

    /// Dedicated TAP device attached to the VM.
    NetworkAttached,

    /// Guest booted and its runtime listener answered.
    Booted,

    /// An invocation is in flight.
    Executing,

    /// Process stopped, TAP removed, overlay deleted. Terminal.
    TornDown,
}

impl VmState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Provisioning => "Provisioning",
            Self::NetworkAttached => "NetworkAttached",
            Self::Booted => "Booted",
            Self::Executing => "Executing",
            Self::TornDown => "TornDown",
        }
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: VmState) -> bool {
        matches!(
            (self, target),
            (Self::Provisioning, Self::NetworkAttached) |
            (Self::NetworkAttached, Self::Booted) |
            (Self::Booted, Self::Executing) |
            // Teardown is legal from everywhere but itself
            (Self::Provisioning, Self::TornDown) |
            (Self::NetworkAttached, Self::TornDown) |
            (Self::Booted, Self::TornDown) |
            (Self::Executing, Self::TornDown)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TornDown)
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Enforces valid lifecycle transitions for one VM.
#[derive(Debug)]
pub struct VmStateMachine {
    vm_id: String,
    current_state: VmState,
}

impl VmStateMachine {
    pub fn new(vm_id: impl Into<String>) -> Self {
        Self {
            vm_id: vm_id.into(),
            current_state: VmState::Provisioning,
        }
    }

    pub fn state(&self) -> VmState {
        self.current_state
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: VmState) -> Result<(), InfraError> {
        if !self.current_state.can_transition_to(target) {
            return Err(InfraError::InvalidTransition {
                vm_id: self.vm_id.clone(),
                from: self.current_state.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            vm_id = %self.vm_id,
            from = self.current_state.name(),
            to = target.name(),
            "VM state transition"
        );

        self.current_state = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let sm = VmStateMachine::new("vm-1");
        assert_eq!(sm.state(), VmState::Provisioning);
        assert!(!sm.state().is_terminal());
    }

    #[test]
    fn test_happy_path() {
        let mut sm = VmStateMachine::new("vm-1");
        for state in [
            VmState::NetworkAttached,
            VmState::Booted,
            VmState::Executing,
            VmState::TornDown,
        ] {
            sm.transition_to(state).unwrap();
            assert_eq!(sm.state(), state);
        }
        assert!(sm.state().is_terminal());
    }

    #[test]
    fn test_teardown_from_every_live_state() {
        for state in [
            VmState::Provisioning,
            VmState::NetworkAttached,
            VmState::Booted,
            VmState::Executing,
        ] {
            assert!(state.can_transition_to(VmState::TornDown));
        }
        assert!(!VmState::TornDown.can_transition_to(VmState::TornDown));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut sm = VmStateMachine::new("vm-1");

        // Provisioning → Executing skips network and boot
        let err = sm.transition_to(VmState::Executing).unwrap_err();
        assert!(err.to_string().contains("Provisioning"));
        assert_eq!(sm.state(), VmState::Provisioning);

        sm.transition_to(VmState::TornDown).unwrap();
        assert!(sm.transition_to(VmState::Booted).is_err());
    }
}
