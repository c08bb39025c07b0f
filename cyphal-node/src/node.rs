//! Node core: the top-level state machine combining PnP acquisition,
//! operational lifecycle and the register-backed identity the rest of the
//! hosted layer reads from.
//!
//! This module owns *decisions* (when to emit a PnP request, when a
//! heartbeat's health should read CAUTION, when to transition state); it
//! does not touch sockets or serialize DSDL types, which live in `io` and
//! are assumed external per spec.

use crate::register::{RegisterTree, Value};
use rand::Rng;
use tracing::info;

pub const MAX_NODE_ID: u16 = 65534;
/// Sentinel stored in `uavcan.node.id` while anonymous.
pub const ANONYMOUS_NODE_ID: u16 = 65535;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeState {
    Booting,
    Anonymous,
    Operational,
    Restarting,
    Resetting,
}

/// Mirrors `uavcan.node.Health`; only NOMINAL and CAUTION are driven by this
/// implementation today (pool exhaustion), the others exist because the
/// wire type has four values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Health {
    Nominal,
    Caution,
    Warning,
    Critical,
}

pub struct NodeCore {
    unique_id: [u8; 16],
    state: NodeState,
    node_id: Option<u16>,
    ever_oom: bool,
}

impl NodeCore {
    /// Boot from a register tree already loaded from KV. `uavcan.node.id`
    /// holding the anonymous sentinel means the node starts in `Anonymous`;
    /// anything in `[0, MAX_NODE_ID]` goes straight to `Operational`.
    pub fn boot(registers: &RegisterTree, unique_id: [u8; 16]) -> Self {
        let node_id = registers
            .find_by_name("uavcan.node.id")
            .and_then(|v| v.as_natural16())
            .filter(|&id| id <= MAX_NODE_ID);

        let state = if node_id.is_some() {
            NodeState::Operational
        } else {
            NodeState::Anonymous
        };

        if state == NodeState::Operational {
            info!(node_id = node_id.unwrap(), "booted directly into operational state");
        } else {
            info!("booted anonymous, awaiting PnP allocation");
        }

        Self {
            unique_id,
            state,
            node_id,
            ever_oom: false,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn node_id(&self) -> Option<u16> {
        self.node_id
    }

    pub fn is_anonymous(&self) -> bool {
        self.node_id.is_none()
    }

    pub fn unique_id(&self) -> [u8; 16] {
        self.unique_id
    }

    pub fn note_pool_oom(&mut self) {
        self.ever_oom = true;
    }

    pub fn health(&self) -> Health {
        if self.ever_oom {
            Health::Caution
        } else {
            Health::Nominal
        }
    }

    /// Called once per second while anonymous. With uniform probability 1/2
    /// decides to emit a PnP allocation request; returns the unique-ID to
    /// embed in it when it does.
    pub fn maybe_emit_pnp_request(&self, rng: &mut impl Rng) -> Option<[u8; 16]> {
        if !self.is_anonymous() {
            return None;
        }
        if rng.gen_bool(0.5) {
            Some(self.unique_id)
        } else {
            None
        }
    }

    /// Handle an incoming PnP allocation response. Ignored unless it names
    /// our own unique-ID and a node-ID in range; idempotent against a
    /// duplicate acceptance (P8) because a second call finds the node no
    /// longer anonymous and does nothing.
    pub fn on_pnp_response(
        &mut self,
        registers: &mut RegisterTree,
        response_unique_id: [u8; 16],
        proposed_node_id: u16,
    ) -> bool {
        if !self.is_anonymous() {
            return false;
        }
        if response_unique_id != self.unique_id || proposed_node_id > MAX_NODE_ID {
            return false;
        }

        self.node_id = Some(proposed_node_id);
        self.state = NodeState::Operational;
        let _ = registers.assign("uavcan.node.id", &Value::natural16(proposed_node_id));
        info!(node_id = proposed_node_id, "PnP allocation accepted, node now operational");
        true
    }

    pub fn request_restart(&mut self) {
        info!(state = ?self.state, "restart requested");
        self.state = NodeState::Restarting;
    }

    pub fn request_factory_reset(&mut self) {
        info!("factory reset requested");
        self.state = NodeState::Resetting;
    }

    pub fn restart_required(&self) -> bool {
        matches!(self.state, NodeState::Restarting | NodeState::Resetting)
    }
}

/// Uptime in whole seconds since `boot_instant`, for the `Heartbeat.uptime`
/// field. Uses `std::time::Instant` directly rather than the transfer
/// engine's `embedded_time` clock: uptime reporting has no bearing on
/// transfer-ID or deadline arithmetic, so there's no reason to thread a
/// generic clock type through it.
pub fn uptime_seconds(boot_instant: std::time::Instant) -> u32 {
    boot_instant.elapsed().as_secs() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn registers_with(node_id: Option<u16>) -> RegisterTree {
        let mut tree = RegisterTree::new();
        tree.init_register(
            "uavcan.node.id",
            Value::natural16(node_id.unwrap_or(ANONYMOUS_NODE_ID)),
            true,
            true,
        );
        tree
    }

    #[test]
    fn boots_operational_when_node_id_configured() {
        let registers = registers_with(Some(125));
        let core = NodeCore::boot(&registers, [0; 16]);
        assert_eq!(core.state(), NodeState::Operational);
        assert_eq!(core.node_id(), Some(125));
    }

    #[test]
    fn boots_anonymous_without_node_id() {
        let registers = registers_with(None);
        let core = NodeCore::boot(&registers, [0; 16]);
        assert_eq!(core.state(), NodeState::Anonymous);
        assert!(core.is_anonymous());
    }

    #[test]
    fn pnp_response_for_other_unique_id_is_ignored() {
        let mut registers = registers_with(None);
        let mut core = NodeCore::boot(&registers, [1; 16]);
        assert!(!core.on_pnp_response(&mut registers, [2; 16], 10));
        assert!(core.is_anonymous());
    }

    #[test]
    fn pnp_response_accepted_transitions_to_operational() {
        let mut registers = registers_with(None);
        let mut core = NodeCore::boot(&registers, [9; 16]);
        assert!(core.on_pnp_response(&mut registers, [9; 16], 125));
        assert_eq!(core.node_id(), Some(125));
        assert_eq!(core.state(), NodeState::Operational);
        assert_eq!(
            registers.find_by_name("uavcan.node.id"),
            Some(Value::natural16(125))
        );
    }

    #[test]
    fn duplicate_pnp_response_is_idempotent() {
        let mut registers = registers_with(None);
        let mut core = NodeCore::boot(&registers, [9; 16]);
        assert!(core.on_pnp_response(&mut registers, [9; 16], 125));
        assert!(!core.on_pnp_response(&mut registers, [9; 16], 126));
        assert_eq!(core.node_id(), Some(125));
    }

    #[test]
    fn operational_node_never_emits_pnp_request() {
        let registers = registers_with(Some(125));
        let core = NodeCore::boot(&registers, [0; 16]);
        let mut rng = StepRng::new(0, 1);
        assert_eq!(core.maybe_emit_pnp_request(&mut rng), None);
    }

    #[test]
    fn pool_oom_degrades_health_to_caution() {
        let registers = registers_with(Some(125));
        let mut core = NodeCore::boot(&registers, [0; 16]);
        assert_eq!(core.health(), Health::Nominal);
        core.note_pool_oom();
        assert_eq!(core.health(), Health::Caution);
    }
}
