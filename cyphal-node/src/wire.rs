//! Fixed-layout encodings for the RPC and message payloads the scheduler
//! moves across the transfer engine.
//!
//! These are deliberately not DSDL: real deployments replace this module
//! wholesale with generated `uavcan.*` serializers once those are wired in.
//! What's here only needs to be self-consistent between this binary's own
//! publisher and subscriber ends, so each function picks the simplest
//! fixed-width layout that carries the fields the corresponding service or
//! subject actually uses.

use crate::node::{Health, NodeState};
use crate::register::{deserialize, serialize, Value};
use crate::services::{AccessResponse, CommandStatus, GetInfoResponse};

pub fn encode_heartbeat(uptime_seconds: u32, health: Health, state: NodeState) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    out.extend_from_slice(&uptime_seconds.to_le_bytes());
    out.push(health as u8);
    out.push(match state {
        NodeState::Booting => 0,
        NodeState::Anonymous => 1,
        NodeState::Operational => 2,
        NodeState::Restarting => 3,
        NodeState::Resetting => 4,
    });
    out
}

/// Anonymous transfers must fit in a single CAN frame (7 usable bytes,
/// see [`cyphal::TxError::AnonNotSingleFrame`]), so the full 16-byte
/// unique-ID can't go on the wire here the way it does in the response;
/// a 6-byte prefix is carried instead, mirroring why the real protocol's
/// CAN allocation request only ever carries a hash of the unique-ID.
pub fn encode_pnp_request(unique_id: [u8; 16]) -> Vec<u8> {
    unique_id[..6].to_vec()
}

/// `(unique_id, proposed_node_id)`, matching the argument order
/// [`crate::node::NodeCore::on_pnp_response`] expects.
pub fn decode_pnp_response(payload: &[u8]) -> Option<([u8; 16], u16)> {
    if payload.len() != 18 {
        return None;
    }
    let mut unique_id = [0u8; 16];
    unique_id.copy_from_slice(&payload[..16]);
    let node_id = u16::from_le_bytes([payload[16], payload[17]]);
    Some((unique_id, node_id))
}

pub fn encode_get_info_response(info: &GetInfoResponse) -> Vec<u8> {
    let mut out = Vec::with_capacity(28 + info.name.len());
    out.push(info.protocol_version_major);
    out.push(info.protocol_version_minor);
    out.push(info.software_version_major);
    out.push(info.software_version_minor);
    out.extend_from_slice(&info.vcs_revision_id.to_le_bytes());
    out.extend_from_slice(&info.unique_id);
    out.push(info.name.len().min(255) as u8);
    out.extend_from_slice(info.name.as_bytes());
    out
}

/// Command-ID only; the optional command parameter is unstructured bytes
/// this binary's command set never needs.
pub fn decode_execute_command_request(payload: &[u8]) -> Option<u16> {
    if payload.len() < 2 {
        return None;
    }
    Some(u16::from_le_bytes([payload[0], payload[1]]))
}

pub fn encode_execute_command_response(status: CommandStatus) -> Vec<u8> {
    vec![match status {
        CommandStatus::Success => 0,
        CommandStatus::BadCommand => 1,
        CommandStatus::BadState => 2,
    }]
}

/// `(name, write_value)`; `write_value` is `None` for a read-only access.
pub fn decode_register_access_request(payload: &[u8]) -> Option<(String, Option<Value>)> {
    let (&name_len, rest) = payload.split_first()?;
    let name_len = name_len as usize;
    if rest.len() < name_len + 1 {
        return None;
    }
    let name = String::from_utf8(rest[..name_len].to_vec()).ok()?;
    let has_value = rest[name_len];
    let value_bytes = &rest[name_len + 1..];
    let value = if has_value != 0 {
        Some(deserialize(value_bytes)?)
    } else {
        None
    };
    Some((name, value))
}

pub fn encode_register_access_response(resp: &AccessResponse) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(resp.mutable as u8);
    out.push(resp.persistent as u8);
    out.extend(serialize(&resp.value));
    out
}

pub fn decode_register_list_request(payload: &[u8]) -> Option<usize> {
    if payload.len() != 2 {
        return None;
    }
    Some(u16::from_le_bytes([payload[0], payload[1]]) as usize)
}

/// `None` encodes as an empty name, the convention `register.List` clients
/// use to learn they've walked past the last register.
pub fn encode_register_list_response(name: Option<&str>) -> Vec<u8> {
    match name {
        Some(name) => name.as_bytes().to_vec(),
        None => Vec::new(),
    }
}

pub fn encode_setpoint(setpoint: crate::actuator::Setpoint) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&setpoint.position.to_le_bytes());
    out.extend_from_slice(&setpoint.velocity.to_le_bytes());
    out.extend_from_slice(&setpoint.acceleration.to_le_bytes());
    out.extend_from_slice(&setpoint.force.to_le_bytes());
    out
}

pub fn decode_setpoint(payload: &[u8]) -> Option<crate::actuator::Setpoint> {
    if payload.len() != 16 {
        return None;
    }
    let f = |i: usize| f32::from_le_bytes(payload[i..i + 4].try_into().unwrap());
    Some(crate::actuator::Setpoint {
        position: f(0),
        velocity: f(4),
        acceleration: f(8),
        force: f(12),
    })
}

pub fn decode_readiness(payload: &[u8]) -> Option<crate::actuator::Readiness> {
    match payload.first()? {
        0 => Some(crate::actuator::Readiness::Sleep),
        1 => Some(crate::actuator::Readiness::Standby),
        2 => Some(crate::actuator::Readiness::Engaged),
        _ => None,
    }
}

pub fn encode_feedback(position: f32, velocity: f32) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&position.to_le_bytes());
    out.extend_from_slice(&velocity.to_le_bytes());
    out
}

pub fn encode_dynamics(acceleration: f32, force: f32) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&acceleration.to_le_bytes());
    out.extend_from_slice(&force.to_le_bytes());
    out
}

/// One `u16` per advertised port-ID; the transfer's own length tells a
/// listener how many entries there are, no count prefix needed.
pub fn encode_port_list(ports: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ports.len() * 2);
    for port in ports {
        out.extend_from_slice(&port.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pnp_request_fits_a_single_can_frame() {
        let unique_id = [7u8; 16];
        assert!(encode_pnp_request(unique_id).len() <= 7);
    }

    #[test]
    fn pnp_response_round_trips() {
        let unique_id = [7u8; 16];
        let mut payload = unique_id.to_vec();
        payload.extend_from_slice(&125u16.to_le_bytes());
        assert_eq!(decode_pnp_response(&payload), Some((unique_id, 125)));
    }

    #[test]
    fn execute_command_request_reads_leading_id() {
        let payload = [3u8, 0, 9, 9, 9];
        assert_eq!(decode_execute_command_request(&payload), Some(3));
    }

    #[test]
    fn register_access_request_round_trips_write_and_read() {
        let mut payload = vec![4, b'n', b'a', b'm', b'e', 1];
        payload.extend(serialize(&Value::natural16(42)));
        let (name, value) = decode_register_access_request(&payload).unwrap();
        assert_eq!(name, "name");
        assert_eq!(value, Some(Value::natural16(42)));

        let read_only = vec![4, b'n', b'a', b'm', b'e', 0];
        let (name, value) = decode_register_access_request(&read_only).unwrap();
        assert_eq!(name, "name");
        assert_eq!(value, None);
    }

    #[test]
    fn setpoint_round_trips() {
        let setpoint = crate::actuator::Setpoint {
            position: 1.0,
            velocity: 2.0,
            acceleration: 3.0,
            force: 4.0,
        };
        let payload = encode_setpoint(setpoint);
        assert_eq!(decode_setpoint(&payload), Some(setpoint));
    }

    #[test]
    fn register_list_response_empty_name_signals_exhausted() {
        assert_eq!(encode_register_list_response(None), Vec::<u8>::new());
        assert_eq!(encode_register_list_response(Some("a")), vec![b'a']);
    }
}
