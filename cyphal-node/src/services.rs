//! Standard service handlers: `GetInfo`, `ExecuteCommand`, `register.Access`,
//! `register.List`. Each is a plain function over the node's owned state
//! rather than a boxed `Handler` closure, because they need mutable access
//! to both the register tree and the node core together, which the generic
//! `dispatch::Dispatcher` registration isn't shaped for; the scheduler calls
//! these directly when dispatch resolves the corresponding service-ID.

use crate::node::NodeCore;
use crate::register::{RegisterError, RegisterTree, Value};

/// Standard `uavcan.node`/`uavcan.register` service-IDs, and the one
/// non-standard subject this binary picked for its `port.List`
/// advertisement (the standard doesn't fix a number for that one).
pub const PORT_GET_INFO: u16 = 430;
pub const PORT_EXECUTE_COMMAND: u16 = 435;
pub const PORT_REGISTER_ACCESS: u16 = 384;
pub const PORT_REGISTER_LIST: u16 = 385;
pub const PORT_HEARTBEAT: u16 = 7509;
pub const PORT_PNP_ALLOCATION: u16 = 8166;
pub const PORT_LIST_SUBJECT: u16 = 390;

pub struct GetInfoResponse {
    pub protocol_version_major: u8,
    pub protocol_version_minor: u8,
    pub software_version_major: u8,
    pub software_version_minor: u8,
    pub vcs_revision_id: u64,
    pub unique_id: [u8; 16],
    pub name: String,
}

pub fn get_info(core: &NodeCore, name: &str, vcs_revision_id: u64) -> GetInfoResponse {
    GetInfoResponse {
        protocol_version_major: 1,
        protocol_version_minor: 0,
        software_version_major: 0,
        software_version_minor: 1,
        vcs_revision_id,
        unique_id: core.unique_id(),
        name: name.to_string(),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Restart,
    FactoryReset,
    StorePersistentStates,
    BeginSoftwareUpdate,
    Vendor(u16),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    BadCommand,
    BadState,
}

impl Command {
    /// Standard `uavcan.node.ExecuteCommand` command-IDs below 0xFFFF;
    /// anything at or above 0x8000 outside the standard range is treated as
    /// vendor-specific.
    pub fn from_id(id: u16) -> Option<Command> {
        match id {
            1 => Some(Command::Restart),
            2 => Some(Command::FactoryReset),
            3 => Some(Command::StorePersistentStates),
            4 => Some(Command::BeginSoftwareUpdate),
            0x8000..=0xFFFF => Some(Command::Vendor(id)),
            _ => None,
        }
    }
}

/// Executes a command against the node core and register tree, returning
/// the status to mirror back in the RPC response. `kv` is used only for
/// `StorePersistentStates`.
pub fn execute_command(
    core: &mut NodeCore,
    registers: &RegisterTree,
    kv: &crate::kv::PersistentKv,
    command: Command,
) -> CommandStatus {
    match command {
        Command::Restart => {
            core.request_restart();
            CommandStatus::Success
        }
        Command::FactoryReset => {
            core.request_factory_reset();
            CommandStatus::Success
        }
        Command::StorePersistentStates => match registers.store(kv) {
            Ok(()) => {
                core.request_restart();
                CommandStatus::Success
            }
            Err(_) => CommandStatus::BadState,
        },
        Command::BeginSoftwareUpdate => CommandStatus::BadState,
        Command::Vendor(id) => {
            tracing::warn!(command_id = id, "unhandled vendor command, reporting BAD_COMMAND");
            CommandStatus::BadCommand
        }
    }
}

pub struct AccessResponse {
    pub value: Value,
    pub mutable: bool,
    pub persistent: bool,
}

/// `register.Access`: if `write_value` is `Some`, attempt to assign it
/// first (a failed assignment is not itself an RPC error, it just leaves
/// the stored value unchanged), then always respond with the current
/// value. An unknown name responds with an empty value and both flags
/// false, per §4.7.
pub fn register_access(
    registers: &mut RegisterTree,
    name: &str,
    write_value: Option<Value>,
    persistent_names: impl Fn(&str) -> bool,
) -> AccessResponse {
    if let Some(value) = write_value {
        match registers.assign(name, &value) {
            Ok(()) => {}
            Err(RegisterError::NotFound) => {}
            Err(e) => tracing::warn!(register = %name, error = %e, "register.Access write rejected"),
        }
    }

    match registers.find_by_name(name) {
        Some(value) => AccessResponse {
            value,
            mutable: registers.is_mutable(name),
            persistent: persistent_names(name),
        },
        None => AccessResponse {
            value: Value::Empty,
            mutable: false,
            persistent: false,
        },
    }
}

/// `register.List`: the name at `index`, or `None` once `index` runs past
/// the last register (the RPC response encodes that as an empty name).
pub fn register_list(registers: &RegisterTree, index: usize) -> Option<String> {
    registers.find_by_index(index).map(|(name, _)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeCore;

    fn boot_operational() -> (NodeCore, RegisterTree) {
        let mut registers = RegisterTree::new();
        registers.init_register("uavcan.node.id", Value::natural16(125), true, true);
        let core = NodeCore::boot(&registers, [7; 16]);
        (core, registers)
    }

    #[test]
    fn unknown_vendor_command_is_bad_command() {
        let (mut core, registers) = boot_operational();
        let dir = tempfile::tempdir().unwrap();
        let kv = crate::kv::PersistentKv::new(dir.path()).unwrap();
        let status = execute_command(&mut core, &registers, &kv, Command::from_id(1000).unwrap());
        assert_eq!(status, CommandStatus::BadCommand);
    }

    #[test]
    fn begin_software_update_is_bad_state() {
        let (mut core, registers) = boot_operational();
        let dir = tempfile::tempdir().unwrap();
        let kv = crate::kv::PersistentKv::new(dir.path()).unwrap();
        let status = execute_command(&mut core, &registers, &kv, Command::BeginSoftwareUpdate);
        assert_eq!(status, CommandStatus::BadState);
    }

    #[test]
    fn restart_command_sets_restart_required() {
        let (mut core, registers) = boot_operational();
        let dir = tempfile::tempdir().unwrap();
        let kv = crate::kv::PersistentKv::new(dir.path()).unwrap();
        execute_command(&mut core, &registers, &kv, Command::Restart);
        assert!(core.restart_required());
    }

    #[test]
    fn access_unknown_name_returns_empty() {
        let mut registers = RegisterTree::new();
        let resp = register_access(&mut registers, "no.such.thing", None, |_| false);
        assert_eq!(resp.value, Value::Empty);
        assert!(!resp.mutable);
    }

    #[test]
    fn access_writes_then_echoes_current_value() {
        let mut registers = RegisterTree::new();
        registers.init_register("uavcan.node.description", Value::String(String::new()), true, true);
        let resp = register_access(
            &mut registers,
            "uavcan.node.description",
            Some(Value::String("abc".into())),
            |_| true,
        );
        assert_eq!(resp.value, Value::String("abc".into()));
        assert!(resp.mutable);
        assert!(resp.persistent);
    }

    #[test]
    fn list_runs_out_with_none() {
        let mut registers = RegisterTree::new();
        registers.init_register("a", Value::Empty, false, true);
        assert_eq!(register_list(&registers, 0), Some("a".to_string()));
        assert_eq!(register_list(&registers, 1), None);
    }
}
