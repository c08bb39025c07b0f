//! The node binary: boot sequence, scheduler main loop, process exit code.
//!
//! Exit code is `0` on a clean restart request, non-zero on unrecoverable
//! I/O failure during startup, per §6's "CLI surface" (no runtime flags;
//! all configuration is via registers and environment overrides).
//!
//! The scheduler's four closures all need mutable access to overlapping
//! pieces of node state (the transfer engine, the register tree, the
//! actuator...), but `Scheduler::run_until_restart` holds all four alive at
//! once, so the borrow checker can't see that only one ever runs at a time.
//! `Runtime` is kept behind a `RefCell` for exactly that reason: one thread,
//! one tick, borrows that never nest.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use cyphal::time::Duration as CyDuration;
use cyphal::transfer::{Engine, TransferManager, TransferMetadata};
use cyphal::transport::can::{Can, CanFrame};
use cyphal::{Node, Priority, Subscription, TransferKind};

use cyphal_node::actuator::Actuator;
use cyphal_node::clock::MonotonicClock;
use cyphal_node::config::apply_env_overrides;
use cyphal_node::dispatch::Dispatcher;
use cyphal_node::io::{CanAdapter, IoAdapter};
use cyphal_node::kv::PersistentKv;
use cyphal_node::node::{uptime_seconds, NodeCore, ANONYMOUS_NODE_ID};
use cyphal_node::register::{RegisterTree, Value};
use cyphal_node::scheduler::Scheduler;
use cyphal_node::services::{
    execute_command, get_info, register_access, register_list, Command, PORT_EXECUTE_COMMAND,
    PORT_GET_INFO, PORT_HEARTBEAT, PORT_LIST_SUBJECT, PORT_PNP_ALLOCATION, PORT_REGISTER_ACCESS,
    PORT_REGISTER_LIST,
};
use cyphal_node::wire;

type CyEngine = Engine<MonotonicClock, Can>;
type CyNode = Node<CyEngine, MonotonicClock, Can>;

const TRANSFER_ID_TIMEOUT_US: u64 = 2_000_000;
const CONTROL_TIMEOUT_US: u64 = 1_000_000;

fn default_registers(tree: &mut RegisterTree) {
    tree.init_register("uavcan.node.id", Value::natural16(cyphal_node::node::ANONYMOUS_NODE_ID), true, true);
    tree.init_register("uavcan.node.description", Value::String(String::new()), true, true);
    tree.init_register("uavcan.can.iface", Value::String(String::new()), true, true);
    tree.init_register("uavcan.udp.iface", Value::String(String::new()), true, true);
    tree.init_register("uavcan.can.mtu", Value::natural16(8), true, true);
    tree.init_register(
        "uavcan.udp.dscp",
        Value::Natural8(vec![0; 8]),
        true,
        true,
    );
    tree.init_register("uavcan.pub.feedback.id", Value::natural16(65535), true, true);
    tree.init_register("uavcan.pub.dynamics.id", Value::natural16(65535), true, true);
    tree.init_register("uavcan.sub.setpoint.id", Value::natural16(65535), true, true);
    tree.init_register("uavcan.sub.readiness.id", Value::natural16(65535), true, true);
}

fn register_diagnostics(tree: &mut RegisterTree, pool_oom: std::sync::Arc<std::sync::atomic::AtomicU64>) {
    let getter_oom = pool_oom.clone();
    tree.init_dynamic_register(
        "diag.pool.oom",
        Box::new(move || Value::Natural64(vec![getter_oom.load(std::sync::atomic::Ordering::Relaxed)])),
    );
}

/// `None` means "unconfigured", the same sentinel convention
/// `uavcan.node.id` already uses.
fn subject_id(registers: &RegisterTree, name: &str) -> Option<u16> {
    registers
        .find_by_name(name)
        .and_then(|v| v.as_natural16())
        .filter(|&id| id != ANONYMOUS_NODE_ID)
}

/// Registers are persistent by convention unless their name falls under the
/// `diag.*` namespace reserved for computed diagnostics (see
/// `register_diagnostics`); there's no per-register flag to query this back
/// off the tree, so `register.Access` responses re-derive it from the name.
fn is_persistent_name(name: &str) -> bool {
    !name.starts_with("diag.")
}

/// All the state the scheduler's closures mutate, held behind one `RefCell`
/// so each closure can borrow it independently without the borrow checker
/// needing to prove the closures never run concurrently (they don't: the
/// scheduler is single-threaded and strictly one-tick-at-a-time).
struct Runtime {
    node: CyNode,
    core: NodeCore,
    registers: RegisterTree,
    dispatcher: Dispatcher,
    actuator: Actuator<MonotonicClock>,
    can_adapter: Option<CanAdapter>,
    tx_sequence: HashMap<u16, u64>,
    feedback_subject: Option<u16>,
    dynamics_subject: Option<u16>,
    setpoint_subject: Option<u16>,
    readiness_subject: Option<u16>,
}

impl Runtime {
    fn now(&self, clock: &MonotonicClock) -> embedded_time::Instant<MonotonicClock> {
        use embedded_time::Clock;
        clock.try_now().expect("monotonic clock never errors")
    }

    fn rebuild_node_if_id_changed(&mut self) {
        if self.node.id() == self.core.node_id() {
            return;
        }
        let placeholder = Node::new(None, CyEngine::new(0, 0));
        let Node { transfer_manager, .. } = std::mem::replace(&mut self.node, placeholder);
        self.node = Node::new(self.core.node_id(), transfer_manager);
        tracing::info!(node_id = ?self.core.node_id(), "node identity updated");
    }

    fn enqueue(
        &mut self,
        timestamp: embedded_time::Instant<MonotonicClock>,
        priority: Priority,
        transfer_kind: TransferKind,
        port_id: u16,
        remote_node_id: Option<u16>,
        transfer_id: u64,
        payload: &[u8],
    ) {
        let metadata = TransferMetadata {
            timestamp,
            priority,
            transfer_kind,
            port_id,
            remote_node_id,
            transfer_id,
        };
        let len = payload.len();
        let result = self
            .node
            .transfer_manager
            .create_transmission(len, &metadata, |buf: &mut [u8]| -> Result<usize, ()> {
                buf[..len].copy_from_slice(payload);
                Ok(len)
            });
        if let Err(e) = result {
            tracing::warn!(port_id, ?transfer_kind, error = ?e, "failed to enqueue outgoing transfer");
        }
    }

    fn enqueue_message(&mut self, now: embedded_time::Instant<MonotonicClock>, priority: Priority, port_id: u16, payload: &[u8]) {
        let transfer_id = {
            let slot = self.tx_sequence.entry(port_id).or_insert(0);
            let id = *slot;
            *slot = slot.wrapping_add(1);
            id
        };
        self.enqueue(now, priority, TransferKind::Message, port_id, None, transfer_id, payload);
    }

    fn enqueue_response(
        &mut self,
        now: embedded_time::Instant<MonotonicClock>,
        port_id: u16,
        remote_node_id: u16,
        transfer_id: u64,
        payload: &[u8],
    ) {
        self.enqueue(
            now,
            Priority::Nominal,
            TransferKind::Response,
            port_id,
            Some(remote_node_id),
            transfer_id,
            payload,
        );
    }

    fn fast_tick(&mut self, clock: &MonotonicClock) {
        if self.core.node_id().is_none() {
            return;
        }
        let now = self.now(clock);
        let setpoint = self.actuator.setpoint();
        if let Some(subject) = self.feedback_subject {
            let payload = wire::encode_feedback(setpoint.position, setpoint.velocity);
            self.enqueue_message(now, Priority::Nominal, subject, &payload);
        }
        if let Some(subject) = self.dynamics_subject {
            let payload = wire::encode_dynamics(setpoint.acceleration, setpoint.force);
            self.enqueue_message(now, Priority::Nominal, subject, &payload);
        }
    }

    fn one_hz_tick(&mut self, clock: &MonotonicClock, rng: &mut impl rand::Rng, boot_instant: Instant) {
        let now = self.now(clock);

        if self.core.is_anonymous() {
            if let Some(unique_id) = self.core.maybe_emit_pnp_request(rng) {
                tracing::debug!("emitting PnP allocation request");
                let payload = wire::encode_pnp_request(unique_id);
                self.enqueue_message(now, Priority::Slow, PORT_PNP_ALLOCATION, &payload);
            }
        } else {
            if self.actuator.check_control_timeout(now) {
                tracing::warn!("actuator control timeout, disarming");
            }
            let health = self.core.health();
            let uptime = uptime_seconds(boot_instant);
            tracing::info!(node_id = ?self.core.node_id(), uptime, health = ?health, "heartbeat");
            let payload = wire::encode_heartbeat(uptime, health, self.core.state());
            self.enqueue_message(now, Priority::Nominal, PORT_HEARTBEAT, &payload);
        }

        self.node
            .transfer_manager
            .update_transfers(now, CyDuration::new(TRANSFER_ID_TIMEOUT_US));
    }

    fn tenth_hz_tick(&mut self, clock: &MonotonicClock) {
        if self.core.node_id().is_none() {
            // A multi-frame message can't go out while anonymous (CAN
            // requires anonymous transfers to be single-frame); nothing to
            // advertise yet anyway.
            return;
        }
        let now = self.now(clock);
        tracing::debug!("port.List advertisement tick");
        let ports = [
            PORT_GET_INFO,
            PORT_EXECUTE_COMMAND,
            PORT_REGISTER_ACCESS,
            PORT_REGISTER_LIST,
            PORT_HEARTBEAT,
            PORT_PNP_ALLOCATION,
        ];
        let payload = wire::encode_port_list(&ports);
        self.enqueue_message(now, Priority::Optional, PORT_LIST_SUBJECT, &payload);
    }

    /// Standard services are matched directly: `services.rs`'s handlers are
    /// plain functions, not `Dispatcher` registrations, so the scheduler has
    /// to be the one that knows their port-IDs. Anything else falls back to
    /// the dispatcher, which is how vendor services actually get served.
    fn handle_request(&mut self, kv: &PersistentKv, port_id: u16, payload: &[u8]) -> Option<Vec<u8>> {
        match port_id {
            PORT_GET_INFO => {
                let info = get_info(&self.core, "org.cyphal.cyphal-noded", 0);
                Some(wire::encode_get_info_response(&info))
            }
            PORT_EXECUTE_COMMAND => {
                let command_id = wire::decode_execute_command_request(payload)?;
                let command = Command::from_id(command_id).unwrap_or(Command::Vendor(command_id));
                let status = execute_command(&mut self.core, &self.registers, kv, command);
                Some(wire::encode_execute_command_response(status))
            }
            PORT_REGISTER_ACCESS => {
                let (name, value) = wire::decode_register_access_request(payload)?;
                let resp = register_access(&mut self.registers, &name, value, is_persistent_name);
                Some(wire::encode_register_access_response(&resp))
            }
            PORT_REGISTER_LIST => {
                let index = wire::decode_register_list_request(payload)?;
                let name = register_list(&self.registers, index);
                Some(wire::encode_register_list_response(name.as_deref()))
            }
            _ => self.dispatcher.dispatch(port_id, true, self.core.is_anonymous(), payload),
        }
    }

    fn process_frame(&mut self, clock: &MonotonicClock, kv: &PersistentKv, id: u32, data: &[u8]) {
        let now = self.now(clock);
        let frame = CanFrame::new(now, id, data);

        let token = match self.node.try_receive_frame(&frame) {
            Ok(Some(token)) => token,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error = ?e, "dropped inbound frame");
                return;
            }
        };

        let setpoint_subject = self.setpoint_subject;
        let readiness_subject = self.readiness_subject;
        let mut request = None;
        let mut pnp_response = None;
        let mut setpoint = None;
        let mut readiness = None;

        let access = self.node.transfer_manager.with_rx_transfer(token, |metadata, payload| {
            match metadata.transfer_kind {
                TransferKind::Request => {
                    request = Some((metadata.port_id, metadata.remote_node_id, metadata.transfer_id, payload.to_vec()));
                }
                TransferKind::Message if metadata.port_id == PORT_PNP_ALLOCATION => {
                    pnp_response = wire::decode_pnp_response(payload);
                }
                TransferKind::Message if Some(metadata.port_id) == setpoint_subject => {
                    setpoint = wire::decode_setpoint(payload);
                }
                TransferKind::Message if Some(metadata.port_id) == readiness_subject => {
                    readiness = wire::decode_readiness(payload);
                }
                TransferKind::Message | TransferKind::Response => {}
            }
        });
        if let Err(e) = access {
            tracing::debug!(error = ?e, "rx token access failed");
        }

        if let Some((unique_id, node_id)) = pnp_response {
            if self.core.on_pnp_response(&mut self.registers, unique_id, node_id) {
                self.rebuild_node_if_id_changed();
            }
        }
        if let Some(setpoint) = setpoint {
            self.actuator.on_setpoint(setpoint, now);
        }
        if let Some(readiness) = readiness {
            self.actuator.on_readiness(readiness);
        }
        if let Some((port_id, Some(remote_node_id), transfer_id, payload)) = request {
            if let Some(response) = self.handle_request(kv, port_id, &payload) {
                self.enqueue_response(now, port_id, remote_node_id, transfer_id, &response);
            }
        }
    }

    fn drain_tx(&mut self, clock: &MonotonicClock) {
        let Some(adapter) = self.can_adapter.as_ref() else {
            return;
        };
        let now = self.now(clock);
        while let Some(token) = self.node.transfer_manager.next_ready_tx(now) {
            match self.node.transmit_frame(token, now) {
                Ok((frame, _)) => {
                    if let Err(e) = adapter.send(frame.id.as_raw(), frame.payload.as_slice()) {
                        tracing::warn!(error = %e, "CAN send failed");
                    }
                }
                Err(_) => tracing::warn!("failed to build a frame for a ready tx transfer"),
            }
        }
    }
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let kv_root = std::env::var("UAVCAN_KV_ROOT").unwrap_or_else(|_| "/var/lib/cyphal-noded".to_string());
    let kv = PersistentKv::new(PathBuf::from(kv_root))?;

    let mut registers = RegisterTree::new();
    default_registers(&mut registers);
    registers.load(&kv);
    apply_env_overrides(&mut registers, std::env::vars());

    let pool_oom_counter = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
    register_diagnostics(&mut registers, pool_oom_counter.clone());

    let unique_id = load_or_generate_unique_id(&kv);
    let core = NodeCore::boot(&registers, unique_id);
    let dispatcher = Dispatcher::new();

    let clock = MonotonicClock::new();
    let mut engine: CyEngine = CyEngine::new(64, 16);
    let timeout = CyDuration::new(TRANSFER_ID_TIMEOUT_US);
    engine.subscribe(Subscription::new(TransferKind::Request, PORT_GET_INFO, 0, timeout));
    engine.subscribe(Subscription::new(TransferKind::Request, PORT_EXECUTE_COMMAND, 258, timeout));
    engine.subscribe(Subscription::new(TransferKind::Request, PORT_REGISTER_ACCESS, 512, timeout));
    engine.subscribe(Subscription::new(TransferKind::Request, PORT_REGISTER_LIST, 2, timeout));
    engine.subscribe(Subscription::new(TransferKind::Message, PORT_PNP_ALLOCATION, 18, timeout));

    let setpoint_subject = subject_id(&registers, "uavcan.sub.setpoint.id");
    if let Some(subject) = setpoint_subject {
        engine.subscribe(Subscription::new(TransferKind::Message, subject, 16, timeout));
    }
    let readiness_subject = subject_id(&registers, "uavcan.sub.readiness.id");
    if let Some(subject) = readiness_subject {
        engine.subscribe(Subscription::new(TransferKind::Message, subject, 1, timeout));
    }
    let feedback_subject = subject_id(&registers, "uavcan.pub.feedback.id");
    let dynamics_subject = subject_id(&registers, "uavcan.pub.dynamics.id");

    let can_iface = registers
        .find_by_name("uavcan.can.iface")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    let can_adapter = if can_iface.is_empty() {
        tracing::warn!("uavcan.can.iface is unset, running without a bus");
        None
    } else {
        match CanAdapter::open(&can_iface) {
            Ok(adapter) => Some(adapter),
            Err(e) => {
                tracing::warn!(iface = %can_iface, error = %e, "failed to open CAN interface, running without a bus");
                None
            }
        }
    };

    let node_id = core.node_id();
    let node = Node::new(node_id, engine);

    let boot_instant = Instant::now();
    let mut rng = rand::thread_rng();
    let mut scheduler = Scheduler::new(Duration::from_millis(20), 16);

    let runtime = RefCell::new(Runtime {
        node,
        core,
        registers,
        dispatcher,
        actuator: Actuator::new(CyDuration::new(CONTROL_TIMEOUT_US)),
        can_adapter,
        tx_sequence: HashMap::new(),
        feedback_subject,
        dynamics_subject,
        setpoint_subject,
        readiness_subject,
    });

    scheduler.run_until_restart(
        || runtime.borrow_mut().fast_tick(&clock),
        || runtime.borrow_mut().one_hz_tick(&clock, &mut rng, boot_instant),
        || runtime.borrow_mut().tenth_hz_tick(&clock),
        |deadline, batch_size| {
            let mut rt = runtime.borrow_mut();
            let Some(adapter) = rt.can_adapter.as_ref() else {
                return;
            };
            let wait = deadline.saturating_duration_since(Instant::now());
            match adapter.receive(wait, batch_size) {
                Ok(frames) => {
                    for (id, data) in frames {
                        rt.process_frame(&clock, &kv, id, &data);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "CAN receive failed"),
            }
            rt.drain_tx(&clock);
        },
        || runtime.borrow().core.restart_required(),
    );

    let Runtime { core, registers, .. } = runtime.into_inner();

    if matches!(core.state(), cyphal_node::node::NodeState::Resetting) {
        tracing::warn!("factory reset requested, clearing persistent registers before restart");
        registers.store(&kv).ok();
    } else {
        registers.store(&kv)?;
    }

    Ok(())
}

fn load_or_generate_unique_id(kv: &PersistentKv) -> [u8; 16] {
    if let Some(bytes) = kv.get(".unique_id") {
        if bytes.len() == 16 {
            let mut id = [0u8; 16];
            id.copy_from_slice(&bytes);
            return id;
        }
    }
    let mut id = [0u8; 16];
    rand::Rng::fill(&mut rand::thread_rng(), &mut id);
    kv.put(".unique_id", &id);
    id
}

fn main() -> anyhow::Result<()> {
    match run() {
        Ok(()) => {
            std::process::exit(0);
        }
        Err(e) => {
            tracing::error!(error = %e, "unrecoverable failure");
            Err(e)
        }
    }
}
