//! Protocol-wide scalar types shared by every transport.
//!
//! Node-IDs, port-IDs and transfer-IDs are transport-agnostic at this layer;
//! each `Transport` impl narrows them to its own wire width (e.g. CAN uses a
//! 7-bit node-ID and a 5-bit transfer-ID, UDP uses a 16-bit node-ID and a
//! 64-bit transfer-ID) and is responsible for rejecting values it cannot
//! represent.

/// Node identifier. `None` (at the call site, `Option<NodeId>`) represents
/// the anonymous sentinel.
pub type NodeId = u16;

/// Largest node-ID representable on any transport this crate implements.
/// Individual transports enforce a narrower bound (see `Transport::MAX_NODE_ID`).
pub const MAX_NODE_ID: NodeId = 65534;

/// Subject or service identifier. `None` means "unset / disabled".
pub type PortId = u16;

/// Largest port-ID representable on any transport this crate implements.
pub const MAX_PORT_ID: PortId = 8191;

/// Monotonically increasing per-(source, port, role) counter.
///
/// Widened to 64 bits here; transports narrow (and wrap) it to their own
/// width when building wire frames.
pub type TransferId = u64;
