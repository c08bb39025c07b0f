//! Monotonic time types.
//!
//! Deadlines, reassembly timeouts and RPC response deadlines are all
//! expressed in terms of a monotonic microsecond clock (spec: "Deadlines are
//! computed from a monotonic microsecond clock that MUST NOT leap"). This
//! module just aliases `embedded_time` so the rest of the crate doesn't name
//! it directly.

/// A point in time on clock `C`.
pub type Timestamp<C> = embedded_time::Instant<C>;

/// A span of time, expressed in whole microseconds.
pub type Duration = embedded_time::duration::Microseconds<u64>;
