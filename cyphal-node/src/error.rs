//! Node-wide error kinds, one variant per abstract kind from the error
//! handling design (Argument, Capacity, Memory, Anonymous, AlreadyExists,
//! Semantics, Io/Platform). Leaf modules (`pool`, `kv`, `register`,
//! `dispatch`) define their own narrower error enums and convert into this
//! one at the boundary where a caller needs a single type to match on.

use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Malformed call; indicates a bug in the caller.
    #[error("invalid argument")]
    Argument,

    /// Queue or buffer exhausted.
    #[error("capacity exhausted")]
    Capacity,

    /// Pool out of memory; counted, reflected in Heartbeat health, never fatal.
    #[error("memory exhausted")]
    Memory,

    /// Operation requires an assigned node-ID.
    #[error("node is anonymous")]
    Anonymous,

    /// Attempt to register the same port/service twice.
    #[error("already exists")]
    AlreadyExists,

    /// Type mismatch in register assignment.
    #[error("semantics error")]
    Semantics,

    /// Socket or storage failure.
    #[error("I/O or platform failure")]
    Io,
}

impl From<crate::pool::PoolError> for NodeError {
    fn from(e: crate::pool::PoolError) -> Self {
        match e {
            crate::pool::PoolError::OutOfMemory => NodeError::Memory,
            crate::pool::PoolError::InvalidSize => NodeError::Argument,
        }
    }
}

impl From<crate::kv::KvError> for NodeError {
    fn from(_: crate::kv::KvError) -> Self {
        NodeError::Io
    }
}

impl From<crate::register::RegisterError> for NodeError {
    fn from(e: crate::register::RegisterError) -> Self {
        match e {
            crate::register::RegisterError::Semantics => NodeError::Semantics,
            crate::register::RegisterError::NotFound => NodeError::Argument,
            crate::register::RegisterError::Io => NodeError::Io,
        }
    }
}

impl From<crate::dispatch::DispatchError> for NodeError {
    fn from(e: crate::dispatch::DispatchError) -> Self {
        match e {
            crate::dispatch::DispatchError::AlreadyExists => NodeError::AlreadyExists,
            crate::dispatch::DispatchError::Anonymous => NodeError::Anonymous,
        }
    }
}
