//! The register subsystem: a name-indexed store of typed values backing
//! configuration, diagnostics and calibration, persisted to disk across
//! restarts.
//!
//! Registers are kept in a [`std::collections::BTreeMap`] ordered by name.
//! This gives the same "balanced tree, stable ordering, log-ish lookup"
//! contract spec'd for a hash-indexed tree without the collision bookkeeping
//! a hash index would need; `find_by_index` walks the ordered keys, which is
//! O(n) rather than O(1), a deliberate trade given realistic register counts
//! (tens to low hundreds per node).

mod value;

pub use value::Value;
pub(crate) use value::{deserialize, serialize};

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("value kind mismatch")]
    Semantics,
    #[error("no such register")]
    NotFound,
    #[error("I/O error persisting register")]
    Io,
}

/// A getter backing a diagnostic register whose value is computed on read
/// rather than stored; never persisted, never remotely mutable.
pub type Getter = Box<dyn Fn() -> Value + Send + Sync>;

pub struct Register {
    value: Value,
    persistent: bool,
    mutable: bool,
    getter: Option<Getter>,
}

impl Register {
    fn read(&self) -> Value {
        match &self.getter {
            Some(f) => f(),
            None => self.value.clone(),
        }
    }
}

/// Name-indexed register store with a generation counter bumped on every
/// [`RegisterTree::init_register`] call, so callers holding a cached index
/// from `find_by_index` can detect that the index space has shifted.
pub struct RegisterTree {
    registers: BTreeMap<String, Register>,
    generation: u64,
}

impl RegisterTree {
    pub fn new() -> Self {
        Self {
            registers: BTreeMap::new(),
            generation: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Declare a register if it doesn't already exist. Idempotent: calling
    /// this again for a name that already exists is a no-op, matching the
    /// "declare defaults at startup, restore persisted values over them"
    /// boot sequence.
    pub fn init_register(&mut self, name: &str, default: Value, persistent: bool, mutable: bool) {
        if self.registers.contains_key(name) {
            return;
        }
        self.registers.insert(
            name.to_string(),
            Register {
                value: default,
                persistent,
                mutable,
                getter: None,
            },
        );
        self.generation += 1;
    }

    /// Declare a dynamic register computed by `getter` on every read. Never
    /// persisted and never remotely mutable via [`RegisterTree::assign`].
    pub fn init_dynamic_register(&mut self, name: &str, getter: Getter) {
        if self.registers.contains_key(name) {
            return;
        }
        self.registers.insert(
            name.to_string(),
            Register {
                value: Value::Empty,
                persistent: false,
                mutable: false,
                getter: Some(getter),
            },
        );
        self.generation += 1;
    }

    pub fn find_by_name(&self, name: &str) -> Option<Value> {
        self.registers.get(name).map(Register::read)
    }

    pub fn is_mutable(&self, name: &str) -> bool {
        self.registers.get(name).map_or(false, |r| r.mutable)
    }

    /// Returns the register at ordinal `index` in current name order, along
    /// with its name, or `None` once `index` runs past the end (the
    /// convention register.List relies on to learn the table is exhausted).
    pub fn find_by_index(&self, index: usize) -> Option<(&str, Value)> {
        self.registers
            .iter()
            .nth(index)
            .map(|(name, reg)| (name.as_str(), reg.read()))
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn traverse(&self, mut visit: impl FnMut(&str, &Value)) {
        for (name, reg) in &self.registers {
            let value = reg.read();
            visit(name, &value);
        }
    }

    /// Assign `src` into the named register, applying the coercion rules in
    /// [`value::assign`]. Fails with `NotFound` for an unknown name and
    /// `Semantics` both for an immutable/dynamic register and for an
    /// incompatible value kind.
    pub fn assign(&mut self, name: &str, src: &Value) -> Result<(), RegisterError> {
        let reg = self.registers.get_mut(name).ok_or(RegisterError::NotFound)?;
        if !reg.mutable || reg.getter.is_some() {
            return Err(RegisterError::Semantics);
        }
        value::assign(&mut reg.value, src).map_err(|_| RegisterError::Semantics)
    }

    /// Load persisted values over the declared defaults. Call once at boot,
    /// after all `init_register` calls. Missing or corrupt entries keep
    /// their default, matching the "load, falling back to default" rule.
    pub fn load(&mut self, kv: &crate::kv::PersistentKv) {
        for (name, reg) in self.registers.iter_mut() {
            if !reg.persistent {
                continue;
            }
            if let Some(bytes) = kv.get(name) {
                if let Some(value) = value::deserialize(&bytes) {
                    reg.value = value;
                }
            }
        }
    }

    /// Store all persistent registers. Call on a controlled shutdown or in
    /// response to `uavcan.node.ExecuteCommand` STORE_PERSISTENT_STATES.
    pub fn store(&self, kv: &crate::kv::PersistentKv) -> Result<(), RegisterError> {
        for (name, reg) in &self.registers {
            if !reg.persistent {
                continue;
            }
            let bytes = value::serialize(&reg.value);
            if !kv.put(name, &bytes) {
                return Err(RegisterError::Io);
            }
        }
        Ok(())
    }
}

impl Default for RegisterTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent_and_keeps_first_default() {
        let mut tree = RegisterTree::new();
        tree.init_register("uavcan.node.id", Value::natural16(65535), true, true);
        tree.init_register("uavcan.node.id", Value::natural16(1), true, true);
        assert_eq!(tree.find_by_name("uavcan.node.id"), Some(Value::natural16(65535)));
    }

    #[test]
    fn generation_bumps_only_on_new_registers() {
        let mut tree = RegisterTree::new();
        tree.init_register("a", Value::Empty, false, true);
        let gen_after_first = tree.generation();
        tree.init_register("a", Value::Empty, false, true);
        assert_eq!(tree.generation(), gen_after_first);
        tree.init_register("b", Value::Empty, false, true);
        assert_eq!(tree.generation(), gen_after_first + 1);
    }

    #[test]
    fn assign_respects_mutability() {
        let mut tree = RegisterTree::new();
        tree.init_register("uavcan.node.id", Value::natural16(0), true, false);
        let err = tree.assign("uavcan.node.id", &Value::natural16(5));
        assert_eq!(err, Err(RegisterError::Semantics));
    }

    #[test]
    fn assign_unknown_name_fails_not_found() {
        let mut tree = RegisterTree::new();
        assert_eq!(
            tree.assign("no.such.register", &Value::natural16(1)),
            Err(RegisterError::NotFound)
        );
    }

    #[test]
    fn dynamic_register_is_never_mutable_and_recomputes() {
        let mut tree = RegisterTree::new();
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU16::new(0));
        let c = counter.clone();
        tree.init_dynamic_register(
            "uavcan.diag.uptime",
            Box::new(move || Value::natural16(c.fetch_add(1, std::sync::atomic::Ordering::SeqCst))),
        );
        assert_eq!(tree.find_by_name("uavcan.diag.uptime"), Some(Value::natural16(0)));
        assert_eq!(tree.find_by_name("uavcan.diag.uptime"), Some(Value::natural16(1)));
        assert_eq!(
            tree.assign("uavcan.diag.uptime", &Value::natural16(9)),
            Err(RegisterError::Semantics)
        );
    }

    #[test]
    fn find_by_index_walks_name_order_and_ends() {
        let mut tree = RegisterTree::new();
        tree.init_register("b", Value::natural16(2), false, true);
        tree.init_register("a", Value::natural16(1), false, true);
        assert_eq!(tree.find_by_index(0).unwrap().0, "a");
        assert_eq!(tree.find_by_index(1).unwrap().0, "b");
        assert!(tree.find_by_index(2).is_none());
    }

    #[test]
    fn persistence_round_trips_through_kv() {
        let dir = tempfile::tempdir().unwrap();
        let kv = crate::kv::PersistentKv::new(dir.path()).unwrap();

        let mut tree = RegisterTree::new();
        tree.init_register("uavcan.node.id", Value::natural16(65535), true, true);
        tree.assign("uavcan.node.id", &Value::natural16(42)).unwrap();
        tree.store(&kv).unwrap();

        let mut reloaded = RegisterTree::new();
        reloaded.init_register("uavcan.node.id", Value::natural16(65535), true, true);
        reloaded.load(&kv);
        assert_eq!(reloaded.find_by_name("uavcan.node.id"), Some(Value::natural16(42)));
    }

    #[test]
    fn non_persistent_register_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let kv = crate::kv::PersistentKv::new(dir.path()).unwrap();

        let mut tree = RegisterTree::new();
        tree.init_register("uavcan.diag.scratch", Value::natural16(0), false, true);
        tree.assign("uavcan.diag.scratch", &Value::natural16(7)).unwrap();
        tree.store(&kv).unwrap();

        assert!(kv.get("uavcan.diag.scratch").is_none());
    }
}
