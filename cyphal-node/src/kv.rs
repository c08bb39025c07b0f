//! Persistent key-value blob store, backing the register subsystem.
//!
//! Keys are register names; they're hashed to a 64-bit digest and rendered
//! as a base-62 string to form the on-disk filename. This bounds filename
//! length and, as a side effect, makes it impossible to recover the set of
//! stored names by listing the directory; register enumeration is served
//! from the in-memory register tree instead, never from this store.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn base62(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while value > 0 {
        buf.push(BASE62[(value % 62) as usize]);
        value /= 62;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap()
}

/// Byte-blob storage keyed by hashed name.
pub struct PersistentKv {
    root: PathBuf,
}

impl PersistentKv {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, KvError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(base62(hash_key(key)))
    }

    /// Returns `None` (treated by callers as "use default") if the key is
    /// missing or unreadable.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        fs::read(self.path_for(key)).ok()
    }

    pub fn put(&self, key: &str, bytes: &[u8]) -> bool {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        if fs::write(&tmp, bytes).is_err() {
            return false;
        }
        fs::rename(&tmp, &path).is_ok()
    }

    pub fn drop_key(&self, key: &str) -> bool {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(_) => false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let kv = PersistentKv::new(dir.path()).unwrap();

        assert!(kv.put("uavcan.node.description", b"abc"));
        assert_eq!(kv.get("uavcan.node.description").unwrap(), b"abc");
    }

    #[test]
    fn missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let kv = PersistentKv::new(dir.path()).unwrap();
        assert!(kv.get("uavcan.node.id").is_none());
    }

    #[test]
    fn drop_removes_value() {
        let dir = tempfile::tempdir().unwrap();
        let kv = PersistentKv::new(dir.path()).unwrap();
        kv.put("k", b"v");
        assert!(kv.drop_key("k"));
        assert!(kv.get("k").is_none());
    }

    #[test]
    fn distinct_names_do_not_collide_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let kv = PersistentKv::new(dir.path()).unwrap();
        kv.put("uavcan.pub.feedback.id", b"one");
        kv.put("uavcan.pub.dynamics.id", b"two");
        assert_eq!(kv.get("uavcan.pub.feedback.id").unwrap(), b"one");
        assert_eq!(kv.get("uavcan.pub.dynamics.id").unwrap(), b"two");
    }
}
