//! RPC dispatcher: demultiplexes incoming service transfers to registered
//! server/client handlers by `(service-ID, is-server)`.
//!
//! The dispatcher is inert until the node has a node-ID: registering a
//! server handler while anonymous is a configuration error, and incoming
//! service frames are never matched while anonymous (the node can't be a
//! valid `destination-node-ID` until then anyway).

use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("a handler is already registered for this service-ID and role")]
    AlreadyExists,
    #[error("dispatcher is inert while the node is anonymous")]
    Anonymous,
}

/// A single-method handler object: request bytes in, response bytes out.
/// Boxed so server and client handlers of different closures can share one
/// registration table.
pub type Handler = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

#[derive(Hash, Eq, PartialEq, Copy, Clone, Debug)]
struct Key {
    service_id: u16,
    is_server: bool,
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<Key, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler. `node_is_anonymous` gates server registration:
    /// a client call is permitted while anonymous (the node still needs to
    /// issue the PnP allocation request itself), a server registration is
    /// not.
    pub fn register(
        &mut self,
        service_id: u16,
        is_server: bool,
        node_is_anonymous: bool,
        handler: Handler,
    ) -> Result<(), DispatchError> {
        if is_server && node_is_anonymous {
            return Err(DispatchError::Anonymous);
        }
        let key = Key { service_id, is_server };
        if self.handlers.contains_key(&key) {
            return Err(DispatchError::AlreadyExists);
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    pub fn unregister(&mut self, service_id: u16, is_server: bool) {
        self.handlers.remove(&Key { service_id, is_server });
    }

    /// Dispatch an incoming service frame already filtered to
    /// `destination-node-ID == local` by the caller. Returns `None` when no
    /// handler is registered, or when the node is anonymous (unmatched
    /// frames are discarded, not queued).
    pub fn dispatch(
        &mut self,
        service_id: u16,
        is_server: bool,
        node_is_anonymous: bool,
        request: &[u8],
    ) -> Option<Vec<u8>> {
        if node_is_anonymous {
            return None;
        }
        let key = Key { service_id, is_server };
        self.handlers.get_mut(&key).map(|h| h(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_server_while_anonymous_is_rejected() {
        let mut d = Dispatcher::new();
        let err = d.register(430, true, true, Box::new(|_| Vec::new()));
        assert_eq!(err, Err(DispatchError::Anonymous));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut d = Dispatcher::new();
        d.register(430, true, false, Box::new(|_| Vec::new())).unwrap();
        let err = d.register(430, true, false, Box::new(|_| Vec::new()));
        assert_eq!(err, Err(DispatchError::AlreadyExists));
    }

    #[test]
    fn dispatch_matches_service_id_and_role() {
        let mut d = Dispatcher::new();
        d.register(384, true, false, Box::new(|req| req.to_vec()))
            .unwrap();
        let resp = d.dispatch(384, true, false, &[1, 2, 3]);
        assert_eq!(resp, Some(vec![1, 2, 3]));
    }

    #[test]
    fn dispatch_while_anonymous_is_discarded() {
        let mut d = Dispatcher::new();
        d.register(384, false, false, Box::new(|req| req.to_vec()))
            .unwrap();
        assert_eq!(d.dispatch(384, false, true, &[1]), None);
    }

    #[test]
    fn unmatched_frame_is_discarded() {
        let mut d = Dispatcher::new();
        assert_eq!(d.dispatch(999, true, false, &[1]), None);
    }
}
