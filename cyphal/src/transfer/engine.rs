//! Concrete [`TransferManager`] implementation used by a hosted node.
//!
//! RX frames are reassembled per `(remote node-ID, port-ID, transfer kind)`
//! against a table of subscriptions the application has registered; frames
//! for a port nobody subscribed to are discarded. TX transfers are served
//! out of a priority queue, most urgent first and FIFO within a priority,
//! with transfers whose deadline has elapsed dropped instead of sent.

use std::collections::HashMap;
use std::vec::Vec;

use crate::time::{Duration, Timestamp};
use crate::transfer::manager::{
    timestamp_expired, CreateTransferError, InternalOrUserError, TokenAccessError,
    TransferManager, UpdateTransferError,
};
use crate::transfer::{Frame, Subscription, TransferKind, TransferMetadata};
use crate::transport::Transport;
use crate::types::{NodeId, PortId, TransferId};
use crate::{Priority, RxError};

/// Identifies an in-progress multi-frame RX reassembly session. Anonymous
/// transfers are always single-frame, so they never need one of these.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
struct SessionKey {
    remote_node_id: NodeId,
    port_id: PortId,
    kind: TransferKind,
}

struct RxSession<C: embedded_time::Clock, RxM> {
    metadata: TransferMetadata<C>,
    transport_metadata: RxM,
    buffer: Vec<u8>,
    extent: usize,
    last_frame_at: Timestamp<C>,
    frame_count: usize,
}

struct CompletedRx<C: embedded_time::Clock> {
    metadata: TransferMetadata<C>,
    payload: Vec<u8>,
}

struct TxTransfer<C: embedded_time::Clock, TxM> {
    metadata: TransferMetadata<C>,
    transport_metadata: TxM,
    payload: Vec<u8>,
    consumed: usize,
    // The sequence this transfer was originally enqueued with. Re-queued on
    // every partial `transmit` so the remaining fragments keep their place
    // in front of transfers enqueued later, rather than being re-stamped
    // with a fresh (larger) sequence that would let another transfer's
    // fragments interleave with this one on the wire.
    sequence: u64,
}

/// Reverses both priority (a lower `Priority` discriminant is more urgent)
/// and insertion order, so that a max-[`BinaryHeap`](alloc::collections::BinaryHeap)
/// pops the most urgent, oldest-enqueued transfer first.
///
/// `token` is carried along for `next_ready_tx` to retrieve but is not part
/// of the ordering or equality: `sequence` alone is already unique per
/// enqueued transfer, and `TxToken` has no ordering of its own, so including
/// it in `Ord`/`PartialEq` would make neither derivable.
#[derive(Copy, Clone, Debug)]
struct TxKey {
    priority: Priority,
    sequence: u64,
    token: TxToken,
}

impl PartialEq for TxKey {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for TxKey {}

impl PartialOrd for TxKey {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TxKey {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        (other.priority as u8)
            .cmp(&(self.priority as u8))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct RxToken(u64);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct TxToken(u64);

/// `HashMap`/`BinaryHeap`-backed [`TransferManager`]. Bounded by
/// `max_sessions` RX reassembly slots and `max_tx_transfers` outstanding TX
/// transfers; callers that need tighter memory control should watch for
/// `CreateTransferError::NoSpace`/`InternalOrUserError::InternalError`.
pub struct Engine<C: embedded_time::Clock, T: Transport<C>> {
    subscriptions: Vec<Subscription>,

    rx_sessions: HashMap<SessionKey, RxSession<C, T::RxMetadata>>,
    completed_rx: HashMap<RxToken, CompletedRx<C>>,
    next_rx_token: u64,

    // Last accepted transfer-ID per source, and when it was accepted, used
    // to reject duplicates and enforce the "strictly monotonic" rule across
    // wraparound. Aged out in `update_transfers` so a peer that restarts its
    // transfer-ID counter is accepted again once the prior entry goes stale,
    // rather than being wedged behind `AlreadyExists` forever.
    last_transfer_id: HashMap<SessionKey, (TransferId, Timestamp<C>)>,

    tx_transfers: HashMap<TxToken, TxTransfer<C, T::TxMetadata>>,
    tx_queue: std::collections::BinaryHeap<TxKey>,
    next_tx_sequence: u64,
    next_tx_token: u64,

    max_sessions: usize,
    max_tx_transfers: usize,
}

impl<C: embedded_time::Clock, T: Transport<C>> Engine<C, T> {
    pub fn new(max_sessions: usize, max_tx_transfers: usize) -> Self {
        Self {
            subscriptions: Vec::new(),
            rx_sessions: HashMap::new(),
            completed_rx: HashMap::new(),
            next_rx_token: 0,
            last_transfer_id: HashMap::new(),
            tx_transfers: HashMap::new(),
            tx_queue: std::collections::BinaryHeap::new(),
            next_tx_sequence: 0,
            next_tx_token: 0,
            max_sessions,
            max_tx_transfers,
        }
    }

    /// Register interest in a subject/service port. Replaces any existing
    /// subscription for the same `(transfer_kind, port_id)`.
    pub fn subscribe(&mut self, subscription: Subscription) {
        self.subscriptions.retain(|s| s != &subscription);
        self.subscriptions.push(subscription);
    }

    pub fn unsubscribe(&mut self, transfer_kind: TransferKind, port_id: PortId) {
        self.subscriptions
            .retain(|s| !(s.transfer_kind == transfer_kind && s.port_id == port_id));
    }

    fn find_subscription(&self, transfer_kind: TransferKind, port_id: PortId) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.transfer_kind == transfer_kind && s.port_id == port_id)
    }

    /// Pops the next TX transfer the scheduler should service, dropping any
    /// transfers further up the queue whose deadline (`metadata.timestamp`)
    /// has already elapsed.
    pub fn next_ready_tx(&mut self, now: Timestamp<C>) -> Option<TxToken> {
        while let Some(key) = self.tx_queue.pop() {
            let token = key.token;
            let Some(transfer) = self.tx_transfers.get(&token) else {
                // Already consumed or cancelled; the queue entry is stale.
                continue;
            };

            if now > transfer.metadata.timestamp {
                self.tx_transfers.remove(&token);
                continue;
            }

            return Some(token);
        }
        None
    }

    fn next_rx_token(&mut self) -> RxToken {
        let token = RxToken(self.next_rx_token);
        self.next_rx_token += 1;
        token
    }

    fn next_tx_token(&mut self) -> TxToken {
        let token = TxToken(self.next_tx_token);
        self.next_tx_token += 1;
        token
    }
}

impl<C: embedded_time::Clock, T: Transport<C>> TransferManager<C, T> for Engine<C, T> {
    type RxTransferToken = RxToken;
    type TxTransferToken = TxToken;

    fn append_frame(
        &mut self,
        frame: &Frame<C>,
        metadata: T::FrameMetadata,
    ) -> Result<Option<Self::RxTransferToken>, UpdateTransferError> {
        let Some(remote_node_id) = frame.metadata.remote_node_id else {
            // Anonymous transfers are always single-frame; there is never an
            // ongoing session to append to.
            return Err(UpdateTransferError::DoesNotExist);
        };

        let key = SessionKey {
            remote_node_id,
            port_id: frame.metadata.port_id,
            kind: frame.metadata.transfer_kind,
        };

        let session = self
            .rx_sessions
            .get_mut(&key)
            .ok_or(UpdateTransferError::DoesNotExist)?;

        if session.metadata.transfer_id != frame.metadata.transfer_id {
            // A frame belonging to a different transfer arrived mid-session;
            // drop the stale session rather than mixing payloads.
            self.rx_sessions.remove(&key);
            return Err(UpdateTransferError::DoesNotExist);
        }

        T::update_rx_metadata(&mut session.transport_metadata, metadata, frame)
            .map_err(UpdateTransferError::RxError)?;

        session.last_frame_at = frame.metadata.timestamp;
        session.frame_count += 1;
        let remaining = session.extent.saturating_sub(session.buffer.len());
        let take = core::cmp::min(remaining, frame.payload.len());
        session.buffer.extend_from_slice(&frame.payload[..take]);

        if !frame.last_frame {
            return Ok(None);
        }

        let mut session = self.rx_sessions.remove(&key).unwrap();
        let valid_len = T::process_rx_crc(&mut session.buffer, session.frame_count)
            .ok_or(UpdateTransferError::RxError(RxError::CrcError))?;
        session.buffer.truncate(valid_len);

        self.last_transfer_id
            .insert(key, (session.metadata.transfer_id, session.metadata.timestamp));

        let token = self.next_rx_token();
        self.completed_rx.insert(
            token,
            CompletedRx {
                metadata: session.metadata,
                payload: session.buffer,
            },
        );
        Ok(Some(token))
    }

    fn new_transfer(
        &mut self,
        frame: &Frame<C>,
        metadata: T::FrameMetadata,
    ) -> Result<Option<Self::RxTransferToken>, CreateTransferError> {
        let subscription = self
            .find_subscription(frame.metadata.transfer_kind, frame.metadata.port_id)
            .ok_or(CreateTransferError::NoSubscription)?;
        let extent = subscription.extent;

        if let Some(remote_node_id) = frame.metadata.remote_node_id {
            let key = SessionKey {
                remote_node_id,
                port_id: frame.metadata.port_id,
                kind: frame.metadata.transfer_kind,
            };
            if let Some(&(last, _)) = self.last_transfer_id.get(&key) {
                if !crate::transport::transfer_id_is_newer(
                    frame.metadata.transfer_id,
                    last,
                    T::TRANSFER_ID_MODULO,
                ) {
                    return Err(CreateTransferError::AlreadyExists);
                }
            }
        }

        let mut transport_metadata = T::RxMetadata::default();
        T::update_rx_metadata(&mut transport_metadata, metadata, frame)
            .map_err(CreateTransferError::RxError)?;

        let take = core::cmp::min(extent, frame.payload.len());
        let buffer = Vec::from(&frame.payload[..take]);

        if frame.last_frame {
            let mut buffer = buffer;
            let valid_len = T::process_rx_crc(&mut buffer, 1).ok_or(CreateTransferError::RxError(RxError::CrcError))?;
            buffer.truncate(valid_len);

            if let Some(remote_node_id) = frame.metadata.remote_node_id {
                let key = SessionKey {
                    remote_node_id,
                    port_id: frame.metadata.port_id,
                    kind: frame.metadata.transfer_kind,
                };
                self.last_transfer_id
                    .insert(key, (frame.metadata.transfer_id, frame.metadata.timestamp));
            }

            let token = self.next_rx_token();
            self.completed_rx.insert(
                token,
                CompletedRx {
                    metadata: frame.metadata.clone(),
                    payload: buffer,
                },
            );
            return Ok(Some(token));
        }

        let Some(remote_node_id) = frame.metadata.remote_node_id else {
            return Err(CreateTransferError::RxError(RxError::AnonNotSingleFrame));
        };

        if self.rx_sessions.len() >= self.max_sessions {
            return Err(CreateTransferError::NoSpace);
        }

        let key = SessionKey {
            remote_node_id,
            port_id: frame.metadata.port_id,
            kind: frame.metadata.transfer_kind,
        };
        self.rx_sessions.insert(
            key,
            RxSession {
                metadata: frame.metadata.clone(),
                transport_metadata,
                buffer,
                extent,
                last_frame_at: frame.metadata.timestamp,
                frame_count: 1,
            },
        );
        Ok(None)
    }

    fn with_rx_transfer(
        &mut self,
        token: Self::RxTransferToken,
        cb: impl FnOnce(&TransferMetadata<C>, &[u8]),
    ) -> Result<(), TokenAccessError> {
        let transfer = self
            .completed_rx
            .remove(&token)
            .ok_or(TokenAccessError::InvalidToken)?;
        cb(&transfer.metadata, &transfer.payload);
        Ok(())
    }

    fn cancel_rx_transfer(&mut self, token: Self::RxTransferToken) -> Result<(), TokenAccessError> {
        self.completed_rx
            .remove(&token)
            .map(|_| ())
            .ok_or(TokenAccessError::InvalidToken)
    }

    fn create_transmission<E>(
        &mut self,
        requested_buffer_size: usize,
        metadata: &TransferMetadata<C>,
        cb: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<Self::TxTransferToken, InternalOrUserError<CreateTransferError, E>> {
        if self.tx_transfers.len() >= self.max_tx_transfers {
            return Err(InternalOrUserError::InternalError(CreateTransferError::NoSpace));
        }

        let final_len = T::get_crc_padded_size(requested_buffer_size);
        let mut buffer = Vec::new();
        buffer.resize(final_len, 0u8);

        let consumed = match cb(&mut buffer[0..requested_buffer_size]) {
            Ok(consumed) => core::cmp::min(requested_buffer_size, consumed),
            Err(e) => return Err(InternalOrUserError::UserError(e)),
        };

        let real_len = T::process_tx_crc(&mut buffer, consumed);
        assert!(real_len <= buffer.len(), "transport CRC padding exceeded reserved buffer");
        buffer.truncate(real_len);

        let token = self.next_tx_token();
        let sequence = self.next_tx_sequence;
        self.next_tx_sequence += 1;

        self.tx_queue.push(TxKey {
            priority: metadata.priority,
            sequence,
            token,
        });
        self.tx_transfers.insert(
            token,
            TxTransfer {
                metadata: metadata.clone(),
                transport_metadata: T::TxMetadata::default(),
                payload: buffer,
                consumed: 0,
                sequence,
            },
        );

        Ok(token)
    }

    fn transmit(
        &mut self,
        token: Self::TxTransferToken,
        cb: impl FnOnce(&TransferMetadata<C>, &mut T::TxMetadata, &[u8]) -> usize,
    ) -> Result<Option<Self::TxTransferToken>, TokenAccessError> {
        let transfer = self
            .tx_transfers
            .get_mut(&token)
            .ok_or(TokenAccessError::InvalidToken)?;

        let consumed = cb(
            &transfer.metadata,
            &mut transfer.transport_metadata,
            &transfer.payload[transfer.consumed..],
        );
        transfer.consumed += consumed;

        if transfer.consumed >= transfer.payload.len() {
            self.tx_transfers.remove(&token);
            Ok(None)
        } else {
            // Re-queue at the transfer's original priority/sequence so the
            // remaining fragments stay ahead of anything enqueued after it,
            // rather than falling in behind same-priority transfers and
            // letting fragments of two transfers interleave on the wire.
            let priority = transfer.metadata.priority;
            let sequence = transfer.sequence;
            self.tx_queue.push(TxKey { priority, sequence, token });
            Ok(Some(token))
        }
    }

    fn cancel_tx_transfer(&mut self, token: Self::TxTransferToken) -> Result<(), TokenAccessError> {
        self.tx_transfers
            .remove(&token)
            .map(|_| ())
            .ok_or(TokenAccessError::InvalidToken)
    }

    fn update_transfers(&mut self, timestamp: Timestamp<C>, timeout: Duration) {
        self.rx_sessions
            .retain(|_, session| !timestamp_expired(timeout, timestamp, Some(session.last_frame_at)));

        // A source that goes quiet past the transfer-ID timeout (clock reset,
        // peer restart) is allowed to start a fresh transfer-ID sequence; keep
        // rejecting duplicates only while the last-seen entry is still live.
        self.last_transfer_id
            .retain(|_, entry| !timestamp_expired(timeout, timestamp, Some(entry.1)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::can::Can;

    #[derive(Copy, Clone, Debug)]
    struct TestClock;

    impl embedded_time::Clock for TestClock {
        type T = u64;
        const SCALING_FACTOR: embedded_time::fraction::Fraction =
            embedded_time::fraction::Fraction::new(1, 1_000_000);

        fn try_now(&self) -> Result<embedded_time::Instant<Self>, embedded_time::clock::Error> {
            Ok(embedded_time::Instant::new(0))
        }
    }

    fn ts(t: u64) -> Timestamp<TestClock> {
        embedded_time::Instant::new(t)
    }

    #[test]
    fn single_frame_rx_without_subscription_is_dropped() {
        let mut engine: Engine<TestClock, Can> = Engine::new(8, 8);
        let metadata = TransferMetadata {
            timestamp: ts(0),
            priority: Priority::Nominal,
            transfer_kind: TransferKind::Message,
            port_id: 10,
            remote_node_id: Some(5),
            transfer_id: 0,
        };
        let frame = Frame {
            metadata,
            payload: &[1, 2, 3],
            first_frame: true,
            last_frame: true,
        };

        let err = engine
            .new_transfer(&frame, crate::transport::can::FrameMetadata { toggle_bit: true })
            .unwrap_err();
        assert!(matches!(err, CreateTransferError::NoSubscription));
    }

    #[test]
    fn single_frame_rx_with_subscription_completes_immediately() {
        let mut engine: Engine<TestClock, Can> = Engine::new(8, 8);
        engine.subscribe(Subscription::new(
            TransferKind::Message,
            10,
            64,
            Duration::new(1_000_000),
        ));

        let metadata = TransferMetadata {
            timestamp: ts(0),
            priority: Priority::Nominal,
            transfer_kind: TransferKind::Message,
            port_id: 10,
            remote_node_id: Some(5),
            transfer_id: 0,
        };
        let frame = Frame {
            metadata,
            payload: &[1, 2, 3],
            first_frame: true,
            last_frame: true,
        };

        let token = engine
            .new_transfer(&frame, crate::transport::can::FrameMetadata { toggle_bit: true })
            .unwrap()
            .expect("single-frame transfer must complete immediately");

        let mut seen = Vec::new();
        engine.with_rx_transfer(token, |_, payload| seen = payload.to_vec()).unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_transfer_id_is_rejected() {
        let mut engine: Engine<TestClock, Can> = Engine::new(8, 8);
        engine.subscribe(Subscription::new(
            TransferKind::Message,
            10,
            64,
            Duration::new(1_000_000),
        ));
        let metadata = TransferMetadata {
            timestamp: ts(0),
            priority: Priority::Nominal,
            transfer_kind: TransferKind::Message,
            port_id: 10,
            remote_node_id: Some(5),
            transfer_id: 7,
        };
        let frame = Frame {
            metadata: metadata.clone(),
            payload: &[1],
            first_frame: true,
            last_frame: true,
        };
        let fm = crate::transport::can::FrameMetadata { toggle_bit: true };
        engine.new_transfer(&frame, fm).unwrap();

        let fm2 = crate::transport::can::FrameMetadata { toggle_bit: true };
        let err = engine.new_transfer(&frame, fm2).unwrap_err();
        assert!(matches!(err, CreateTransferError::AlreadyExists));
    }

    #[test]
    fn tx_queue_pops_highest_priority_first() {
        let mut engine: Engine<TestClock, Can> = Engine::new(8, 8);
        let low = TransferMetadata {
            timestamp: ts(1_000_000),
            priority: Priority::Optional,
            transfer_kind: TransferKind::Message,
            port_id: 1,
            remote_node_id: None,
            transfer_id: 0,
        };
        let high = TransferMetadata {
            timestamp: ts(1_000_000),
            priority: Priority::Exceptional,
            transfer_kind: TransferKind::Message,
            port_id: 2,
            remote_node_id: None,
            transfer_id: 0,
        };

        engine.create_transmission(4, &low, |buf: &mut [u8]| -> Result<usize, ()> {
            buf[0] = 1;
            Ok(1)
        }).unwrap();
        let high_token = engine.create_transmission(4, &high, |buf: &mut [u8]| -> Result<usize, ()> {
            buf[0] = 2;
            Ok(1)
        }).unwrap();

        let next = engine.next_ready_tx(ts(0)).unwrap();
        assert_eq!(next, high_token);
    }

    #[test]
    fn tx_transfer_past_deadline_is_dropped() {
        let mut engine: Engine<TestClock, Can> = Engine::new(8, 8);
        let metadata = TransferMetadata {
            timestamp: ts(100),
            priority: Priority::Nominal,
            transfer_kind: TransferKind::Message,
            port_id: 1,
            remote_node_id: None,
            transfer_id: 0,
        };
        engine.create_transmission(2, &metadata, |buf: &mut [u8]| -> Result<usize, ()> {
            buf[0] = 1;
            Ok(1)
        }).unwrap();

        assert!(engine.next_ready_tx(ts(200)).is_none());
    }
}
