//! The Node struct is a conveniance wrapper around the Transport and TransferManager
//! implementations. Currently it just handles ingesting and transmitting data, although
//! it might make sense in the future to split these up into seperate concepts. Currently
//! the only coupling between TX and RX is the node ID, which can be cheaply replicated.
//! It might be prudent to split out Messages and Services, into seperate concepts (e.g.
//! Publisher, Requester, Responder, and Subscriber, a la canadensis, but I'll need to
//! play around with those concepts before I commit to anything)

use core::marker::PhantomData;

use core::clone::Clone;

use crate::transfer::manager::{CreateTransferError, TokenAccessError, UpdateTransferError};
use crate::transfer::TransferManager;
use crate::transport::Transport;
use crate::{types::*, RxError, TransferKind, TxError};

/// Node implementation. Generic across transfer managers and transport types.
pub struct Node<M: TransferManager<C, T>, C: embedded_time::Clock, T: Transport<C>> {
    id: Option<NodeId>,

    /// Transfer manager. Made public so it could be managed by implementation.
    ///
    /// Instead of being public, could be placed behind a `with_transfer_manager` fn
    /// which took a closure. I can't decide which API is better.
    pub transfer_manager: M,

    _clock: PhantomData<C>,
    _transport: PhantomData<T>,
}

pub enum TransmitFrameError {
    TokenError(TokenAccessError),
    TxError(TxError),
    /// This indicates an error with the transfer manager implementation,
    /// when there is no access error but the callback has not been called
    InvalidHandling,
}

#[derive(Copy, Clone, Debug)]
pub enum TransmissionType {
    Message,
    Request,
    Response,
}

impl<M, C, T> Node<M, C, T>
where
    M: TransferManager<C, T>,
    C: embedded_time::Clock + Clone,
    T: Transport<C>,
{
    pub fn new(id: Option<NodeId>, transfer_manager: M) -> Self {
        Self {
            id,
            transfer_manager,
            _clock: PhantomData,
            _transport: PhantomData,
        }
    }

    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn try_receive_frame(&mut self, frame: &T::Frame) -> Result<Option<M::RxTransferToken>, RxError> {
        let (frame, frame_metadata) = T::rx_process_frame(frame)?;

        // Check if a message is for us
        if let Some(node_id) = frame.metadata.remote_node_id {
            match frame.metadata.transfer_kind {
                TransferKind::Message => {
                    return Err(RxError::MessageWithRemoteId);
                }
                TransferKind::Request | TransferKind::Response => match self.id {
                    Some(id) => {
                        if node_id != id {
                            // Targeted message, but not for us
                            return Ok(None);
                        }
                    }
                    None => {
                        // Targeted message, but we are anonymous
                        return Ok(None);
                    }
                },
            }
        }

        match self.transfer_manager.append_frame(&frame, frame_metadata) {
            Ok(tok) => Ok(tok),
            Err(UpdateTransferError::NoSpace) => Ok(None),
            Err(UpdateTransferError::TimedOut) => Ok(None),
            Err(UpdateTransferError::RxError(e)) => Err(e),
            Err(UpdateTransferError::DoesNotExist) => {
                if !frame.first_frame {
                    return Err(RxError::NewSessionNoStart);
                }

                match self.transfer_manager.new_transfer(&frame, frame_metadata) {
                    Ok(tok) => Ok(tok),
                    // No subscriber wants this port; silently discard per
                    // the "frames with no matching subscription are dropped"
                    // rule.
                    Err(CreateTransferError::NoSubscription) => Ok(None),
                    Err(CreateTransferError::AlreadyExists) => Ok(None),
                    Err(CreateTransferError::NoSpace) => Ok(None),
                    Err(CreateTransferError::RxError(e)) => Err(e),
                }
            }
        }
    }

    /// Creates a new frame for the provided transport to carry, consuming one
    /// step of the given TX transfer token. Returns a new token if more
    /// frames remain to be produced.
    pub fn transmit_frame(
        &mut self,
        token: M::TxTransferToken,
        timestamp: embedded_time::Instant<C>,
    ) -> Result<(T::Frame, Option<M::TxTransferToken>), TransmitFrameError> {
        let mut frame_out = Err(TransmitFrameError::InvalidHandling);
        let id = self.id;
        let res = self.transfer_manager.transmit(token, |metadata, tx_metadata, data| {
            match T::transmit_frame(metadata, tx_metadata, data, id, timestamp) {
                Ok((frame, consumed)) => {
                    frame_out = Ok(frame);
                    consumed
                }
                Err(e) => {
                    frame_out = Err(TransmitFrameError::TxError(e));
                    0
                }
            }
        });

        match res {
            Ok(token) => match frame_out {
                Ok(frame) => Ok((frame, token)),
                // Some TxError occurred, so we can't continue sending things,
                // clean up.
                Err(TransmitFrameError::TxError(e)) => {
                    if let Some(token) = token {
                        // Dropping any returned error here, the token should be correct
                        // from the fact we got a transmit error
                        let _ = self.transfer_manager.cancel_tx_transfer(token);
                    }
                    Err(TransmitFrameError::TxError(e))
                }
                // Generic error, just return it and move on
                Err(e) => Err(e),
            },
            Err(e) => Err(TransmitFrameError::TokenError(e)),
        }
    }
}
