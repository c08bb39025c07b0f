//! Cyphal/UDP transport implementation.
//!
//! Each Cyphal/UDP frame is one UDP datagram: a fixed header (version,
//! priority, frame index + end-of-transfer flag, source/destination
//! node-ID, data specifier, transfer-ID) followed by the fragment payload.
//! A multi-frame transfer appends a trailing CRC32 to the payload of its
//! last fragment, the same way the CAN transport appends a CRC16.
//!
//! Destination addressing (multicast group `239.0.0.0/8` with the
//! subject-ID encoded in the low-order bits, default port 9382, DSCP per
//! priority class) is the responsibility of the hosting node's I/O adapter;
//! this module only produces/consumes the bytes that go out on the wire.

use std::vec::Vec;

use crate::time::Timestamp;
use crate::transfer::{Frame, TransferMetadata};
use crate::transport::Transport;
use crate::{NodeId, Priority, RxError, TransferKind, TxError};

use crc_any::CRCu32;

/// Default Cyphal/UDP port (spec: "default destination port 9382").
pub const DEFAULT_PORT: u16 = 9382;

/// Lowest octet of the standard Cyphal/UDP multicast prefix `239.0.0.0/8`.
pub const MULTICAST_PREFIX: [u8; 3] = [239, 0, 0];

const HEADER_LEN: usize = 1 + 1 + 4 + 2 + 2 + 1 + 2 + 8;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum DataSpecifier {
    Message,
    Request,
    Response,
}

impl DataSpecifier {
    fn to_byte(self) -> u8 {
        match self {
            DataSpecifier::Message => 0,
            DataSpecifier::Request => 1,
            DataSpecifier::Response => 2,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(DataSpecifier::Message),
            1 => Some(DataSpecifier::Request),
            2 => Some(DataSpecifier::Response),
            _ => None,
        }
    }
}

/// Unit struct for declaring transport type.
#[derive(Copy, Clone, Debug)]
pub struct Udp;

pub struct FrameMetadata {
    pub frame_index: u32,
}

#[derive(Default)]
pub struct TxMetadata {
    next_frame_index: u32,
}

#[derive(Default)]
pub struct RxMetadata {
    next_frame_index: u32,
}

/// One UDP datagram's worth of Cyphal/UDP payload, including the fixed
/// header. Destination multicast group/port/DSCP are attached separately by
/// the I/O adapter, not encoded in `payload` itself.
#[derive(Clone, Debug)]
pub struct UdpFrame<C: embedded_time::Clock> {
    pub timestamp: Timestamp<C>,
    pub payload: Vec<u8>,
}

impl<C: embedded_time::Clock> UdpFrame<C> {
    pub fn new(timestamp: Timestamp<C>, payload: Vec<u8>) -> Self {
        Self { timestamp, payload }
    }
}

impl<C: embedded_time::Clock> Transport<C> for Udp {
    type Frame = UdpFrame<C>;
    type FrameMetadata = FrameMetadata;
    type RxMetadata = RxMetadata;
    type TxMetadata = TxMetadata;

    // Large enough that most DSDL payloads fit in a single datagram; actual
    // UDP MTU is governed by the host network stack, not this constant.
    const MTU_SIZE: usize = 1408;
    const CRC_SIZE: usize = 4;
    const MAX_NODE_ID: NodeId = 65534;
    // Cyphal/UDP transfer-IDs are 64-bit and effectively never wrap.
    const TRANSFER_ID_MODULO: u64 = 0;

    fn get_crc_padded_size(requested_size: usize) -> usize {
        requested_size + Self::CRC_SIZE
    }

    fn update_rx_metadata(
        transport_metadata: &mut Self::RxMetadata,
        frame_metadata: Self::FrameMetadata,
        _frame: &crate::transfer::Frame<C>,
    ) -> Result<(), RxError> {
        if frame_metadata.frame_index != transport_metadata.next_frame_index {
            return Err(RxError::InvalidFrameOrdering);
        }
        transport_metadata.next_frame_index += 1;
        Ok(())
    }

    fn process_tx_crc(buffer: &mut [u8], data_size: usize) -> usize {
        let mut crc = CRCu32::crc32c();
        crc.digest(&buffer[0..data_size]);
        let crc = crc.get_crc();
        buffer[data_size..data_size + 4].copy_from_slice(&crc.to_le_bytes());
        data_size + 4
    }

    fn process_rx_crc(buffer: &mut [u8], frame_count: usize) -> Option<usize> {
        if frame_count <= 1 {
            return Some(buffer.len());
        }
        if buffer.len() < Self::CRC_SIZE {
            return None;
        }
        let mut crc = CRCu32::crc32c();
        crc.digest(buffer);
        // A correct trailing CRC over payload+CRC digests to a fixed residue.
        if crc.get_crc() != CRCu32::crc32c().get_crc() {
            return None;
        }
        Some(buffer.len() - Self::CRC_SIZE)
    }

    fn rx_process_frame<'a>(
        frame: &'a Self::Frame,
    ) -> Result<(crate::transfer::Frame<'a, C>, Self::FrameMetadata), RxError> {
        if frame.payload.len() < HEADER_LEN {
            return Err(RxError::FrameEmpty);
        }

        let bytes = &frame.payload[..];
        let priority_raw = bytes[1];
        let frame_index_raw = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let end_of_transfer = (frame_index_raw & 0x8000_0000) != 0;
        let frame_index = frame_index_raw & 0x7FFF_FFFF;
        let source = u16::from_le_bytes([bytes[6], bytes[7]]);
        let destination = u16::from_le_bytes([bytes[8], bytes[9]]);
        let spec = DataSpecifier::from_byte(bytes[10]).ok_or(RxError::InvalidPayload)?;
        let port_id = u16::from_le_bytes([bytes[11], bytes[12]]);
        let transfer_id = u64::from_le_bytes(bytes[13..21].try_into().unwrap());

        let kind = match spec {
            DataSpecifier::Message => TransferKind::Message,
            DataSpecifier::Request => TransferKind::Request,
            DataSpecifier::Response => TransferKind::Response,
        };

        let remote_node_id = if source == u16::MAX { None } else { Some(source) };
        if kind == TransferKind::Message && remote_node_id.is_none() && frame_index != 0 {
            return Err(RxError::AnonNotSingleFrame);
        }
        let _ = destination; // filtering against local node-ID happens in the node layer

        let priority = num_traits::FromPrimitive::from_u8(priority_raw).ok_or(RxError::InvalidCanId)?;

        Ok((
            Frame {
                metadata: TransferMetadata {
                    timestamp: frame.timestamp,
                    priority,
                    transfer_kind: kind,
                    port_id,
                    remote_node_id,
                    transfer_id,
                },
                payload: &frame.payload[HEADER_LEN..],
                first_frame: frame_index == 0,
                last_frame: end_of_transfer,
            },
            FrameMetadata { frame_index },
        ))
    }

    fn transmit_frame(
        transfer_metadata: &TransferMetadata<C>,
        transport_metadata: &mut Self::TxMetadata,
        data: &[u8],
        node_id: Option<NodeId>,
        timestamp: embedded_time::Instant<C>,
    ) -> Result<(Self::Frame, usize), TxError> {
        let consume_len = core::cmp::min(Self::MTU_SIZE, data.len());
        let last_frame = consume_len == data.len();

        if !last_frame && node_id.is_none() {
            return Err(TxError::AnonNotSingleFrame);
        }

        let spec = match transfer_metadata.transfer_kind {
            TransferKind::Message => DataSpecifier::Message,
            TransferKind::Request => {
                if node_id.is_none() {
                    return Err(TxError::ServiceNoSourceID);
                }
                DataSpecifier::Request
            }
            TransferKind::Response => {
                if node_id.is_none() {
                    return Err(TxError::ServiceNoSourceID);
                }
                DataSpecifier::Response
            }
        };
        if matches!(spec, DataSpecifier::Request | DataSpecifier::Response)
            && transfer_metadata.remote_node_id.is_none()
        {
            return Err(TxError::ServiceNoDestinationID);
        }

        let frame_index = transport_metadata.next_frame_index;
        transport_metadata.next_frame_index += 1;

        let mut header = Vec::with_capacity(HEADER_LEN + consume_len);
        header.push(1u8); // version
        header.push(transfer_metadata.priority as u8);
        let frame_index_word = frame_index | if last_frame { 0x8000_0000 } else { 0 };
        header.extend_from_slice(&frame_index_word.to_le_bytes());
        header.extend_from_slice(&node_id.unwrap_or(u16::MAX).to_le_bytes());
        header.extend_from_slice(&transfer_metadata.remote_node_id.unwrap_or(u16::MAX).to_le_bytes());
        header.push(spec.to_byte());
        header.extend_from_slice(&transfer_metadata.port_id.to_le_bytes());
        header.extend_from_slice(&transfer_metadata.transfer_id.to_le_bytes());
        header.extend_from_slice(&data[0..consume_len]);

        Ok((UdpFrame::new(timestamp, header), consume_len))
    }
}
