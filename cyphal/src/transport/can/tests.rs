use super::*;
use crate::transfer::TransferMetadata;
use crate::{Priority, TransferKind};

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

fn ts() -> crate::time::Timestamp<TestClock> {
    embedded_time::Instant::new(0)
}

#[test]
fn single_frame_message_round_trips() {
    let metadata = TransferMetadata {
        timestamp: ts(),
        priority: Priority::Nominal,
        transfer_kind: TransferKind::Message,
        port_id: 100,
        remote_node_id: None,
        transfer_id: 3,
    };
    let mut tx_meta = TxMetadata::default();
    let (frame, consumed) =
        Can::transmit_frame(&metadata, &mut tx_meta, &[1, 2, 3], Some(42), ts()).unwrap();
    assert_eq!(consumed, 3);

    let (rx_frame, frame_meta) = Can::rx_process_frame(&frame).unwrap();
    assert_eq!(rx_frame.metadata.port_id, 100);
    assert_eq!(rx_frame.metadata.remote_node_id, Some(42));
    assert!(rx_frame.first_frame);
    assert!(rx_frame.last_frame);
    assert_eq!(rx_frame.payload, &[1, 2, 3]);
    assert!(frame_meta.toggle_bit);
}

#[test]
fn anonymous_message_has_no_source() {
    let metadata = TransferMetadata {
        timestamp: ts(),
        priority: Priority::Optional,
        transfer_kind: TransferKind::Message,
        port_id: 10,
        remote_node_id: None,
        transfer_id: 0,
    };
    let mut tx_meta = TxMetadata::default();
    let (frame, _) = Can::transmit_frame(&metadata, &mut tx_meta, &[9], None, ts()).unwrap();
    let (rx_frame, _) = Can::rx_process_frame(&frame).unwrap();
    assert_eq!(rx_frame.metadata.remote_node_id, None);
}

#[test]
fn empty_frame_is_rejected() {
    let frame = CanFrame::<TestClock>::new(ts(), 0, &[]);
    assert!(matches!(Can::rx_process_frame(&frame), Err(RxError::FrameEmpty)));
}
