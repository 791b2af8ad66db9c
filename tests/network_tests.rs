//! End-to-end tests driving two `IsoTpNetwork`s across a virtual CAN bus.

mod common;

use std::time::Duration;

use isotp::can::AsyncCanAdapter;
use isotp::isotp::{stream, ConnectionConfig, IsoTpNetwork};

const ECU_RX: u32 = 0x7e8;
const ECU_TX: u32 = 0x7e0;

fn open_pair() -> (IsoTpNetwork, IsoTpNetwork) {
    let (wire_a, wire_b) = common::virtual_bus_pair();
    (
        IsoTpNetwork::new(AsyncCanAdapter::new(wire_a)),
        IsoTpNetwork::new(AsyncCanAdapter::new(wire_b)),
    )
}

#[tokio::test]
async fn single_frame_round_trip() {
    let (tester, ecu) = open_pair();

    let (tester_handler, mut tester_reader, mut tester_writer) = stream::pair();
    let (ecu_handler, mut ecu_reader, _ecu_writer) = stream::pair();

    tester.open_connection(ConnectionConfig::new(ECU_RX, ECU_TX), tester_handler);
    ecu.open_connection(ConnectionConfig::new(ECU_TX, ECU_RX), ecu_handler);

    tester_writer.write(b"\x3e\x00".to_vec()).await;

    let received = tokio::time::timeout(Duration::from_secs(1), ecu_reader.recv())
        .await
        .expect("did not receive in time")
        .expect("connection closed unexpectedly");
    assert_eq!(received, b"\x3e\x00".to_vec());
    assert!(tester_reader.closed_error().is_none());
}

#[tokio::test]
async fn multi_frame_round_trip_with_flow_control() {
    let (tester, ecu) = open_pair();

    let config = ConnectionConfig::new(ECU_RX, ECU_TX).with_block_size(0).with_st_min(0);
    let ecu_config = ConnectionConfig::new(ECU_TX, ECU_RX).with_block_size(0).with_st_min(0);

    let (tester_handler, _tester_reader, mut tester_writer) = stream::pair();
    let (ecu_handler, mut ecu_reader, _ecu_writer) = stream::pair();

    tester.open_connection(config, tester_handler);
    ecu.open_connection(ecu_config, ecu_handler);

    let payload: Vec<u8> = (0u8..=200).collect(); // 201 bytes, needs several CFs
    tester_writer.write(payload.clone()).await;

    let received = tokio::time::timeout(Duration::from_secs(2), ecu_reader.recv())
        .await
        .expect("did not receive in time")
        .expect("connection closed unexpectedly");
    assert_eq!(received, payload);
}

#[tokio::test]
async fn backpressure_pauses_then_resumes_around_a_multi_frame_send() {
    let (tester, ecu) = open_pair();

    let config = ConnectionConfig::new(ECU_RX, ECU_TX).with_block_size(0).with_st_min(0);
    let ecu_config = ConnectionConfig::new(ECU_TX, ECU_RX).with_block_size(0).with_st_min(0);

    struct PauseTrackingHandler {
        events: std::sync::mpsc::Sender<&'static str>,
    }
    impl isotp::isotp::ConnectionHandler for PauseTrackingHandler {
        fn pause_writing(&mut self) {
            let _ = self.events.send("pause");
        }
        fn resume_writing(&mut self) {
            let _ = self.events.send("resume");
        }
    }

    let (events_tx, events_rx) = std::sync::mpsc::channel();
    let handler = Box::new(PauseTrackingHandler { events: events_tx });

    let (ecu_handler, mut ecu_reader, _ecu_writer) = stream::pair();

    let handle = tester.open_connection(config, handler);
    ecu.open_connection(ecu_config, ecu_handler);

    let payload = vec![0xAAu8; 50];
    handle.write(payload.clone());

    let received = tokio::time::timeout(Duration::from_secs(2), ecu_reader.recv())
        .await
        .expect("did not receive in time")
        .expect("connection closed unexpectedly");
    assert_eq!(received, payload);

    // Give the pause/resume events a moment to land on the channel.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let events: Vec<_> = events_rx.try_iter().collect();
    assert_eq!(events, vec!["pause", "resume"]);
}
