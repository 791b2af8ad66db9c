//! The per-connection ISO-TP transport engine: a sender state machine and a receiver
//! state machine sharing one connection's reassembly buffer, send queue, flow-control
//! parameters and timers.
//!
//! The engine itself is synchronous and holds no channels or timers: each transition
//! is driven by an explicit call ([`Engine::feed_data`], [`Engine::write`],
//! [`Engine::cf_tick`], [`Engine::close`]) and returns the [`Action`]s the caller must
//! realize (send a raw CAN frame, notify the handler, arm the STmin timer). This keeps
//! the FSM itself trivially unit-testable without an async runtime; see
//! [`crate::isotp::network`] for the task that drives it.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::codec::{self, StMin};
use super::config::ConnectionConfig;
use super::constants::FlowStatus;
use super::error::IsoTpError;

/// The minimum wall-clock gap honored between scheduled STmin waits, matching a
/// coarse-resolution scheduler. Ensures a caller-requested STmin isn't rounded away
/// to nothing by a scheduler that doesn't bother waking up for sub-resolution delays.
const MIN_SCHEDULER_RESOLUTION: Duration = Duration::from_millis(1);

/// An effect the engine wants performed. Returned in order from each driving method;
/// the caller (see [`super::network::Connection`]) applies them against the raw CAN
/// sink and the [`super::handler::ConnectionHandler`].
#[derive(Debug)]
pub enum Action {
    /// Send these bytes as the next outbound CAN frame on this connection's `txid`.
    SendRaw(Vec<u8>),
    /// Deliver a fully reassembled (or single-frame) payload to the handler.
    Deliver(Vec<u8>),
    /// The send queue went from empty to non-empty.
    PauseWriting,
    /// The send queue fully drained.
    ResumeWriting,
    /// The connection is gone; fires exactly once over the engine's lifetime.
    ConnectionLost(Option<crate::error::Error>),
    /// Arm a one-shot timer for `Engine::cf_tick` after this long.
    ArmStMin(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReceiveState {
    Idle,
    Assembling {
        buffer: Vec<u8>,
        expected_size: usize,
        /// Next expected Consecutive Frame sequence nibble (0..=15).
        next_seq_no: u8,
        block_count: u8,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SenderState {
    Idle,
    AwaitingFlowControl,
    SendingConsecutiveFrames,
}

/// The sender and receiver state machines for one `(rxid, txid)` connection.
pub struct Engine {
    config: ConnectionConfig,

    rx_state: ReceiveState,

    send_queue: VecDeque<Vec<u8>>,
    /// Bytes of `send_queue[0]` already handed off in a First/Consecutive Frame.
    send_cursor: usize,
    send_state: SenderState,
    send_seq_no: u8,
    send_block_count: u8,
    peer_block_size: u8,
    peer_st_min: StMin,
    wait_frame_count: u8,
    closing: bool,
}

impl Engine {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            rx_state: ReceiveState::Idle,
            send_queue: VecDeque::new(),
            send_cursor: 0,
            send_state: SenderState::Idle,
            send_seq_no: 0,
            send_block_count: 0,
            peer_block_size: 0,
            peer_st_min: StMin(0),
            wait_frame_count: 0,
            closing: false,
        }
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Feed raw CAN data addressed to this connection's `rxid`.
    pub fn feed_data(&mut self, data: &[u8]) -> Vec<Action> {
        let pdu = match codec::decode(data) {
            Ok(pdu) => pdu,
            Err(err) => {
                error!("dropping malformed ISO-TP frame: {err}");
                return vec![];
            }
        };

        match pdu {
            codec::Pdu::FlowControl {
                status,
                block_size,
                st_min,
            } => self.handle_flow_control(status, block_size, st_min),
            _ if self.closing => vec![],
            codec::Pdu::SingleFrame { data } => self.handle_single_frame(data),
            codec::Pdu::FirstFrame { total_len, data } => {
                self.handle_first_frame(total_len, data)
            }
            codec::Pdu::ConsecutiveFrame { seq_no, data } => {
                self.handle_consecutive_frame(seq_no, data)
            }
        }
    }

    /// Queue a whole payload for transmission.
    pub fn write(&mut self, payload: Vec<u8>) -> Vec<Action> {
        if self.closing {
            warn!("write() on a closing connection; payload dropped");
            return vec![];
        }

        let was_empty = self.send_queue.is_empty();
        self.send_queue.push_back(payload);

        if was_empty {
            self.send_cursor = 0;
            let mut actions = vec![Action::PauseWriting];
            actions.extend(self.start_send());
            actions
        } else {
            vec![]
        }
    }

    /// Continue a Consecutive Frame burst after the STmin timer fires.
    pub fn cf_tick(&mut self) -> Vec<Action> {
        if self.send_state != SenderState::SendingConsecutiveFrames {
            return vec![];
        }
        self.send_one_cf()
    }

    /// Begin closing: no new writes are accepted, the receive side stops reassembling,
    /// and the send queue is allowed to drain before `connection_lost(None)` fires.
    pub fn close(&mut self) -> Vec<Action> {
        if self.closing {
            return vec![];
        }
        self.closing = true;
        self.rx_state = ReceiveState::Idle;

        if self.send_queue.is_empty() {
            vec![Action::ConnectionLost(None)]
        } else {
            vec![]
        }
    }

    /// The underlying bus failed; this is fatal for every connection sharing it.
    pub fn bus_error(&mut self, err: crate::error::Error) -> Vec<Action> {
        vec![Action::ConnectionLost(Some(err))]
    }

    // --- receive side -----------------------------------------------------

    fn handle_single_frame(&mut self, data: &[u8]) -> Vec<Action> {
        // A Single Frame always completes immediately, discarding any partial
        // reassembly in progress (recovery policy, ISO-TP section 6.5).
        self.rx_state = ReceiveState::Idle;
        vec![Action::Deliver(data.to_vec())]
    }

    fn handle_first_frame(&mut self, total_len: u32, data: &[u8]) -> Vec<Action> {
        let total_len = total_len as usize;

        if total_len > self.config.max_payload_len as usize {
            error!(
                "incoming payload of {total_len} bytes exceeds the {} byte cap",
                self.config.max_payload_len
            );
            self.rx_state = ReceiveState::Idle;
            return vec![Action::SendRaw(codec::encode_flow_control(
                FlowStatus::Overflow,
                self.config.block_size,
                StMin(self.config.st_min),
            ))];
        }

        let take = data.len().min(total_len);
        self.rx_state = ReceiveState::Assembling {
            buffer: data[..take].to_vec(),
            expected_size: total_len,
            next_seq_no: 1,
            block_count: 0,
        };

        vec![Action::SendRaw(codec::encode_flow_control(
            FlowStatus::ContinueToSend,
            self.config.block_size,
            StMin(self.config.st_min),
        ))]
    }

    fn handle_consecutive_frame(&mut self, seq_no: u8, data: &[u8]) -> Vec<Action> {
        let (expected, mut buffer, expected_size, mut block_count) =
            match std::mem::replace(&mut self.rx_state, ReceiveState::Idle) {
                ReceiveState::Idle => return vec![], // Idle + CF: silently dropped
                ReceiveState::Assembling {
                    buffer,
                    expected_size,
                    next_seq_no,
                    block_count,
                } => (next_seq_no, buffer, expected_size, block_count),
            };

        if seq_no != expected {
            let err = IsoTpError::SequenceError { expected, got: seq_no };
            error!("{err}");
            // rx_state was already reset to Idle above: the in-flight reassembly is
            // discarded. A fresh First Frame is required to recover.
            return vec![];
        }

        buffer.extend_from_slice(data);
        if buffer.len() > expected_size {
            buffer.truncate(expected_size);
        }
        let next_seq_no = expected.wrapping_add(1) & 0x0F;
        block_count += 1;

        if buffer.len() >= expected_size {
            return vec![Action::Deliver(buffer)];
        }

        if self.config.block_size != 0 && block_count == self.config.block_size {
            let fc = codec::encode_flow_control(
                FlowStatus::ContinueToSend,
                self.config.block_size,
                StMin(self.config.st_min),
            );
            self.rx_state = ReceiveState::Assembling {
                buffer,
                expected_size,
                next_seq_no,
                block_count: 0,
            };
            return vec![Action::SendRaw(fc)];
        }

        self.rx_state = ReceiveState::Assembling {
            buffer,
            expected_size,
            next_seq_no,
            block_count,
        };
        vec![]
    }

    // --- send side ----------------------------------------------------------

    fn handle_flow_control(&mut self, status: FlowStatus, block_size: u8, st_min: StMin) -> Vec<Action> {
        if self.send_queue.is_empty() {
            return vec![];
        }

        match status {
            FlowStatus::ContinueToSend => {
                debug!("flow control: block_size={block_size}, st_min=0x{:02x}", st_min.0);
                self.peer_block_size = block_size;
                self.peer_st_min = st_min;
                self.wait_frame_count = 0;
                self.send_block_count = 0;
                self.send_state = SenderState::SendingConsecutiveFrames;
                self.send_one_cf()
            }
            FlowStatus::Wait => {
                self.wait_frame_count += 1;
                if self.wait_frame_count > self.config.max_wft {
                    error!(
                        "peer sent {} consecutive WAIT frames, exceeding max_wft={}",
                        self.wait_frame_count, self.config.max_wft
                    );
                    // ISO 15765-2 requires aborting here; the reference implementation
                    // this engine is modeled on only logs and keeps waiting.
                    return self.abort_send(IsoTpError::WaitOverrun);
                }
                vec![]
            }
            FlowStatus::Overflow => {
                error!("peer signalled flow control overflow, aborting send");
                self.abort_send(IsoTpError::PeerOverflow)
            }
        }
    }

    fn abort_send(&mut self, err: IsoTpError) -> Vec<Action> {
        self.send_queue.clear();
        self.send_cursor = 0;
        self.send_state = SenderState::Idle;
        vec![Action::ConnectionLost(Some(err.into()))]
    }

    fn start_send(&mut self) -> Vec<Action> {
        let payload_len = self.send_queue[0].len();

        if payload_len < 8 {
            let frame = codec::encode_single_frame(&self.send_queue[0]);
            let mut actions = vec![Action::SendRaw(frame)];
            actions.extend(self.end_send());
            actions
        } else {
            let (ff, consumed) = codec::encode_first_frame(payload_len, &self.send_queue[0]);
            self.send_cursor = consumed;
            self.send_seq_no = 1;
            self.send_block_count = 0;
            self.send_state = SenderState::AwaitingFlowControl;
            vec![Action::SendRaw(ff)]
        }
    }

    fn send_one_cf(&mut self) -> Vec<Action> {
        let payload_len = self.send_queue[0].len();
        let (cf, consumed) = {
            let remaining = &self.send_queue[0][self.send_cursor..];
            codec::encode_consecutive_frame(self.send_seq_no, remaining)
        };
        self.send_cursor += consumed;
        self.send_seq_no = (self.send_seq_no + 1) & 0x0F;
        self.send_block_count += 1;

        let mut actions = vec![Action::SendRaw(cf)];

        if self.send_cursor >= payload_len {
            actions.extend(self.end_send());
        } else if self.peer_block_size != 0 && self.send_block_count == self.peer_block_size {
            self.send_state = SenderState::AwaitingFlowControl;
            self.send_block_count = 0;
        } else {
            actions.push(Action::ArmStMin(self.st_min_wait()));
        }

        actions
    }

    fn st_min_wait(&self) -> Duration {
        let wait = self.peer_st_min.as_duration();
        if wait.is_zero() {
            return wait;
        }
        wait.max(MIN_SCHEDULER_RESOLUTION + Duration::from_millis(1))
    }

    fn end_send(&mut self) -> Vec<Action> {
        self.send_queue.pop_front();
        self.send_cursor = 0;
        self.send_state = SenderState::Idle;
        self.wait_frame_count = 0;

        if !self.send_queue.is_empty() {
            self.start_send()
        } else {
            let mut actions = vec![Action::ResumeWriting];
            if self.closing {
                actions.push(Action::ConnectionLost(None));
            }
            actions
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_sends(actions: &[Action]) -> Vec<Vec<u8>> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::SendRaw(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn delivered(actions: &[Action]) -> Option<Vec<u8>> {
        actions.iter().find_map(|a| match a {
            Action::Deliver(data) => Some(data.clone()),
            _ => None,
        })
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig::new(0x7a1, 0x7a9)
    }

    #[test]
    fn single_frame_echo() {
        let mut tx = Engine::new(config());
        let actions = tx.write(b"Hello".to_vec());
        let sent = raw_sends(&actions);
        assert_eq!(sent, vec![vec![0x05, b'H', b'e', b'l', b'l', b'o']]);
        assert!(actions.iter().any(|a| matches!(a, Action::PauseWriting)));
        assert!(actions.iter().any(|a| matches!(a, Action::ResumeWriting)));

        let mut rx = Engine::new(config());
        let actions = rx.feed_data(&sent[0]);
        assert_eq!(delivered(&actions).unwrap(), b"Hello".to_vec());
    }

    #[test]
    fn two_frame_message() {
        let payload = b"0123456789AB".to_vec(); // 12 bytes
        let mut tx = Engine::new(config().with_block_size(16).with_st_min(0));
        let mut rx = Engine::new(config().with_block_size(16).with_st_min(0));

        let actions = tx.write(payload.clone());
        let ff = raw_sends(&actions).remove(0);
        assert_eq!(ff[0], 0x10);
        assert_eq!(&ff[2..], b"012345");

        let rx_actions = rx.feed_data(&ff);
        let fc = raw_sends(&rx_actions).remove(0);
        assert_eq!(fc[0] & 0xF0, 0x30);

        let tx_actions = tx.feed_data(&fc);
        let cf = raw_sends(&tx_actions).remove(0);
        assert_eq!(cf[0] & 0xF0, 0x20);
        assert_eq!(cf[0] & 0x0F, 1);
        assert_eq!(&cf[1..], b"6789AB");
        assert!(tx_actions.iter().any(|a| matches!(a, Action::ResumeWriting)));

        let rx_actions = rx.feed_data(&cf);
        assert_eq!(delivered(&rx_actions).unwrap(), payload);
    }

    #[test]
    fn block_size_one_three_consecutive_frames() {
        let payload = vec![0xAB; 21];
        let mut tx = Engine::new(config().with_block_size(1).with_st_min(0));
        let mut rx = Engine::new(config().with_block_size(1).with_st_min(0));

        let ff = raw_sends(&tx.write(payload.clone())).remove(0);
        let mut fc_count = 0;

        let fc = raw_sends(&rx.feed_data(&ff)).remove(0);
        fc_count += 1;

        let cf1 = raw_sends(&tx.feed_data(&fc)).remove(0);
        let rx_actions = rx.feed_data(&cf1);
        let fc = raw_sends(&rx_actions).remove(0);
        fc_count += 1;
        assert!(delivered(&rx_actions).is_none());

        let cf2 = raw_sends(&tx.feed_data(&fc)).remove(0);
        let rx_actions = rx.feed_data(&cf2);
        let fc = raw_sends(&rx_actions).remove(0);
        fc_count += 1;
        assert!(delivered(&rx_actions).is_none());

        let cf3 = raw_sends(&tx.feed_data(&fc)).remove(0);
        let rx_actions = rx.feed_data(&cf3);
        assert_eq!(delivered(&rx_actions).unwrap(), payload);
        assert_eq!(fc_count, 3);
    }

    #[test]
    fn escape_length_5000_bytes() {
        let payload = vec![0x42; 5000];
        let mut tx = Engine::new(config().with_block_size(0).with_st_min(0));
        let mut rx = Engine::new(config().with_block_size(0).with_st_min(0));

        let ff = raw_sends(&tx.write(payload.clone())).remove(0);
        assert_eq!(ff[0], 0x10);
        assert_eq!(ff[1], 0x00);
        assert_eq!(&ff[2..6], &5000u32.to_be_bytes());

        let fc = raw_sends(&rx.feed_data(&ff)).remove(0);
        let mut tx_actions = tx.feed_data(&fc);

        let mut received = None;
        let mut iterations = 0;
        loop {
            iterations += 1;
            assert!(iterations < 2000, "did not converge");
            let sent = raw_sends(&tx_actions);
            for cf in &sent {
                let rx_actions = rx.feed_data(cf);
                if let Some(payload) = delivered(&rx_actions) {
                    received = Some(payload);
                }
            }
            if received.is_some() {
                break;
            }
            if tx_actions.iter().any(|a| matches!(a, Action::ArmStMin(_))) {
                tx_actions = tx.cf_tick();
            } else {
                break;
            }
        }

        assert_eq!(received.unwrap(), payload);
    }

    #[test]
    fn sequence_error_then_new_ff_succeeds() {
        let mut rx = Engine::new(config());
        let ff = codec::encode_first_frame(12, b"0123456789AB").0;
        rx.feed_data(&ff);

        // Wrong sequence number: should be seq 1, send 2 instead.
        let bad_cf = codec::encode_consecutive_frame(2, b"6789AB").0;
        let actions = rx.feed_data(&bad_cf);
        assert!(delivered(&actions).is_none());

        // A fresh First Frame recovers.
        let payload = b"hello world!".to_vec();
        let ff2 = codec::encode_first_frame(payload.len(), &payload).0;
        rx.feed_data(&ff2);
        let cf2 = codec::encode_consecutive_frame(1, &payload[6..]).0;
        let actions = rx.feed_data(&cf2);
        assert_eq!(delivered(&actions).unwrap(), payload);
    }

    #[test]
    fn backpressure_pause_then_resume() {
        let mut tx = Engine::new(config());
        // A multi-frame payload stays in flight (AwaitingFlowControl) across calls,
        // so a second write queued before its Flow Control arrives must not start
        // its own First Frame yet.
        let a = tx.write(vec![0xAA; 20]);
        assert!(a.iter().any(|act| matches!(act, Action::PauseWriting)));
        assert!(!a.iter().any(|act| matches!(act, Action::ResumeWriting)));

        let b = tx.write(vec![0xBB; 20]);
        assert!(b.is_empty(), "second write should just enqueue silently");
    }

    #[test]
    fn peer_overflow_aborts_send() {
        let mut tx = Engine::new(config());
        tx.write(vec![0xAA; 20]);
        let fc = codec::encode_flow_control(FlowStatus::Overflow, 0, StMin(0));
        let actions = tx.feed_data(&fc);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ConnectionLost(Some(_)))));
    }

    #[test]
    fn wait_overrun_aborts_send() {
        let mut tx = Engine::new(config().with_max_wft(2));
        tx.write(vec![0xAA; 20]);
        let wait_fc = codec::encode_flow_control(FlowStatus::Wait, 0, StMin(0));

        assert!(tx.feed_data(&wait_fc).is_empty());
        assert!(tx.feed_data(&wait_fc).is_empty());
        let actions = tx.feed_data(&wait_fc);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ConnectionLost(Some(_)))));
    }

    #[test]
    fn first_frame_over_max_payload_len_sends_overflow_and_stays_idle() {
        let mut rx = Engine::new(config().with_max_payload_len(10));
        let ff = codec::encode_first_frame(12, b"0123456789AB").0;

        let actions = rx.feed_data(&ff);
        let sent = raw_sends(&actions);
        assert_eq!(sent.len(), 1);
        match codec::decode(&sent[0]).unwrap() {
            codec::Pdu::FlowControl { status, .. } => {
                assert_eq!(status, FlowStatus::Overflow);
            }
            other => panic!("expected a flow control frame, got {other:?}"),
        }
        assert!(delivered(&actions).is_none());

        // No Assembling state was entered: a following CF is silently dropped,
        // exactly as an unexpected CF while Idle would be.
        let cf = codec::encode_consecutive_frame(1, b"6789AB").0;
        let actions = rx.feed_data(&cf);
        assert!(actions.is_empty());
    }

    #[test]
    fn close_with_empty_queue_signals_immediately() {
        let mut engine = Engine::new(config());
        let actions = engine.close();
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ConnectionLost(None))));
    }

    #[test]
    fn close_with_pending_send_drains_first() {
        let mut tx = Engine::new(config());
        tx.write(vec![0xAA; 20]);
        let actions = tx.close();
        assert!(actions.is_empty(), "close should wait for the send to drain");
        assert!(tx.is_closing());
    }
}
