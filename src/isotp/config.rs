//! The connection descriptor: immutable parameters fixed at connection creation.

use crate::can::{id_from_u32, Id};

/// Describes one logical ISO-TP connection: which CAN IDs it speaks on, and the
/// flow-control parameters we grant the peer.
///
/// Immutable after creation, as required by the protocol: the block size and STmin
/// we advertise don't change mid-connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// CAN arbitration ID to accept frames from.
    pub rxid: Id,
    /// CAN arbitration ID to transmit frames on.
    pub txid: Id,
    /// Block size advertised in Flow Control frames we send. `0` means unlimited: we
    /// never ask the peer to pause for a block boundary.
    pub block_size: u8,
    /// STmin advertised in Flow Control frames we send, encoded per ISO 15765-2.
    pub st_min: u8,
    /// Maximum consecutive FC(WAIT) frames tolerated from the peer before aborting
    /// the in-flight send.
    pub max_wft: u8,
    /// Upper bound on an incoming First Frame's declared total length. Frames
    /// announcing more than this are rejected with FC(OVERFLOW) rather than
    /// accepted into an unbounded reassembly buffer.
    pub max_payload_len: u32,
}

/// Safety cap applied when a connection doesn't request one explicitly.
const DEFAULT_MAX_PAYLOAD_LEN: u32 = 4 * 1024 * 1024;

impl ConnectionConfig {
    /// Create a connection descriptor with the library's default flow-control
    /// parameters (`block_size = 16`, `st_min = 0`, `max_wft = 0`).
    pub fn new(rxid: u32, txid: u32) -> Self {
        Self {
            rxid: id_from_u32(rxid),
            txid: id_from_u32(txid),
            block_size: 16,
            st_min: 0,
            max_wft: 0,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }

    pub fn with_block_size(mut self, block_size: u8) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_st_min(mut self, st_min: u8) -> Self {
        self.st_min = st_min;
        self
    }

    pub fn with_max_wft(mut self, max_wft: u8) -> Self {
        self.max_wft = max_wft;
        self
    }

    pub fn with_max_payload_len(mut self, max_payload_len: u32) -> Self {
        self.max_payload_len = max_payload_len;
        self
    }
}
