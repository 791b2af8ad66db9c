//! Error types for the ISO-TP protocol engine.

use thiserror::Error;

/// Fatal and logged-but-recoverable error kinds the engine can raise. See the
/// per-kind docs for whether an occurrence tears down the connection.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum IsoTpError {
    /// A Consecutive Frame arrived with a sequence number that didn't match the
    /// expected one. Fatal for the in-flight reassembly.
    #[error("consecutive frame sequence error: expected {expected}, got {got}")]
    SequenceError { expected: u8, got: u8 },

    /// Peer sent FC(OVERFLOW): abort the current send.
    #[error("peer signalled flow control overflow, aborting send")]
    PeerOverflow,

    /// More than `max_wft` consecutive FC(WAIT) frames were received from the peer.
    #[error("peer exceeded maximum wait frame tolerance")]
    WaitOverrun,

    /// A functional (unsegmented) send's payload was longer than 7 bytes.
    #[error("functional send payload of {0} bytes exceeds the 7 byte single-frame limit")]
    FunctionalTooLong(usize),

    /// A frame's first byte or length fields don't parse as a valid PCI.
    #[error("malformed PDU")]
    MalformedFrame,

    /// An unrecognised PCI type nibble.
    #[error("unknown frame type nibble 0x{0:x}")]
    UnknownFrameType(u8),

    /// An unrecognised flow status value in a Flow Control frame.
    #[error("unknown flow status 0x{0:x}")]
    UnknownFlowStatus(u8),
}
