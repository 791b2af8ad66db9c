//! The ISO-TP frame codec: pure encoding/decoding of protocol control information
//! (PCI). Holds no state of its own; see [`crate::isotp::engine`] for the stateful
//! sender/receiver FSMs built on top of it.

use std::time::Duration;

use super::constants::{
    FlowStatus, PciType, FF_LENGTH_ESCAPE_THRESHOLD, FIRST_FRAME_DATA_LEN,
    FIRST_FRAME_ESCAPE_DATA_LEN, MAX_CONSECUTIVE_FRAME_LEN, MAX_SINGLE_FRAME_LEN,
};
use super::IsoTpError;

/// A minimum separation time, as requested or granted in a Flow Control frame.
/// Encodes/decodes per ISO 15765-2: `0x00..=0x7F` is milliseconds, `0xF1..=0xF9` is
/// hundreds of microseconds, anything else falls back conservatively to 127 ms.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StMin(pub u8);

impl StMin {
    pub fn as_duration(self) -> Duration {
        match self.0 {
            0x00..=0x7F => Duration::from_millis(self.0 as u64),
            0xF1..=0xF9 => Duration::from_micros((self.0 - 0xF0) as u64 * 100),
            _ => Duration::from_millis(127),
        }
    }
}

/// A decoded ISO-TP protocol data unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu<'a> {
    SingleFrame { data: &'a [u8] },
    FirstFrame { total_len: u32, data: &'a [u8] },
    ConsecutiveFrame { seq_no: u8, data: &'a [u8] },
    FlowControl {
        status: FlowStatus,
        block_size: u8,
        st_min: StMin,
    },
}

/// Decode a CAN frame's data bytes into a PDU.
pub fn decode(data: &[u8]) -> Result<Pdu<'_>, IsoTpError> {
    if data.is_empty() {
        return Err(IsoTpError::MalformedFrame);
    }

    match PciType::try_from(data[0])? {
        PciType::SingleFrame => {
            let len = (data[0] & 0x0F) as usize;
            if len == 0 || data.len() < 1 + len {
                return Err(IsoTpError::MalformedFrame);
            }
            Ok(Pdu::SingleFrame {
                data: &data[1..1 + len],
            })
        }
        PciType::FirstFrame => {
            if data.len() < 2 {
                return Err(IsoTpError::MalformedFrame);
            }
            let len_field = (((data[0] & 0x0F) as u32) << 8) | data[1] as u32;
            if len_field == 0 {
                // FF escape: bytes 2..=5 carry a big-endian 32-bit length.
                if data.len() < 6 {
                    return Err(IsoTpError::MalformedFrame);
                }
                let total_len = u32::from_be_bytes([data[2], data[3], data[4], data[5]]);
                Ok(Pdu::FirstFrame {
                    total_len,
                    data: &data[6..],
                })
            } else {
                Ok(Pdu::FirstFrame {
                    total_len: len_field,
                    data: &data[2..],
                })
            }
        }
        PciType::ConsecutiveFrame => {
            let seq_no = data[0] & 0x0F;
            Ok(Pdu::ConsecutiveFrame {
                seq_no,
                data: &data[1..],
            })
        }
        PciType::FlowControl => {
            if data.len() < 3 {
                return Err(IsoTpError::MalformedFrame);
            }
            let status = FlowStatus::try_from(data[0])?;
            Ok(Pdu::FlowControl {
                status,
                block_size: data[1],
                st_min: StMin(data[2]),
            })
        }
    }
}

/// Encode a Single Frame. `data.len()` must be in `1..=7`.
pub fn encode_single_frame(data: &[u8]) -> Vec<u8> {
    debug_assert!(!data.is_empty() && data.len() <= MAX_SINGLE_FRAME_LEN);
    let mut buf = Vec::with_capacity(1 + data.len());
    buf.push(((PciType::SingleFrame as u8) << 4) | data.len() as u8);
    buf.extend_from_slice(data);
    buf
}

/// Encode a First Frame for a payload of `total_len` bytes. Returns the encoded frame
/// and the number of leading bytes of `data` it consumed (6, or 2 under the escape).
pub fn encode_first_frame(total_len: usize, data: &[u8]) -> (Vec<u8>, usize) {
    let mut buf = Vec::with_capacity(8);
    if total_len < FF_LENGTH_ESCAPE_THRESHOLD {
        buf.push(((PciType::FirstFrame as u8) << 4) | ((total_len >> 8) as u8 & 0x0F));
        buf.push((total_len & 0xFF) as u8);
        let take = FIRST_FRAME_DATA_LEN.min(data.len());
        buf.extend_from_slice(&data[..take]);
        (buf, take)
    } else {
        buf.push((PciType::FirstFrame as u8) << 4);
        buf.push(0);
        buf.extend_from_slice(&(total_len as u32).to_be_bytes());
        let take = FIRST_FRAME_ESCAPE_DATA_LEN.min(data.len());
        buf.extend_from_slice(&data[..take]);
        (buf, take)
    }
}

/// Encode a Consecutive Frame carrying up to 7 bytes of `data`. Returns the encoded
/// frame and the number of leading bytes of `data` it consumed.
pub fn encode_consecutive_frame(seq_no: u8, data: &[u8]) -> (Vec<u8>, usize) {
    let take = MAX_CONSECUTIVE_FRAME_LEN.min(data.len());
    let mut buf = Vec::with_capacity(1 + take);
    buf.push(((PciType::ConsecutiveFrame as u8) << 4) | (seq_no & 0x0F));
    buf.extend_from_slice(&data[..take]);
    (buf, take)
}

/// Encode a Flow Control frame.
pub fn encode_flow_control(status: FlowStatus, block_size: u8, st_min: StMin) -> Vec<u8> {
    vec![((PciType::FlowControl as u8) << 4) | status as u8, block_size, st_min.0]
}
