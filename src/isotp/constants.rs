//! Protocol control information (PCI) constants, per ISO 15765-2 section 5.

/// The PCI type lives in the high nibble of the first PDU byte.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum PciType {
    SingleFrame = 0x0,
    FirstFrame = 0x1,
    ConsecutiveFrame = 0x2,
    FlowControl = 0x3,
}

pub const PCI_TYPE_MASK: u8 = 0xF0;

impl TryFrom<u8> for PciType {
    type Error = crate::isotp::IsoTpError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val & PCI_TYPE_MASK {
            0x00 => Ok(PciType::SingleFrame),
            0x10 => Ok(PciType::FirstFrame),
            0x20 => Ok(PciType::ConsecutiveFrame),
            0x30 => Ok(PciType::FlowControl),
            _ => Err(crate::isotp::IsoTpError::UnknownFrameType(val)),
        }
    }
}

/// Flow status carried in the low nibble of a Flow Control frame's first byte.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum FlowStatus {
    ContinueToSend = 0x0,
    Wait = 0x1,
    Overflow = 0x2,
}

impl TryFrom<u8> for FlowStatus {
    type Error = crate::isotp::IsoTpError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val & 0xF {
            0x0 => Ok(FlowStatus::ContinueToSend),
            0x1 => Ok(FlowStatus::Wait),
            0x2 => Ok(FlowStatus::Overflow),
            other => Err(crate::isotp::IsoTpError::UnknownFlowStatus(other)),
        }
    }
}

/// Threshold below which a First Frame's 12-bit length field is used directly;
/// at or above this, the FF escape sequence with a 32-bit length is required.
pub const FF_LENGTH_ESCAPE_THRESHOLD: usize = 4096;

/// Payload bytes carried by a Single Frame at most (classic, non-FD CAN: 7 bytes
/// after the one PCI byte in an 8 byte frame).
pub const MAX_SINGLE_FRAME_LEN: usize = 7;

/// Payload bytes carried by a First Frame with the 12-bit length field.
pub const FIRST_FRAME_DATA_LEN: usize = 6;

/// Payload bytes carried by a First Frame using the 32-bit length escape.
pub const FIRST_FRAME_ESCAPE_DATA_LEN: usize = 2;

/// Payload bytes carried by a Consecutive Frame at most.
pub const MAX_CONSECUTIVE_FRAME_LEN: usize = 7;

/// Maximum payload length a functional (unsegmented, broadcast) send may carry.
pub const MAX_FUNCTIONAL_LEN: usize = 7;
