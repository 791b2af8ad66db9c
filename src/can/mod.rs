//! Generic CAN frame types and the adapter trait backends implement.

pub mod async_can;
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

use std::fmt;

pub use async_can::AsyncCanAdapter;
pub use embedded_can::{ExtendedId, Id, StandardId};

/// Valid CAN/CAN-FD data lengths, indexed by DLC.
pub static DLC_TO_LEN: &[usize] = &[0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Builds an [`Id`] from a raw arbitration ID, choosing standard (11-bit) or
/// extended (29-bit) framing the way ISO 15765-2 does: extended iff the ID
/// does not fit in 11 bits.
pub fn id_from_u32(id: u32) -> Id {
    if id <= 0x7FF {
        Id::Standard(StandardId::new(id as u16).expect("id <= 0x7FF fits StandardId"))
    } else {
        Id::Extended(ExtendedId::new(id).expect("id > 0x7FF fits ExtendedId"))
    }
}

/// Raw numeric value of an [`Id`], without the extended-ID flag.
pub fn id_to_u32(id: Id) -> u32 {
    match id {
        Id::Standard(id) => id.as_raw() as u32,
        Id::Extended(id) => id.as_raw(),
    }
}

/// A CAN frame.
#[derive(Clone, PartialEq)]
pub struct Frame {
    /// The bus index for adapters supporting multiple CAN busses.
    pub bus: u8,
    /// Arbitration ID.
    pub id: Id,
    /// Frame data.
    pub data: Vec<u8>,
    /// Whether the frame was sent out by this adapter (loopback of a TX frame).
    pub loopback: bool,
    /// CAN-FD frame.
    pub fd: bool,
}
impl Unpin for Frame {}

impl Frame {
    pub fn new(bus: u8, id: Id, data: &[u8]) -> Result<Frame, crate::error::Error> {
        if !DLC_TO_LEN.contains(&data.len()) {
            return Err(crate::error::Error::MalformedFrame);
        }

        Ok(Frame {
            bus,
            id,
            data: data.to_vec(),
            loopback: false,
            fd: data.len() > 8,
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("bus", &self.bus)
            .field("id", &id_to_u32(self.id))
            .field("data", &hex::encode(&self.data))
            .field("loopback", &self.loopback)
            .field("fd", &self.fd)
            .finish()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A blocking, synchronous CAN adapter. [`AsyncCanAdapter`] wraps an implementation of
/// this trait to run it on a background thread and expose an async, multi-consumer
/// interface on top.
pub trait CanAdapter {
    fn send(&mut self, frames: &[Frame]) -> crate::Result<()>;
    fn recv(&mut self) -> crate::Result<Vec<Frame>>;
}
