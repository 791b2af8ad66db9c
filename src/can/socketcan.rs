//! [`CanAdapter`] backend for Linux SocketCAN, using the [`socketcan`] crate.

use crate::can::{CanAdapter, Frame, Id};
use crate::error::Error;

use socketcan::{CanFrame, ExtendedId, Frame as SocketCanFrame, Socket, SocketOptions, StandardId};

/// Adapter for a SocketCAN interface (e.g. `can0`, `vcan0`).
pub struct SocketCan {
    socket: socketcan::CanSocket,
}

impl SocketCan {
    /// Open a SocketCAN interface by name and wrap it for async use.
    pub fn new_async(ifname: &str) -> Result<crate::can::AsyncCanAdapter, Error> {
        let socket = Self::open(ifname)?;
        Ok(crate::can::AsyncCanAdapter::new(socket))
    }

    /// Open a SocketCAN interface by name.
    pub fn open(ifname: &str) -> Result<Self, Error> {
        let socket = socketcan::CanSocket::open(ifname)?;
        socket.set_nonblocking(true)?;
        tracing::info!("Connected to SocketCAN interface {}", ifname);
        Ok(SocketCan { socket })
    }
}

fn id_to_socketcan(id: Id) -> socketcan::Id {
    match id {
        Id::Standard(id) => socketcan::Id::Standard(
            StandardId::new(id.as_raw()).expect("standard id fits 11 bits"),
        ),
        Id::Extended(id) => socketcan::Id::Extended(
            ExtendedId::new(id.as_raw()).expect("extended id fits 29 bits"),
        ),
    }
}

fn id_from_socketcan(id: socketcan::Id) -> Id {
    match id {
        socketcan::Id::Standard(id) => {
            Id::Standard(crate::can::StandardId::new(id.as_raw()).expect("fits 11 bits"))
        }
        socketcan::Id::Extended(id) => {
            Id::Extended(crate::can::ExtendedId::new(id.as_raw()).expect("fits 29 bits"))
        }
    }
}

impl CanAdapter for SocketCan {
    fn send(&mut self, frames: &[Frame]) -> crate::Result<()> {
        for frame in frames {
            let can_frame = CanFrame::new(id_to_socketcan(frame.id), &frame.data)
                .ok_or(Error::MalformedFrame)?;
            self.socket.write_frame(&can_frame)?;
        }
        Ok(())
    }

    fn recv(&mut self) -> crate::Result<Vec<Frame>> {
        let mut frames = vec![];
        loop {
            match self.socket.read_frame() {
                Ok(CanFrame::Data(frame)) => {
                    frames.push(Frame::new(0, id_from_socketcan(frame.id()), frame.data())?);
                }
                Ok(CanFrame::Remote(_)) | Ok(CanFrame::Error(_)) => continue,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(frames)
    }
}
