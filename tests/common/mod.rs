//! A virtual CAN bus for integration tests: two `CanAdapter` endpoints wired
//! directly to each other, each echoing its own sends back as loopback frames the
//! way real hardware confirms transmission.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use isotp::can::{CanAdapter, Frame};

pub struct VirtualWire {
    own: Arc<Mutex<VecDeque<Frame>>>,
    peer: Arc<Mutex<VecDeque<Frame>>>,
}

/// Build a pair of wires representing opposite ends of the same bus: anything
/// sent on one is delivered to the other, and also echoed back to the sender
/// with `loopback` set.
pub fn virtual_bus_pair() -> (VirtualWire, VirtualWire) {
    let a = Arc::new(Mutex::new(VecDeque::new()));
    let b = Arc::new(Mutex::new(VecDeque::new()));
    (
        VirtualWire {
            own: a.clone(),
            peer: b.clone(),
        },
        VirtualWire { own: b, peer: a },
    )
}

impl CanAdapter for VirtualWire {
    fn send(&mut self, frames: &[Frame]) -> isotp::Result<()> {
        for frame in frames {
            let mut loopback = frame.clone();
            loopback.loopback = true;
            self.own.lock().unwrap().push_back(loopback);
            self.peer.lock().unwrap().push_back(frame.clone());
        }
        Ok(())
    }

    fn recv(&mut self) -> isotp::Result<Vec<Frame>> {
        Ok(self.own.lock().unwrap().drain(..).collect())
    }
}
