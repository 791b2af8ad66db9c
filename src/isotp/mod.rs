//! ISO 15765-2 (ISO-TP) transport over CAN.
//!
//! This module multiplexes many logical connections, each identified by a
//! `(rxid, txid)` pair, over one CAN bus handle. The protocol engine
//! ([`engine::Engine`]) is a pair of synchronous state machines; [`network`] drives
//! one per connection against the shared [`crate::can::AsyncCanAdapter`]; [`stream`]
//! and [`sync`] offer buffered async and blocking façades on top of the callback
//! interface in [`handler`].
//!
//! ```no_run
//! # #[cfg(all(target_os = "linux", feature = "socketcan"))]
//! # fn doc() -> isotp::Result<()> {
//! use isotp::can::{AsyncCanAdapter, socketcan::SocketCan};
//! use isotp::isotp::{ConnectionConfig, ConnectionHandler, ConnectionHandle, IsoTpNetwork};
//!
//! struct EchoHandler;
//! impl ConnectionHandler for EchoHandler {
//!     fn data_received(&mut self, payload: Vec<u8>) {
//!         println!("received {} bytes", payload.len());
//!     }
//! }
//!
//! let can = AsyncCanAdapter::new(SocketCan::open("can0")?);
//! let network = IsoTpNetwork::new(can);
//! let config = ConnectionConfig::new(0x7e8, 0x7e0);
//! let handle = network.open_connection(config, Box::new(EchoHandler));
//! handle.write(vec![0x3e, 0x00]);
//! # Ok(())
//! # }
//! ```

mod codec;
mod config;
mod constants;
mod engine;
mod error;
mod handler;
pub mod isotpserver;
mod network;
pub mod stream;
pub mod sync;

pub use config::ConnectionConfig;
pub use error::IsoTpError;
pub use handler::{ConnectionHandle, ConnectionHandler, HandlerFactory};
pub use network::IsoTpNetwork;
