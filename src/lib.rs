//! # isotp
//! An async implementation of ISO 15765-2 (ISO-TP), the transport protocol that
//! segments and reassembles arbitrary-length payloads over a CAN bus whose native
//! frames carry at most 8 data bytes.
//!
//! The crate multiplexes many logical connections over a single CAN bus, each
//! identified by a `(rxid, txid)` pair, and exposes a streaming, byte-oriented
//! endpoint on top.
//!
//! ## Example
//!
//! ```no_run
//! use isotp::isotp::{stream, ConnectionConfig, IsoTpNetwork};
//!
//! # #[cfg(feature = "socketcan")]
//! # #[tokio::main]
//! # async fn main() -> isotp::Result<()> {
//! let can = isotp::can::socketcan::SocketCan::new_async("vcan0")?;
//! let network = IsoTpNetwork::new(can);
//!
//! let config = ConnectionConfig::new(0x7a1, 0x7a9);
//! let (handler, mut reader, mut writer) = stream::pair();
//! network.open_connection(config, handler);
//!
//! writer.write(vec![0x3e, 0x00]).await;
//! let response = reader.recv().await;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "socketcan"))]
//! # fn main() {}
//! ```
//!
//! ## Supported backends
//!  - SocketCAN (Linux only, raw CAN frames via the [`socketcan`] crate)
//!  - A remote `isotpserver` (see [`isotp::isotp::isotpserver`]), which speaks a
//!    text framing protocol over TCP instead of ISO-TP directly

pub mod can;
mod error;
pub mod isotp;

pub use error::Error;
pub use futures_core::Stream;
pub type Result<T> = std::result::Result<T, Error>;
