//! A blocking façade over the engine, for callers not themselves running inside a
//! tokio runtime. Mirrors [`crate::can::async_can`]'s dedicated-thread pattern: a
//! background thread owns the async side and bridges it onto a bounded
//! thread-safe queue the caller polls with blocking `recv(timeout)`.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;

use super::handler::ConnectionHandle;
use super::stream::Reader;
use crate::error::Error;

const QUEUE_CAPACITY: usize = 64;

/// A synchronous handle to one ISO-TP connection. Writing and closing go straight
/// through to the engine — [`ConnectionHandle`] is already thread-safe and
/// non-blocking — only receiving needs the background pump, since it must bridge
/// an async stream onto a call a blocking thread can wait on.
pub struct SyncConnection {
    handle: ConnectionHandle,
    payloads: std_mpsc::Receiver<Vec<u8>>,
    last_error: Arc<Mutex<Option<Error>>>,
    pump: Option<std::thread::JoinHandle<()>>,
}

impl SyncConnection {
    /// Spawn the background thread that drives `reader` against `rt` and bridges
    /// its payloads onto a blocking queue.
    pub fn new(rt: Handle, mut reader: Reader, handle: ConnectionHandle) -> Self {
        let (tx, rx) = std_mpsc::sync_channel(QUEUE_CAPACITY);
        let last_error = Arc::new(Mutex::new(None));
        let last_error_pump = last_error.clone();

        let pump = std::thread::spawn(move || {
            rt.block_on(async move {
                while let Some(payload) = reader.recv().await {
                    if tx.send(payload).is_err() {
                        break;
                    }
                }
                *last_error_pump.lock().unwrap() = reader.closed_error();
            });
        });

        Self {
            handle,
            payloads: rx,
            last_error,
            pump: Some(pump),
        }
    }

    /// Queue a payload for transmission. Non-blocking.
    pub fn send(&self, payload: impl Into<Vec<u8>>) {
        self.handle.write(payload);
    }

    /// Request the connection close, letting any in-flight send drain first.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Block for up to `timeout` for the next whole payload.
    ///
    /// `Ok(None)` means the connection closed cleanly with nothing left to
    /// deliver; `Err(Error::Timeout)` means nothing arrived in time; any other
    /// `Err` is the reason the connection was lost.
    pub fn recv(&self, timeout: Duration) -> crate::Result<Option<Vec<u8>>> {
        match self.payloads.recv_timeout(timeout) {
            Ok(payload) => Ok(Some(payload)),
            Err(std_mpsc::RecvTimeoutError::Timeout) => Err(Error::Timeout),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                match self.last_error.lock().unwrap().clone() {
                    Some(err) => Err(err),
                    None => Ok(None),
                }
            }
        }
    }
}

impl Drop for SyncConnection {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isotp::handler::EngineCommand;
    use tokio::sync::mpsc;

    #[test]
    fn recv_times_out_with_no_payloads() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (_handler, reader, _writer) = super::super::stream::pair();
        let (commands, _rx) = mpsc::unbounded_channel::<EngineCommand>();
        let handle = ConnectionHandle { commands };

        let conn = SyncConnection::new(rt.handle().clone(), reader, handle);
        let result = conn.recv(Duration::from_millis(20));
        assert!(matches!(result, Err(Error::Timeout)));
    }
}
