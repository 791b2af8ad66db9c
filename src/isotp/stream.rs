//! A buffering reader/writer pair built on [`ConnectionHandler`], for callers who
//! would rather `.await` a couple of async methods than implement the callback
//! trait themselves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch, Notify};

use super::handler::{ConnectionHandle, ConnectionHandler};
use crate::error::Error;

struct Shared {
    paused: AtomicBool,
    resumed: Notify,
}

/// The [`ConnectionHandler`] half of the pair. Hand this to
/// [`super::network::IsoTpNetwork::open_connection`]; the matching [`Reader`] and
/// [`Writer`] are returned alongside it by [`pair`].
struct StreamHandler {
    handle_tx: watch::Sender<Option<ConnectionHandle>>,
    payload_tx: mpsc::UnboundedSender<Vec<u8>>,
    shared: Arc<Shared>,
    last_error: Arc<Mutex<Option<Error>>>,
}

impl ConnectionHandler for StreamHandler {
    fn connection_made(&mut self, handle: ConnectionHandle) {
        let _ = self.handle_tx.send(Some(handle));
    }

    fn data_received(&mut self, payload: Vec<u8>) {
        let _ = self.payload_tx.send(payload);
    }

    fn pause_writing(&mut self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    fn resume_writing(&mut self) {
        self.shared.paused.store(false, Ordering::Release);
        self.shared.resumed.notify_waiters();
    }

    fn connection_lost(&mut self, error: Option<Error>) {
        *self.last_error.lock().unwrap() = error;
        // Dropping self (which happens right after this call returns, when the
        // driving task exits) closes payload_tx and handle_tx, which is what lets
        // Reader::recv return None and Writer's handle wait stop blocking forever.
    }
}

/// Build a fresh [`StreamHandler`]/[`Reader`]/[`Writer`] triple for one connection.
pub fn pair() -> (Box<dyn ConnectionHandler>, Reader, Writer) {
    let (handle_tx, handle_rx) = watch::channel(None);
    let (payload_tx, payload_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        paused: AtomicBool::new(false),
        resumed: Notify::new(),
    });
    let last_error = Arc::new(Mutex::new(None));

    let handler = StreamHandler {
        handle_tx,
        payload_tx,
        shared: shared.clone(),
        last_error: last_error.clone(),
    };

    let reader = Reader {
        payloads: payload_rx,
        last_error,
    };
    let writer = Writer { handle_rx, shared };

    (Box::new(handler), reader, writer)
}

/// The read side: yields each whole payload the peer sent, in order.
pub struct Reader {
    payloads: mpsc::UnboundedReceiver<Vec<u8>>,
    last_error: Arc<Mutex<Option<Error>>>,
}

impl Reader {
    /// Await the next whole payload. Returns `None` once the connection is lost and
    /// every already-buffered payload has been delivered.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.payloads.recv().await
    }

    /// The error the connection was lost to, if any, available once `recv` starts
    /// returning `None`. `None` here means the peer closed the connection cleanly.
    pub fn closed_error(&self) -> Option<Error> {
        self.last_error.lock().unwrap().clone()
    }
}

/// The write side: accepts whole payloads and honors the engine's backpressure
/// signal before accepting the next one.
pub struct Writer {
    handle_rx: watch::Receiver<Option<ConnectionHandle>>,
    shared: Arc<Shared>,
}

impl Writer {
    /// Queue a payload for transmission, waiting first if the engine has signalled
    /// backpressure (a send is already in flight).
    pub async fn write(&mut self, payload: impl Into<Vec<u8>>) {
        self.wait_while_paused().await;
        if let Some(handle) = self.handle().await {
            handle.write(payload);
        }
    }

    /// Request the connection close, letting any in-flight send drain first.
    pub async fn close(&mut self) {
        if let Some(handle) = self.handle().await {
            handle.close();
        }
    }

    async fn wait_while_paused(&self) {
        loop {
            let notified = self.shared.resumed.notified();
            tokio::pin!(notified);
            // Register as a waiter before checking the guard: `notify_waiters` only
            // wakes futures already polled at least once, so enabling first closes
            // the window where a `resume_writing` between the check and the await
            // would otherwise be missed.
            notified.as_mut().enable();
            if !self.shared.paused.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    async fn handle(&mut self) -> Option<ConnectionHandle> {
        loop {
            if let Some(handle) = self.handle_rx.borrow().clone() {
                return Some(handle);
            }
            if self.handle_rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reader_yields_payloads_in_order() {
        let (mut handler_box, mut reader, _writer) = {
            let (h, r, w) = pair();
            (h, r, w)
        };
        handler_box.data_received(b"first".to_vec());
        handler_box.data_received(b"second".to_vec());

        assert_eq!(reader.recv().await.unwrap(), b"first".to_vec());
        assert_eq!(reader.recv().await.unwrap(), b"second".to_vec());
    }

    #[tokio::test]
    async fn reader_ends_after_connection_lost() {
        let (mut handler_box, mut reader, _writer) = pair();
        handler_box.connection_lost(Some(Error::Timeout));
        drop(handler_box);

        assert!(reader.recv().await.is_none());
        assert!(matches!(reader.closed_error(), Some(Error::Timeout)));
    }
}
