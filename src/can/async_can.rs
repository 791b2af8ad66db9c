//! Async wrapper for adapters implementing the [`CanAdapter`] trait.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::can::CanAdapter;
use crate::can::Frame;
use crate::can::Id;
use crate::error::Error;
use crate::Stream;
use async_stream::stream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

const CAN_TX_BUFFER_SIZE: usize = 128;
const CAN_RX_BUFFER_SIZE: usize = 1024;
const CAN_ERROR_BUFFER_SIZE: usize = 16;

type BusIdentifier = (u8, Id);
type FrameCallback = (Frame, oneshot::Sender<()>);

fn process<T: CanAdapter>(
    mut adapter: T,
    mut shutdown_receiver: oneshot::Receiver<()>,
    rx_sender: broadcast::Sender<Frame>,
    error_sender: broadcast::Sender<Arc<Error>>,
    mut tx_receiver: mpsc::Receiver<(Frame, oneshot::Sender<()>)>,
) {
    let mut buffer: Vec<Frame> = Vec::new();
    let mut callbacks: HashMap<BusIdentifier, VecDeque<FrameCallback>> = HashMap::new();

    while shutdown_receiver.try_recv().is_err() {
        let frames = match adapter.recv() {
            Ok(frames) => frames,
            Err(err) => {
                debug!("CAN adapter recv error: {}", err);
                let _ = error_sender.send(Arc::new(err));
                break;
            }
        };

        for frame in frames {
            // Wake up sender awaiting loopback confirmation of this frame.
            if frame.loopback {
                let callback = callbacks
                    .entry((frame.bus, frame.id))
                    .or_default()
                    .pop_front();

                match callback {
                    Some((tx_frame, callback)) => {
                        // If this assertion fails, the adapter implementation sent
                        // or received frames out of order relative to its callers.
                        assert_eq!(tx_frame, frame);
                        let _ = callback.send(());
                    }
                    None => panic!("Received loopback frame with no pending callback"),
                };
            }

            let _ = rx_sender.send(frame);
        }

        buffer.clear();
        while let Ok((frame, callback)) = tx_receiver.try_recv() {
            let mut loopback_frame = frame.clone();
            loopback_frame.loopback = true;

            callbacks
                .entry((frame.bus, frame.id))
                .or_default()
                .push_back((loopback_frame, callback));

            buffer.push(frame);
        }
        if !buffer.is_empty() {
            if let Err(err) = adapter.send(&buffer) {
                debug!("CAN adapter send error: {}", err);
                let _ = error_sender.send(Arc::new(err));
                break;
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
}

/// Async wrapper around a [`CanAdapter`]. Starts a background thread to handle sending
/// and receiving frames. Uses tokio channels to communicate with the background thread.
///
/// This is the demultiplexer's transport: multiple consumers can subscribe to the
/// same inbound stream via [`recv_filter`](Self::recv_filter), each seeing only the
/// frames relevant to them, and bus-level errors are broadcast to every subscriber.
pub struct AsyncCanAdapter {
    processing_handle: Option<std::thread::JoinHandle<()>>,
    recv_receiver: broadcast::Receiver<Frame>,
    error_receiver: broadcast::Receiver<Arc<Error>>,
    send_sender: mpsc::Sender<(Frame, oneshot::Sender<()>)>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl AsyncCanAdapter {
    pub fn new<T: CanAdapter + Send + Sync + 'static>(adapter: T) -> Self {
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let (send_sender, send_receiver) = mpsc::channel(CAN_TX_BUFFER_SIZE);
        let (recv_sender, recv_receiver) = broadcast::channel(CAN_RX_BUFFER_SIZE);
        let (error_sender, error_receiver) = broadcast::channel(CAN_ERROR_BUFFER_SIZE);

        let mut ret = AsyncCanAdapter {
            shutdown: Some(shutdown_sender),
            processing_handle: None,
            recv_receiver,
            error_receiver,
            send_sender,
        };

        ret.processing_handle = Some(std::thread::spawn(move || {
            process(
                adapter,
                shutdown_receiver,
                recv_sender,
                error_sender,
                send_receiver,
            );
        }));

        ret
    }

    /// Send a single frame. The Future resolves once the frame has been handed over to
    /// the adapter for sending. This does not mean the message is on the wire yet, as
    /// this could be pending arbitration.
    pub async fn send(&self, frame: &Frame) {
        let (callback_sender, callback_receiver) = oneshot::channel();
        if self
            .send_sender
            .send((frame.clone(), callback_sender))
            .await
            .is_err()
        {
            return;
        }

        let _ = callback_receiver.await;
    }

    /// Receive all frames.
    pub fn recv(&self) -> impl Stream<Item = Frame> {
        self.recv_filter(|_| true)
    }

    /// Receive frames that match a filter. Useful for routing inbound traffic to the
    /// connection whose `rxid` the frame carries.
    pub fn recv_filter(&self, filter: impl Fn(&Frame) -> bool) -> impl Stream<Item = Frame> {
        let mut rx = self.recv_receiver.resubscribe();

        Box::pin(stream! {
            loop { match rx.recv().await {
                    Ok(frame) => {
                        if filter(&frame) {
                            yield frame
                        } else {
                            continue
                        }
                    }
                    Err(_) => continue,
                }
            }
        })
    }

    /// Stream of bus-level errors. Every subscriber sees every error; a bus failure is
    /// global to all connections sharing it.
    pub fn errors(&self) -> impl Stream<Item = Arc<Error>> {
        let mut rx = self.error_receiver.resubscribe();

        Box::pin(stream! {
            loop { match rx.recv().await {
                    Ok(err) => yield err,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        })
    }
}

impl Drop for AsyncCanAdapter {
    fn drop(&mut self) {
        if let Some(handle) = self.processing_handle.take() {
            if let Some(shutdown) = self.shutdown.take() {
                let _ = shutdown.send(());
            }
            let _ = handle.join();
        }
    }
}
