//! Alternate framing adapter for a remote `isotpserver`: when the "bus" is a TCP
//! link to a server that already speaks ISO-TP itself, the engine and CAN
//! demultiplexer are bypassed entirely in favor of an ASCII `<hex>` framer
//! talking directly to the socket. Exposes the same [`ConnectionHandler`]
//! surface as [`super::network`] so callers can swap backends without changing
//! their handler.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::warn;

use super::handler::{ConnectionHandle, ConnectionHandler, EngineCommand};

const READ_CHUNK_SIZE: usize = 4096;

/// Connect to a remote isotpserver at `addr` and spawn the task that drives the
/// `<hex>` framing in both directions.
pub async fn connect(
    addr: impl ToSocketAddrs,
    mut handler: Box<dyn ConnectionHandler>,
) -> crate::Result<ConnectionHandle> {
    let stream = TcpStream::connect(addr).await?;
    let (command_sender, command_receiver) = mpsc::unbounded_channel();
    let handle = ConnectionHandle {
        commands: command_sender,
    };

    handler.connection_made(handle.clone());

    tokio::spawn(async move {
        run(stream, handler, command_receiver).await;
    });

    Ok(handle)
}

/// Encode one payload as an isotpserver wire frame: `<` + lowercase hex + `>`.
fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() * 2 + 2);
    frame.push(b'<');
    frame.extend(hex::encode(payload).into_bytes());
    frame.push(b'>');
    frame
}

/// Scan `buffer` for complete `<hex>` frames, delivering each decoded payload to
/// `handler` and discarding everything outside angle brackets. Leaves a trailing
/// incomplete frame (an unmatched `<...`) in `buffer` for the next read to complete.
fn deliver_frames(buffer: &mut Vec<u8>, handler: &mut dyn ConnectionHandler) {
    loop {
        let Some(start) = buffer.iter().position(|&b| b == b'<') else {
            buffer.clear();
            return;
        };

        let Some(end_rel) = buffer[start + 1..].iter().position(|&b| b == b'>') else {
            buffer.drain(..start);
            return;
        };
        let end = start + 1 + end_rel;

        match hex::decode(&buffer[start + 1..end]) {
            Ok(payload) => handler.data_received(payload),
            Err(err) => warn!("dropping malformed isotpserver frame: {err}"),
        }
        buffer.drain(..=end);
    }
}

async fn run(
    stream: TcpStream,
    mut handler: Box<dyn ConnectionHandler>,
    mut commands: mpsc::UnboundedReceiver<EngineCommand>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut inbound = Vec::new();
    let mut read_buf = [0u8; READ_CHUNK_SIZE];

    loop {
        tokio::select! {
            biased;

            cmd = commands.recv() => match cmd {
                Some(EngineCommand::Write(payload)) => {
                    if let Err(err) = write_half.write_all(&encode_frame(&payload)).await {
                        handler.connection_lost(Some(err.into()));
                        break;
                    }
                }
                Some(EngineCommand::Close) | None => {
                    handler.connection_lost(None);
                    break;
                }
            },

            result = read_half.read(&mut read_buf) => match result {
                Ok(0) => {
                    handler.connection_lost(None);
                    break;
                }
                Ok(n) => {
                    inbound.extend_from_slice(&read_buf[..n]);
                    deliver_frames(&mut inbound, handler.as_mut());
                }
                Err(err) => {
                    handler.connection_lost(Some(err.into()));
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingHandler {
        payloads: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl ConnectionHandler for RecordingHandler {
        fn data_received(&mut self, payload: Vec<u8>) {
            self.payloads.lock().unwrap().push(payload);
        }
    }

    #[test]
    fn encodes_payload_as_angle_bracket_hex() {
        assert_eq!(encode_frame(&[0xFF, 0xFF]), b"<ffff>".to_vec());
    }

    #[test]
    fn extracts_frame_and_discards_surrounding_noise() {
        let mut handler = RecordingHandler::default();
        let payloads = handler.payloads.clone();
        let mut buffer = b"noise<abcd>more".to_vec();

        deliver_frames(&mut buffer, &mut handler);

        assert_eq!(*payloads.lock().unwrap(), vec![vec![0xab, 0xcd]]);
    }

    #[test]
    fn holds_incomplete_trailing_frame_for_next_read() {
        let mut handler = RecordingHandler::default();
        let payloads = handler.payloads.clone();
        let mut buffer = b"junk<dead".to_vec();

        deliver_frames(&mut buffer, &mut handler);
        assert!(payloads.lock().unwrap().is_empty());
        assert_eq!(buffer, b"<dead".to_vec());

        buffer.extend_from_slice(b"beef>");
        deliver_frames(&mut buffer, &mut handler);
        assert_eq!(*payloads.lock().unwrap(), vec![vec![0xde, 0xad, 0xbe, 0xef]]);
    }
}
