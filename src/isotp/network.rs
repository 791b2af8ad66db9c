//! The demultiplexer: owns the shared CAN transport and spawns one task per
//! connection, each driving its own [`Engine`] against a filtered inbound frame
//! stream, handler commands, and an STmin timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::can::{id_from_u32, AsyncCanAdapter, Frame};
use crate::isotp::codec;
use crate::isotp::config::ConnectionConfig;
use crate::isotp::constants::MAX_FUNCTIONAL_LEN;
use crate::isotp::engine::{Action, Engine};
use crate::isotp::error::IsoTpError;
use crate::isotp::handler::{ConnectionHandle, ConnectionHandler, EngineCommand};

/// Bus index used when the caller doesn't care about multi-bus adapters.
const DEFAULT_BUS: u8 = 0;

/// Owns the shared CAN transport and creates ISO-TP connections over it.
///
/// Mirrors `asyncio`'s `loop.create_connection`: hand it a handler and a pair of
/// CAN IDs, get back a [`ConnectionHandle`] plus a spawned task that drives the
/// protocol for as long as the connection lives.
pub struct IsoTpNetwork {
    can: Arc<AsyncCanAdapter>,
    bus: u8,
}

impl IsoTpNetwork {
    pub fn new(can: AsyncCanAdapter) -> Self {
        Self {
            can: Arc::new(can),
            bus: DEFAULT_BUS,
        }
    }

    /// Select which bus index connections created from here are addressed on, for
    /// adapters that multiplex several physical CAN busses.
    pub fn with_bus(mut self, bus: u8) -> Self {
        self.bus = bus;
        self
    }

    /// Open one ISO-TP connection and spawn the task that drives it. The handler's
    /// `connection_made` is invoked synchronously, before this returns, so the
    /// handler can stash the handle before the task's first frame arrives.
    pub fn open_connection(
        &self,
        config: ConnectionConfig,
        mut handler: Box<dyn ConnectionHandler>,
    ) -> ConnectionHandle {
        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            commands: command_sender,
        };

        handler.connection_made(handle.clone());

        let can = self.can.clone();
        let bus = self.bus;
        tokio::spawn(async move {
            run_connection(can, bus, config, handler, command_receiver).await;
        });

        handle
    }

    /// Send a single unsegmented payload to `txid` without creating a connection:
    /// no flow control is performed or expected, so `payload` must fit a Single
    /// Frame. Used for functional (broadcast) addressing, per ISO 15765-2 section
    /// 6.2, which forbids segmented functional sends.
    pub async fn send_raw(&self, txid: u32, payload: &[u8]) -> crate::Result<()> {
        if payload.len() > MAX_FUNCTIONAL_LEN {
            return Err(IsoTpError::FunctionalTooLong(payload.len()).into());
        }
        let data = codec::encode_single_frame(payload);
        let frame = Frame::new(self.bus, id_from_u32(txid), &data)?;
        self.can.send(&frame).await;
        Ok(())
    }

    /// The shared CAN transport, for callers that also want to talk to adapters or
    /// other protocols on the same bus.
    pub fn transport(&self) -> &AsyncCanAdapter {
        &self.can
    }
}

async fn run_connection(
    can: Arc<AsyncCanAdapter>,
    bus: u8,
    config: ConnectionConfig,
    mut handler: Box<dyn ConnectionHandler>,
    mut commands: mpsc::UnboundedReceiver<EngineCommand>,
) {
    let rxid = config.rxid;
    let txid = config.txid;
    let mut engine = Engine::new(config);

    let mut inbound = can.recv_filter(move |frame: &Frame| frame.bus == bus && frame.id == rxid);
    let mut bus_errors = can.errors();

    // Armed only while a Consecutive Frame burst is mid-block; idle otherwise.
    // `tokio::select!` still polls this branch every iteration, gated by `armed`,
    // which is the standard way to model an optional timer without reallocating it.
    let st_min_timer = tokio::time::sleep(Duration::from_secs(3600));
    tokio::pin!(st_min_timer);
    let mut armed = false;

    // Once a channel closes it would otherwise resolve `None` immediately on every
    // poll, busy-spinning this loop; these latch it out of further selection.
    let mut commands_open = true;
    let mut bus_errors_open = true;

    'drive: loop {
        let actions = tokio::select! {
            biased;

            // A dropped `ConnectionHandle` or a failed transport both mean the
            // connection can no longer be driven; treat either as a close request
            // so the send queue still gets a chance to drain before tearing down.
            err = bus_errors.next(), if bus_errors_open => match err {
                Some(err) => engine.bus_error((*err).clone()),
                None => { bus_errors_open = false; engine.close() }
            },

            cmd = commands.recv(), if commands_open => match cmd {
                Some(EngineCommand::Write(payload)) => engine.write(payload),
                Some(EngineCommand::Close) => engine.close(),
                None => { commands_open = false; engine.close() }
            },

            Some(frame) = inbound.next() => engine.feed_data(&frame.data),

            () = &mut st_min_timer, if armed => {
                armed = false;
                engine.cf_tick()
            },
        };

        for action in actions {
            match action {
                Action::SendRaw(data) => match Frame::new(bus, txid, &data) {
                    Ok(frame) => can.send(&frame).await,
                    Err(err) => warn!("dropping unsendable ISO-TP PDU: {err}"),
                },
                Action::Deliver(payload) => handler.data_received(payload),
                Action::PauseWriting => handler.pause_writing(),
                Action::ResumeWriting => handler.resume_writing(),
                Action::ArmStMin(duration) => {
                    st_min_timer
                        .as_mut()
                        .reset(tokio::time::Instant::now() + duration);
                    armed = true;
                }
                Action::ConnectionLost(err) => {
                    handler.connection_lost(err);
                    break 'drive;
                }
            }
        }
    }
}
