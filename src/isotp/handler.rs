//! The upstream-facing capability set: the callbacks an ISO-TP connection drives,
//! modelled after `asyncio.Protocol`/`asyncio.Transport`.

use tokio::sync::mpsc;

use crate::error::Error;

pub(crate) enum EngineCommand {
    Write(Vec<u8>),
    Close,
}

/// A handle to a connection's engine, given to a [`ConnectionHandler`] in
/// [`ConnectionHandler::connection_made`]. Lets the handler write payloads and
/// close the connection without owning the engine itself.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub(crate) commands: mpsc::UnboundedSender<EngineCommand>,
}

impl ConnectionHandle {
    /// Queue a whole payload for transmission. Non-blocking: backpressure is
    /// signalled separately via [`ConnectionHandler::pause_writing`].
    pub fn write(&self, payload: impl Into<Vec<u8>>) {
        let _ = self.commands.send(EngineCommand::Write(payload.into()));
    }

    /// Request the connection close. Any in-flight send is allowed to drain first;
    /// [`ConnectionHandler::connection_lost`] fires exactly once when it does.
    pub fn close(&self) {
        let _ = self.commands.send(EngineCommand::Close);
    }
}

/// The capability set an ISO-TP connection drives. All methods have a no-op default,
/// mirroring `asyncio.Protocol`: implement only the ones relevant to your handler.
pub trait ConnectionHandler: Send {
    /// Called once, immediately after the connection is created.
    fn connection_made(&mut self, _handle: ConnectionHandle) {}

    /// Called with each whole payload the peer sent, in the order it sent them.
    fn data_received(&mut self, _payload: Vec<u8>) {}

    /// Called when a send queue transitions from empty to non-empty: the caller
    /// should hold off on producing more payloads until [`resume_writing`] fires.
    ///
    /// [`resume_writing`]: ConnectionHandler::resume_writing
    fn pause_writing(&mut self) {}

    /// Called when the send queue has fully drained.
    fn resume_writing(&mut self) {}

    /// Called exactly once when the connection is torn down, either because the
    /// owner closed it (`None`) or because of a fatal protocol or bus error.
    fn connection_lost(&mut self, _error: Option<Error>) {}
}

/// A factory that produces a fresh [`ConnectionHandler`] for each new connection,
/// analogous to `asyncio`'s `protocol_factory` callables.
pub trait HandlerFactory: FnMut() -> Box<dyn ConnectionHandler> + Send {}
impl<T: FnMut() -> Box<dyn ConnectionHandler> + Send> HandlerFactory for T {}
