//! Contains the main error type for the library.

use thiserror::Error;

/// The main error type for the library. Each module has its own error type that is
/// contained by this error.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Not Found")]
    NotFound,
    #[error("Not Supported")]
    NotSupported,
    #[error("Malformed Frame")]
    MalformedFrame,
    #[error("Timeout")]
    Timeout,
    #[error("Disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(std::sync::Arc<std::io::Error>),

    #[error(transparent)]
    IsoTp(#[from] crate::isotp::IsoTpError),
}

impl From<std::io::Error> for Error {
    fn from(val: std::io::Error) -> Self {
        Self::Io(std::sync::Arc::new(val))
    }
}

impl From<tokio_stream::Elapsed> for Error {
    fn from(_: tokio_stream::Elapsed) -> Error {
        Error::Timeout
    }
}
