//! Errors the client library can report. None of these ever propagate a
//! `retry` verdict to a caller — that value is handled internally by
//! [`crate::Connection::check`].

/// Failure modes visible to a caller of this crate.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not resolve {host}:{port} to a socket address")]
    Resolve { host: String, port: u16 },

    #[error("resolution of {host}:{port} returned no addresses")]
    NoAddress { host: String, port: u16 },

    #[error("failed to connect to the pulsecheckd IPC socket: {0}")]
    Connect(#[source] std::io::Error),

    #[error("I/O error talking to pulsecheckd: {0}")]
    Io(#[source] std::io::Error),

    #[error("pulsecheckd sent a verdict this client library does not recognize")]
    UnknownVerdict,
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e)
    }
}
