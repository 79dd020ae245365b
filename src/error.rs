//! Error type shared by the codec, the client and the daemon

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Local filesystem or socket failure
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the connection in the middle of a frame or exchange
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("corrupt compressed stream: {0}")]
    CorruptStream(String),

    /// Connection closed before the terminator frame of an UPDATE
    #[error("connection closed before transfer terminator")]
    TruncatedTransfer,

    /// Server answered a request with rc = -1
    #[error("server rejected {op} {path}")]
    Rejected { op: &'static str, path: String },
}

impl SyncError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Map a socket error to `ConnectionClosed` when it means the peer went away.
    pub fn from_socket(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::WriteZero => Self::ConnectionClosed,
            _ => Self::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_errors_map_to_closed() {
        for kind in [
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
        ] {
            let e = SyncError::from_socket(io::Error::new(kind, "gone"));
            assert!(matches!(e, SyncError::ConnectionClosed));
        }
        let e = SyncError::from_socket(io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert!(matches!(e, SyncError::Io(_)));
    }
}
