use std::io;

use thiserror::Error;

/// Coarse classification the dispatcher and the pool branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// End of stream. Terminal for the connection, not worth an error log.
    PeerClosed,
    /// Deadline exceeded. The connection is still structurally sound.
    Timeout,
    /// Undecodable payload. The connection must not be reused.
    Protocol,
    Other,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("deadline exceeded")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[source] io::Error),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PeerClosed => ErrorKind::PeerClosed,
            Self::Timeout => ErrorKind::Timeout,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Io(_) => ErrorKind::Other,
        }
    }

    /// Whether the connection may go back to a pool after this error.
    pub fn is_reusable(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::PeerClosed,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            io::ErrorKind::InvalidData => Self::Protocol(err.to_string()),
            _ => Self::Io(err),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified() {
        let closed: TransportError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert_eq!(closed.kind(), ErrorKind::PeerClosed);

        let eof: TransportError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert_eq!(eof.kind(), ErrorKind::PeerClosed);

        let slow: TransportError = io::Error::from(io::ErrorKind::TimedOut).into();
        assert_eq!(slow.kind(), ErrorKind::Timeout);
        assert!(slow.is_reusable());

        let other: TransportError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert_eq!(other.kind(), ErrorKind::Other);
        assert!(!other.is_reusable());
    }
}
