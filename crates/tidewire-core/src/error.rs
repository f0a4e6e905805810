//! Error taxonomy for the runtime.
//!
//! Two layers of errors exist:
//! - [`NetworkError`]: the semantic, application-facing classification of a
//!   connection fault, carried inside error events.
//! - [`ErrorKind`]: the workspace error type returned by fallible operations
//!   (setup, sends, codec violations).

use std::{fmt, io};

/// Workspace-wide result alias.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Semantic classification of a connection fault.
///
/// Applications make decisions on these values, never on raw errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkError {
    /// The peer closed the connection (orderly close or broken pipe).
    PeerClosed,
    /// The connection was reset by the peer.
    ResetByPeer,
    /// An operation timed out.
    Timeout,
    /// The peer refused the connection.
    ConnectionRefused,
    /// The network or host is unreachable.
    NetworkUnreachable,
    /// The byte stream violated the framing protocol.
    ProtocolViolation,
    /// Any other system-level failure.
    SyscallFailure,
}

impl NetworkError {
    /// Maps a raw errno value to its semantic classification.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::ECONNRESET => NetworkError::ResetByPeer,
            libc::ETIMEDOUT => NetworkError::Timeout,
            libc::EPIPE => NetworkError::PeerClosed,
            libc::ECONNREFUSED => NetworkError::ConnectionRefused,
            libc::ENETUNREACH | libc::EHOSTUNREACH => NetworkError::NetworkUnreachable,
            _ => NetworkError::SyscallFailure,
        }
    }

    /// Maps an I/O error to its semantic classification.
    pub fn from_io(err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => Self::from_errno(errno),
            None => NetworkError::SyscallFailure,
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NetworkError::PeerClosed => "peer closed the connection",
            NetworkError::ResetByPeer => "connection reset by peer",
            NetworkError::Timeout => "operation timed out",
            NetworkError::ConnectionRefused => "connection refused",
            NetworkError::NetworkUnreachable => "network unreachable",
            NetworkError::ProtocolViolation => "protocol violation",
            NetworkError::SyscallFailure => "system call failure",
        };
        write!(f, "{}", text)
    }
}

/// The specific way a byte stream violated the framing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolationKind {
    /// Frame header magic bytes did not match.
    BadMagic,
    /// Frame header carried an unsupported protocol version.
    UnsupportedVersion,
    /// Frame header carried an unknown frame type.
    UnknownFrameType,
    /// Declared payload length exceeds the frame payload cap.
    PayloadTooLarge,
    /// A message slice index was outside its declared slice count.
    BadSliceIndex,
    /// A message does not fit the 16-bit slice count.
    MessageTooLarge,
    /// A stream chunk exceeds the frame payload cap.
    ChunkTooLarge,
    /// A payload was too short for its declared sub-header.
    TruncatedPayload,
}

impl fmt::Display for ProtocolViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProtocolViolationKind::BadMagic => "bad magic",
            ProtocolViolationKind::UnsupportedVersion => "unsupported version",
            ProtocolViolationKind::UnknownFrameType => "unknown frame type",
            ProtocolViolationKind::PayloadTooLarge => "payload too large",
            ProtocolViolationKind::BadSliceIndex => "bad slice index",
            ProtocolViolationKind::MessageTooLarge => "message too large",
            ProtocolViolationKind::ChunkTooLarge => "stream chunk too large",
            ProtocolViolationKind::TruncatedPayload => "truncated payload",
        };
        write!(f, "{}", text)
    }
}

/// Errors returned by fallible runtime operations.
#[derive(Debug)]
pub enum ErrorKind {
    /// An underlying I/O operation failed.
    Io(io::Error),
    /// The byte stream violated the framing protocol.
    Protocol(ProtocolViolationKind),
    /// The connection is closed or closing; no further sends are accepted.
    ConnectionClosed,
    /// No live connection carries this identifier.
    UnknownConnection(u64),
    /// The given host string is not a valid numeric address.
    InvalidAddress(String),
    /// A Unix-domain socket path exceeds the platform limit.
    PathTooLong(String),
    /// The connection's send buffer is at maximum capacity.
    SendBufferFull,
    /// The reactor's action mailbox is full.
    MailboxFull,
    /// A bounded wait elapsed before the operation completed.
    Timeout,
    /// The component has not been started or has already stopped.
    NotRunning,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Io(err) => write!(f, "i/o error: {}", err),
            ErrorKind::Protocol(kind) => write!(f, "protocol violation: {}", kind),
            ErrorKind::ConnectionClosed => write!(f, "connection closed"),
            ErrorKind::UnknownConnection(id) => write!(f, "unknown connection {}", id),
            ErrorKind::InvalidAddress(host) => write!(f, "invalid address: {}", host),
            ErrorKind::PathTooLong(path) => write!(f, "socket path too long: {}", path),
            ErrorKind::SendBufferFull => write!(f, "send buffer full"),
            ErrorKind::MailboxFull => write!(f, "reactor mailbox full"),
            ErrorKind::Timeout => write!(f, "operation timed out"),
            ErrorKind::NotRunning => write!(f, "component not running"),
        }
    }
}

impl std::error::Error for ErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ErrorKind::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_covers_documented_cases() {
        assert_eq!(NetworkError::from_errno(libc::ECONNRESET), NetworkError::ResetByPeer);
        assert_eq!(NetworkError::from_errno(libc::ETIMEDOUT), NetworkError::Timeout);
        assert_eq!(NetworkError::from_errno(libc::EPIPE), NetworkError::PeerClosed);
        assert_eq!(NetworkError::from_errno(libc::ECONNREFUSED), NetworkError::ConnectionRefused);
        assert_eq!(NetworkError::from_errno(libc::ENETUNREACH), NetworkError::NetworkUnreachable);
        assert_eq!(NetworkError::from_errno(libc::EHOSTUNREACH), NetworkError::NetworkUnreachable);
        assert_eq!(NetworkError::from_errno(libc::EBADF), NetworkError::SyscallFailure);
    }

    #[test]
    fn io_error_mapping_uses_raw_os_error() {
        let err = io::Error::from_raw_os_error(libc::ECONNRESET);
        assert_eq!(NetworkError::from_io(&err), NetworkError::ResetByPeer);

        let synthetic = io::Error::new(io::ErrorKind::Other, "no errno");
        assert_eq!(NetworkError::from_io(&synthetic), NetworkError::SyscallFailure);
    }

    #[test]
    fn error_kind_displays_context() {
        let err = ErrorKind::UnknownConnection(42);
        assert_eq!(err.to_string(), "unknown connection 42");
        let err = ErrorKind::Protocol(ProtocolViolationKind::BadMagic);
        assert_eq!(err.to_string(), "protocol violation: bad magic");
    }
}
