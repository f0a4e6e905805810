//! Network events and connection metadata.
//!
//! [`NetworkEvent`] is the single type crossing the reactor/worker boundary.
//! It carries only values (connection id, bytes, enums) and never a file
//! descriptor or a reference into reactor state, so it is safe to move
//! between threads and to queue.

use std::{fmt, net::SocketAddr};

use crate::error::NetworkError;

/// Peer address of a connection: either an internet endpoint or a
/// Unix-domain path (unnamed for unbound peers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    /// IPv4 or IPv6 endpoint.
    Inet(SocketAddr),
    /// Unix-domain socket; `None` for unnamed (client-side) sockets.
    Unix(Option<String>),
}

impl PeerAddr {
    /// Returns the textual form of the peer address, without a port.
    pub fn address_text(&self) -> String {
        match self {
            PeerAddr::Inet(addr) => addr.ip().to_string(),
            PeerAddr::Unix(Some(path)) => path.clone(),
            PeerAddr::Unix(None) => String::from("(unnamed)"),
        }
    }

    /// Returns the peer port, or 0 for Unix-domain sockets.
    pub fn port(&self) -> u16 {
        match self {
            PeerAddr::Inet(addr) => addr.port(),
            PeerAddr::Unix(_) => 0,
        }
    }

    /// Returns true for Unix-domain peers.
    pub fn is_unix(&self) -> bool {
        matches!(self, PeerAddr::Unix(_))
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Inet(addr) => write!(f, "{}", addr),
            PeerAddr::Unix(Some(path)) => write!(f, "unix:{}", path),
            PeerAddr::Unix(None) => write!(f, "unix:(unnamed)"),
        }
    }
}

/// Read-only projection of a connection, safe to copy, log and persist.
///
/// Carries no file descriptor; business layers identify connections solely
/// by the 64-bit connection id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// The connection's process-unique identifier.
    pub connection_id: u64,
    /// Textual peer address (IP address or Unix path).
    pub peer_address: String,
    /// Peer port; 0 for Unix-domain connections.
    pub peer_port: u16,
    /// Whether the connection is a Unix-domain socket.
    pub is_unix_domain: bool,
}

impl ConnectionInfo {
    /// Builds the projection for a connection and its peer address.
    pub fn new(connection_id: u64, peer: &PeerAddr) -> Self {
        Self {
            connection_id,
            peer_address: peer.address_text(),
            peer_port: peer.port(),
            is_unix_domain: peer.is_unix(),
        }
    }
}

/// Events emitted by a reactor and observed by the application on a worker
/// thread.
///
/// For a given connection, events are observed in the order the reactor
/// emitted them: `Connected` strictly precedes any `Data`, and exactly one
/// of `Disconnected`/`Error` is terminal. Across connections no ordering is
/// guaranteed.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// A connection was accepted or an outbound connect completed.
    Connected {
        /// The new connection's identifier.
        connection_id: u64,
        /// Peer metadata for the new connection.
        info: ConnectionInfo,
    },
    /// Bytes arrived on a connection.
    Data {
        /// The connection the bytes arrived on.
        connection_id: u64,
        /// The received bytes.
        payload: Vec<u8>,
    },
    /// The peer closed the connection in an orderly fashion, or the
    /// connection was closed locally.
    Disconnected {
        /// The connection that closed.
        connection_id: u64,
    },
    /// The connection failed; this event is terminal.
    Error {
        /// The connection that failed.
        connection_id: u64,
        /// Semantic classification of the fault.
        error: NetworkError,
        /// Advisory diagnostic text (system error message).
        detail: String,
    },
    /// The connection left its congested state: its send buffer dropped
    /// below the low watermark and accepts writes freely again.
    Writable {
        /// The connection that became writable.
        connection_id: u64,
    },
}

impl NetworkEvent {
    /// Returns the connection this event belongs to; used to route the
    /// event to its worker shard.
    pub fn connection_id(&self) -> u64 {
        match self {
            NetworkEvent::Connected { connection_id, .. }
            | NetworkEvent::Data { connection_id, .. }
            | NetworkEvent::Disconnected { connection_id }
            | NetworkEvent::Error { connection_id, .. }
            | NetworkEvent::Writable { connection_id } => *connection_id,
        }
    }

    /// Returns true for `Connected`, `Disconnected` and `Error` events,
    /// whose delivery the reactor must not silently drop.
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, NetworkEvent::Data { .. } | NetworkEvent::Writable { .. })
    }
}
