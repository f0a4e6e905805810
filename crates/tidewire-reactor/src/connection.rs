//! Per-connection state, owned exclusively by the reactor thread.

use std::{collections::VecDeque, os::fd::RawFd};

use socket2::Socket;

use tidewire_core::event::PeerAddr;

use crate::{mailbox::SendCompletion, send_buffer::SendBuffer};

/// Lifecycle of a reactor-owned connection:
/// `New → Active ↔ Congested → Draining → Closed`.
///
/// A connection is `New` from registration until its `Connected` event is
/// emitted; for outbound sockets that covers the window in which connect
/// completion is still being confirmed. `Congested` is entered at the
/// send-buffer high watermark and left below the low watermark. `Draining`
/// means a close was requested while bytes were still buffered. `Closed`
/// is assigned as the connection leaves the reactor's map, just before its
/// socket drops; live lookups only ever observe the first four states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered; the `Connected` event has not been emitted yet.
    New,
    /// Established and flowing.
    Active,
    /// Send buffer at or above the high watermark.
    Congested,
    /// Close requested; flushing remaining bytes before the socket closes.
    Draining,
    /// Removed from the reactor; terminal.
    Closed,
}

impl ConnectionState {
    /// True for the states that accept new sends.
    pub fn accepts_sends(self) -> bool {
        matches!(self, ConnectionState::Active | ConnectionState::Congested)
    }
}

/// A send whose completion is reported once enough bytes have drained.
pub struct PendingCompletion {
    /// Fire when `bytes_flushed` reaches this value.
    pub target: u64,
    /// Length of the request's payload, reported to async callbacks.
    pub len: usize,
    /// The completion to fire.
    pub completion: SendCompletion,
}

/// All state for one connection. Never leaves the reactor thread; the rest
/// of the process refers to the connection only by its id.
pub struct ReactorConnection {
    /// The owned socket.
    pub socket: Socket,
    /// Cached raw descriptor of `socket`.
    pub fd: RawFd,
    /// Peer address, used for connection info and diagnostics.
    pub peer: PeerAddr,
    /// The connection's process-unique identifier.
    pub connection_id: u64,
    /// Outbound staging buffer.
    pub send_buffer: SendBuffer,
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Whether read interest is currently armed. Armed when the connection
    /// becomes established and held until close; the read loop drains to
    /// `WouldBlock` instead of toggling it.
    pub read_watch: bool,
    /// Whether write interest is currently armed.
    pub write_watch: bool,
    /// Total bytes flushed to the kernel over the connection's lifetime.
    pub bytes_flushed: u64,
    /// Outstanding send completions ordered by target offset.
    pub pending_completions: VecDeque<PendingCompletion>,
}

impl ReactorConnection {
    /// Total bytes ever accepted into the send buffer (flushed + pending).
    pub fn bytes_enqueued(&self) -> u64 {
        self.bytes_flushed + self.send_buffer.len() as u64
    }

    /// Pops completions whose drain target has been reached.
    pub fn due_completions(&mut self) -> Vec<PendingCompletion> {
        let mut due = Vec::new();
        while let Some(front) = self.pending_completions.front() {
            if front.target <= self.bytes_flushed {
                // Completion targets are monotonically increasing.
                due.push(self.pending_completions.pop_front().expect("front exists"));
            } else {
                break;
            }
        }
        due
    }
}
