//! Cross-thread action mailbox.
//!
//! Facades and worker callbacks never touch reactor state directly; they
//! post [`ReactorAction`]s into a bounded channel the reactor drains every
//! loop iteration. Posting wakes the poll so actions are handled promptly
//! even when the wire is idle.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use mio::Waker;
use socket2::Socket;

use tidewire_core::{
    error::{ErrorKind, Result},
    event::PeerAddr,
};

/// How the completion of a buffered send is reported.
pub enum SendCompletion {
    /// Signal a blocked caller; `true` once the bytes fully drained.
    Sync(Sender<bool>),
    /// Invoke a callback on the reactor thread: `(success, bytes_sent)`.
    Async(Box<dyn FnOnce(bool, usize) + Send>),
}

impl std::fmt::Debug for SendCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendCompletion::Sync(_) => f.write_str("SendCompletion::Sync"),
            SendCompletion::Async(_) => f.write_str("SendCompletion::Async"),
        }
    }
}

/// A request posted to a reactor from another thread.
pub enum ReactorAction {
    /// Append bytes to a connection's send buffer and arm write interest.
    Write {
        /// Target connection.
        connection_id: u64,
        /// Bytes to buffer.
        data: Vec<u8>,
        /// Signalled once the bytes are buffered (or rejected).
        buffered_ack: Option<Sender<Result<()>>>,
        /// Fired after the bytes fully drain to the socket.
        completion: Option<SendCompletion>,
    },
    /// Close a connection and emit its terminal event.
    Remove {
        /// Target connection.
        connection_id: u64,
    },
    /// Register an accepted or already-connected socket.
    AddConnection {
        /// The socket, already non-blocking.
        socket: Socket,
        /// Peer address of the socket.
        peer: PeerAddr,
        /// Receives the assigned connection id.
        reply: Option<Sender<Result<u64>>>,
    },
    /// Register a half-open outbound socket awaiting connect completion.
    Connect {
        /// The socket with a connect in progress.
        socket: Socket,
        /// Peer address being connected to.
        peer: PeerAddr,
        /// Receives the assigned connection id.
        reply: Sender<Result<u64>>,
    },
    /// Register a listening socket; accepted sockets go to the accept sink.
    AddListener {
        /// The listening socket, already non-blocking.
        listener: Socket,
        /// Acknowledges registration.
        reply: Sender<Result<()>>,
    },
    /// Report the current send-buffer size of a connection.
    QueryBufferSize {
        /// Target connection.
        connection_id: u64,
        /// Receives the buffered byte count.
        reply: Sender<Result<usize>>,
    },
}

impl std::fmt::Debug for ReactorAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReactorAction::Write { connection_id, data, .. } => f
                .debug_struct("Write")
                .field("connection_id", connection_id)
                .field("len", &data.len())
                .finish(),
            ReactorAction::Remove { connection_id } => {
                f.debug_struct("Remove").field("connection_id", connection_id).finish()
            }
            ReactorAction::AddConnection { peer, .. } => {
                f.debug_struct("AddConnection").field("peer", peer).finish()
            }
            ReactorAction::Connect { peer, .. } => {
                f.debug_struct("Connect").field("peer", peer).finish()
            }
            ReactorAction::AddListener { .. } => f.write_str("AddListener"),
            ReactorAction::QueryBufferSize { connection_id, .. } => f
                .debug_struct("QueryBufferSize")
                .field("connection_id", connection_id)
                .finish(),
        }
    }
}

/// Posting half of the mailbox, cloneable across threads.
#[derive(Clone)]
pub struct MailboxSender {
    tx: Sender<ReactorAction>,
    waker: Arc<Waker>,
}

impl MailboxSender {
    /// Posts without blocking. Fails with `MailboxFull` when the bounded
    /// queue is at capacity and `NotRunning` when the reactor is gone.
    pub fn post(&self, action: ReactorAction) -> Result<()> {
        match self.tx.try_send(action) {
            Ok(()) => {
                let _ = self.waker.wake();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(ErrorKind::MailboxFull),
            Err(TrySendError::Disconnected(_)) => Err(ErrorKind::NotRunning),
        }
    }

    /// Posts, blocking while the mailbox is full.
    pub fn post_blocking(&self, action: ReactorAction) -> Result<()> {
        self.tx.send(action).map_err(|_| ErrorKind::NotRunning)?;
        let _ = self.waker.wake();
        Ok(())
    }
}

/// Creates the bounded mailbox pair.
pub fn mailbox(capacity: usize, waker: Arc<Waker>) -> (MailboxSender, Receiver<ReactorAction>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (MailboxSender { tx, waker }, rx)
}
