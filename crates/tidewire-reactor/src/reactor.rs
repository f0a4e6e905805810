//! The reactor event loop.
//!
//! One reactor owns a disjoint set of sockets and is the only code that
//! reads from or writes to them. Its loop alternates between waiting for
//! readiness (bounded by the poll interval so shutdown is observed), doing
//! the socket I/O, and draining the cross-thread action mailbox. Results
//! cross to the worker pool as value-only `NetworkEvent`s; failures become
//! events or `Err` returns at the entry points, never panics across the
//! thread boundary.

use std::{
    collections::{HashMap, VecDeque},
    io::{self, Read},
    os::fd::{AsRawFd, RawFd},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use mio::Waker;
use socket2::{SockAddr, Socket};
use tracing::{debug, error, info, trace, warn};

use tidewire_core::{
    config::Config,
    connection_id,
    error::{ErrorKind, NetworkError, Result},
    event::{ConnectionInfo, NetworkEvent, PeerAddr},
};

use crate::{
    connection::{ConnectionState, PendingCompletion, ReactorConnection},
    io_monitor::{IoMonitor, Ready},
    mailbox::{mailbox, MailboxSender, ReactorAction, SendCompletion},
    send_buffer::SendBuffer,
    worker_pool::WorkerPool,
};

/// Receives sockets accepted by this reactor's listeners. Installed by the
/// server facade to spread accepted connections across reactors.
pub type AcceptSink = Box<dyn Fn(Socket, PeerAddr) + Send + 'static>;

/// Converts a kernel socket address into the runtime's peer representation.
pub fn peer_from_sockaddr(addr: &SockAddr) -> PeerAddr {
    match addr.as_socket() {
        Some(inet) => PeerAddr::Inet(inet),
        None => PeerAddr::Unix(addr.as_pathname().map(|p| p.display().to_string())),
    }
}

struct Startup {
    monitor: IoMonitor,
    actions: Receiver<ReactorAction>,
}

/// A single-threaded event loop owning a set of sockets.
///
/// All public methods are thread-safe: they post requests into the
/// reactor's mailbox and the loop thread executes them. The loop thread is
/// the sole owner of every connection and its send buffer.
pub struct Reactor {
    reactor_id: u8,
    config: Config,
    worker_pool: Arc<WorkerPool>,
    sender: MailboxSender,
    waker: Arc<Waker>,
    startup: Mutex<Option<Startup>>,
    accept_sink: Mutex<Option<AcceptSink>>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Reactor {
    /// Creates a reactor. Fails when the kernel readiness handle cannot be
    /// created.
    pub fn new(reactor_id: u8, config: Config, worker_pool: Arc<WorkerPool>) -> Result<Self> {
        let monitor = IoMonitor::new(config.event_batch_size)?;
        let waker = monitor.waker();
        let (sender, actions) = mailbox(config.mailbox_capacity, Arc::clone(&waker));
        Ok(Self {
            reactor_id,
            config,
            worker_pool,
            sender,
            waker,
            startup: Mutex::new(Some(Startup { monitor, actions })),
            accept_sink: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        })
    }

    /// Returns this reactor's identifier (encoded into connection ids).
    pub fn reactor_id(&self) -> u8 {
        self.reactor_id
    }

    /// Installs the accept sink. Must happen before [`Self::start`];
    /// without a sink, accepted sockets are registered on this reactor.
    pub fn set_accept_sink(&self, sink: AcceptSink) {
        let mut slot = self.accept_sink.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(sink);
    }

    /// Launches the loop thread. Calling it on a running reactor is a
    /// no-op.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let startup = {
            let mut slot = self.startup.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        let Some(Startup { monitor, actions }) = startup else {
            self.running.store(false, Ordering::SeqCst);
            return Err(ErrorKind::NotRunning);
        };
        let accept_sink = {
            let mut slot = self.accept_sink.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };

        let mut event_loop = EventLoop {
            reactor_id: self.reactor_id,
            config: self.config.clone(),
            monitor,
            actions,
            worker_pool: Arc::clone(&self.worker_pool),
            running: Arc::clone(&self.running),
            accept_sink,
            connections: HashMap::new(),
            fd_index: HashMap::new(),
            listeners: HashMap::new(),
            next_sequence: 1,
            read_buf: vec![0; self.config.receive_buffer_size],
        };

        let handle = thread::Builder::new()
            .name(format!("tidewire-reactor-{}", self.reactor_id))
            .spawn(move || event_loop.run())
            .map_err(|err| {
                self.running.store(false, Ordering::SeqCst);
                ErrorKind::Io(err)
            })?;
        let mut slot = self.thread.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(handle);
        Ok(())
    }

    /// Requests termination and joins the loop thread, which closes every
    /// owned socket on the way out. Safe and idempotent in any state.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.waker.wake();
        let handle = {
            let mut slot = self.thread.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ErrorKind::NotRunning)
        }
    }

    /// Registers an accepted or already-connected socket and returns its
    /// connection id. Emits `Connected` before any `Data` for the socket.
    pub fn add_connection(&self, socket: Socket, peer: PeerAddr) -> Result<u64> {
        self.ensure_running()?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.sender.post_blocking(ReactorAction::AddConnection {
            socket,
            peer,
            reply: Some(tx),
        })?;
        rx.recv().map_err(|_| ErrorKind::NotRunning)?
    }

    /// Fire-and-forget registration used on the accept path; registration
    /// failures are logged by the loop.
    pub fn add_connection_async(&self, socket: Socket, peer: PeerAddr) -> Result<()> {
        self.ensure_running()?;
        self.sender.post(ReactorAction::AddConnection { socket, peer, reply: None })
    }

    /// Registers a half-open outbound socket. The loop watches for
    /// writability, confirms the connect via `SO_ERROR`, and emits
    /// `Connected` or `Error`.
    pub fn connect(&self, socket: Socket, peer: PeerAddr) -> Result<u64> {
        self.ensure_running()?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.sender.post_blocking(ReactorAction::Connect { socket, peer, reply: tx })?;
        rx.recv().map_err(|_| ErrorKind::NotRunning)?
    }

    /// Registers a listening socket with this reactor's loop.
    pub fn add_listener(&self, listener: Socket) -> Result<()> {
        self.ensure_running()?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.sender.post_blocking(ReactorAction::AddListener { listener, reply: tx })?;
        rx.recv().map_err(|_| ErrorKind::NotRunning)?
    }

    /// Closes a connection. If bytes are still buffered the connection
    /// drains them first; either way a `Disconnected` event is the
    /// connection's final event. Safe from any thread.
    pub fn remove_connection(&self, connection_id: u64) -> Result<()> {
        self.ensure_running()?;
        self.sender.post_blocking(ReactorAction::Remove { connection_id })
    }

    /// Sends bytes on a connection.
    ///
    /// With a zero timeout the call returns as soon as the bytes are
    /// buffered. With a nonzero timeout it blocks until the bytes fully
    /// drain to the socket or the timeout elapses; on timeout the unsent
    /// remainder stays buffered and continues to flush.
    pub fn send(&self, connection_id: u64, data: &[u8], timeout: Duration) -> Result<()> {
        self.ensure_running()?;

        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        let completion = if timeout.is_zero() {
            None
        } else {
            let (done_tx, done_rx) = crossbeam_channel::bounded(1);
            self.sender.post_blocking(ReactorAction::Write {
                connection_id,
                data: data.to_vec(),
                buffered_ack: Some(ack_tx),
                completion: Some(SendCompletion::Sync(done_tx)),
            })?;
            ack_rx.recv().map_err(|_| ErrorKind::NotRunning)??;
            return match done_rx.recv_timeout(timeout) {
                Ok(true) => Ok(()),
                Ok(false) => Err(ErrorKind::ConnectionClosed),
                Err(RecvTimeoutError::Timeout) => Err(ErrorKind::Timeout),
                Err(RecvTimeoutError::Disconnected) => Err(ErrorKind::NotRunning),
            };
        };

        self.sender.post_blocking(ReactorAction::Write {
            connection_id,
            data: data.to_vec(),
            buffered_ack: Some(ack_tx),
            completion,
        })?;
        ack_rx.recv().map_err(|_| ErrorKind::NotRunning)?
    }

    /// Sends bytes without ever blocking the caller. `on_complete` runs on
    /// the reactor thread once the bytes fully drain (or the send fails).
    /// Returns `false` when the request could not even be queued.
    pub fn send_async<F>(&self, connection_id: u64, data: Vec<u8>, on_complete: F) -> bool
    where
        F: FnOnce(bool, usize) + Send + 'static,
    {
        if self.ensure_running().is_err() {
            return false;
        }
        self.sender
            .post(ReactorAction::Write {
                connection_id,
                data,
                buffered_ack: None,
                completion: Some(SendCompletion::Async(Box::new(on_complete))),
            })
            .is_ok()
    }

    /// Reports the number of bytes currently buffered for a connection,
    /// for external flow control.
    pub fn send_buffer_size(&self, connection_id: u64) -> Result<usize> {
        self.ensure_running()?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.sender.post_blocking(ReactorAction::QueryBufferSize { connection_id, reply: tx })?;
        rx.recv().map_err(|_| ErrorKind::NotRunning)?
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone, Copy)]
enum FdEntry {
    Connection(u64),
    PendingConnect(u64),
    Listener,
}

enum CloseReason {
    /// Orderly close: peer EOF or a locally requested disconnect.
    Orderly,
    /// Worker queue overflow while delivering data.
    Overflow,
    /// I/O fault with its semantic classification.
    Fault(NetworkError, String),
}

enum ReadOutcome {
    Open,
    PeerClosed,
    Overflowed,
    Failed(io::Error),
}

struct EventLoop {
    reactor_id: u8,
    config: Config,
    monitor: IoMonitor,
    actions: Receiver<ReactorAction>,
    worker_pool: Arc<WorkerPool>,
    running: Arc<AtomicBool>,
    accept_sink: Option<AcceptSink>,
    connections: HashMap<u64, ReactorConnection>,
    fd_index: HashMap<RawFd, FdEntry>,
    listeners: HashMap<RawFd, Socket>,
    next_sequence: u16,
    read_buf: Vec<u8>,
}

impl EventLoop {
    fn run(&mut self) {
        info!(reactor_id = self.reactor_id, "event loop started");
        let mut ready = Vec::with_capacity(self.config.event_batch_size);

        while self.running.load(Ordering::SeqCst) {
            match self.monitor.wait(&mut ready, Some(self.config.poll_interval)) {
                Ok(_) => {}
                Err(err) => {
                    error!(reactor_id = self.reactor_id, "poll failed: {}", err);
                    break;
                }
            }

            for index in 0..ready.len() {
                self.handle_ready(ready[index]);
            }
            self.drain_actions();
        }

        self.shutdown();
    }

    fn handle_ready(&mut self, ready: Ready) {
        let Some(&entry) = self.fd_index.get(&ready.fd) else {
            trace!(reactor_id = self.reactor_id, fd = ready.fd, "event for untracked fd");
            return;
        };

        match entry {
            FdEntry::Listener => self.accept_ready(ready.fd),
            FdEntry::PendingConnect(id) => self.finish_connect(id, ready),
            FdEntry::Connection(id) => {
                if ready.readable || ready.closed {
                    self.handle_readable(id, ready.closed);
                }
                if ready.writable && self.connections.contains_key(&id) {
                    self.flush_connection(id);
                }
            }
        }
    }

    /// Drains the socket to `WouldBlock`, forwarding each segment to the
    /// worker pool. `Ok(0)` and kernel hangup flags mean orderly peer
    /// close.
    fn handle_readable(&mut self, id: u64, hangup: bool) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };

        let mut outcome = ReadOutcome::Open;
        loop {
            match conn.socket.read(&mut self.read_buf) {
                Ok(0) => {
                    outcome = ReadOutcome::PeerClosed;
                    break;
                }
                Ok(n) => {
                    trace!(
                        reactor_id = self.reactor_id,
                        connection_id = id,
                        bytes = n,
                        "data received"
                    );
                    let event =
                        NetworkEvent::Data { connection_id: id, payload: self.read_buf[..n].to_vec() };
                    if !self.worker_pool.submit_event(event) {
                        warn!(
                            reactor_id = self.reactor_id,
                            connection_id = id,
                            dropped = n,
                            "worker queue overflow"
                        );
                        outcome = ReadOutcome::Overflowed;
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if hangup {
                        outcome = ReadOutcome::PeerClosed;
                    }
                    break;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    outcome = ReadOutcome::Failed(err);
                    break;
                }
            }
        }

        match outcome {
            ReadOutcome::Open => {}
            ReadOutcome::PeerClosed => self.close_connection(id, CloseReason::Orderly),
            ReadOutcome::Overflowed => self.close_connection(id, CloseReason::Overflow),
            ReadOutcome::Failed(err) => self.fail_connection(id, err),
        }
    }

    /// Flushes the send buffer, fires due completions, maintains write
    /// interest and the congestion state machine, and finishes draining
    /// closes.
    fn flush_connection(&mut self, id: u64) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };

        match conn.send_buffer.send_to_socket(&conn.socket) {
            Ok(sent) => {
                conn.bytes_flushed += sent as u64;
                let due = conn.due_completions();

                let mut writable_event = false;
                if conn.state == ConnectionState::Congested
                    && conn.send_buffer.is_below_low_watermark()
                {
                    conn.state = ConnectionState::Active;
                    writable_event = true;
                    debug!(
                        reactor_id = self.reactor_id,
                        connection_id = id,
                        "connection writable again"
                    );
                }

                let fd = conn.fd;
                let drained = conn.send_buffer.is_empty();
                let draining = conn.state == ConnectionState::Draining;
                if drained && conn.write_watch {
                    conn.write_watch = false;
                    if let Err(err) = self.monitor.unwatch_writable(fd) {
                        warn!(reactor_id = self.reactor_id, fd, "unwatch failed: {}", err);
                    }
                } else if !drained && !conn.write_watch {
                    conn.write_watch = true;
                    if let Err(err) = self.monitor.watch_writable(fd) {
                        warn!(reactor_id = self.reactor_id, fd, "watch failed: {}", err);
                    }
                }

                for completion in due {
                    Self::fire_completion(completion, true);
                }
                if writable_event {
                    self.worker_pool.submit_event(NetworkEvent::Writable { connection_id: id });
                }
                if drained && draining {
                    self.close_connection(id, CloseReason::Orderly);
                }
            }
            Err(err) => self.fail_connection(id, err),
        }
    }

    fn handle_write_action(
        &mut self,
        id: u64,
        data: Vec<u8>,
        buffered_ack: Option<crossbeam_channel::Sender<Result<()>>>,
        completion: Option<SendCompletion>,
    ) {
        let rejection = match self.connections.get_mut(&id) {
            None => Some(ErrorKind::UnknownConnection(id)),
            Some(conn) if !conn.state.accepts_sends() => Some(ErrorKind::ConnectionClosed),
            Some(conn) => {
                if conn.send_buffer.write(&data) {
                    None
                } else {
                    Some(ErrorKind::SendBufferFull)
                }
            }
        };

        if let Some(err) = rejection {
            trace!(reactor_id = self.reactor_id, connection_id = id, "send rejected: {}", err);
            if let Some(ack) = buffered_ack {
                let _ = ack.send(Err(err));
            }
            if let Some(completion) = completion {
                Self::fire_completion(
                    PendingCompletion { target: 0, len: 0, completion },
                    false,
                );
            }
            return;
        }

        if let Some(ack) = buffered_ack {
            let _ = ack.send(Ok(()));
        }

        let conn = self.connections.get_mut(&id).expect("connection checked above");
        if let Some(completion) = completion {
            conn.pending_completions.push_back(PendingCompletion {
                target: conn.bytes_enqueued(),
                len: data.len(),
                completion,
            });
        }
        if conn.state == ConnectionState::Active && conn.send_buffer.is_above_high_watermark() {
            conn.state = ConnectionState::Congested;
            debug!(reactor_id = self.reactor_id, connection_id = id, "connection congested");
        }

        self.flush_connection(id);
    }

    fn handle_remove(&mut self, id: u64) {
        let buffered = match self.connections.get(&id) {
            None => {
                warn!(reactor_id = self.reactor_id, connection_id = id, "remove for unknown id");
                return;
            }
            Some(conn) => !conn.send_buffer.is_empty(),
        };

        if !buffered {
            self.close_connection(id, CloseReason::Orderly);
            return;
        }

        // Flush the remainder before closing; no new sends are accepted.
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.state = ConnectionState::Draining;
            if !conn.write_watch {
                conn.write_watch = true;
                let fd = conn.fd;
                if let Err(err) = self.monitor.watch_writable(fd) {
                    warn!(reactor_id = self.reactor_id, fd, "watch failed: {}", err);
                }
            }
        }
    }

    fn finish_connect(&mut self, id: u64, ready: Ready) {
        let (fd, peer, pending_error) = {
            let Some(conn) = self.connections.get_mut(&id) else {
                return;
            };
            let pending = match conn.socket.take_error() {
                Ok(err) => err,
                Err(err) => Some(err),
            };
            (conn.fd, conn.peer.clone(), pending)
        };

        if let Some(err) = pending_error {
            debug!(reactor_id = self.reactor_id, connection_id = id, "connect failed: {}", err);
            self.fail_connection(id, err);
            return;
        }
        if ready.error || ready.closed {
            self.fail_connection(id, io::Error::other("connect aborted"));
            return;
        }
        if !ready.writable {
            return;
        }

        if let Err(err) = self.monitor.watch_readable(fd) {
            self.fail_connection(id, err);
            return;
        }
        if let Err(err) = self.monitor.unwatch_writable(fd) {
            warn!(reactor_id = self.reactor_id, fd, "unwatch failed: {}", err);
        }

        if let Some(conn) = self.connections.get_mut(&id) {
            conn.state = ConnectionState::Active;
            conn.read_watch = true;
            conn.write_watch = false;
        }
        self.fd_index.insert(fd, FdEntry::Connection(id));

        debug!(reactor_id = self.reactor_id, connection_id = id, peer = %peer, "connected");
        let info = ConnectionInfo::new(id, &peer);
        self.worker_pool
            .submit_lifecycle_event(NetworkEvent::Connected { connection_id: id, info });
    }

    fn accept_ready(&mut self, fd: RawFd) {
        let mut accepted = Vec::new();
        {
            let Some(listener) = self.listeners.get(&fd) else {
                return;
            };
            loop {
                match listener.accept() {
                    Ok((socket, addr)) => accepted.push((socket, peer_from_sockaddr(&addr))),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        error!(reactor_id = self.reactor_id, "accept failed: {}", err);
                        break;
                    }
                }
            }
        }

        for (socket, peer) in accepted {
            trace!(reactor_id = self.reactor_id, peer = %peer, "accepted");
            if let Some(sink) = self.accept_sink.as_ref() {
                sink(socket, peer);
            } else if let Err(err) = self.register_connection(socket, peer, false) {
                warn!(reactor_id = self.reactor_id, "accepted socket rejected: {}", err);
            }
        }
    }

    /// Registers a socket with this loop. `connecting` sockets watch for
    /// writability (connect completion); established ones watch for reads
    /// and emit `Connected` immediately.
    fn register_connection(&mut self, socket: Socket, peer: PeerAddr, connecting: bool) -> Result<u64> {
        let fd = socket.as_raw_fd();
        socket.set_nonblocking(true)?;
        if matches!(peer, PeerAddr::Inet(_)) {
            socket.set_nodelay(true)?;
            socket.set_keepalive(true)?;
        }

        if connecting {
            self.monitor.watch_writable(fd)?;
        } else {
            self.monitor.watch_readable(fd)?;
        }

        let id = self.allocate_connection_id(fd);
        self.fd_index.insert(
            fd,
            if connecting { FdEntry::PendingConnect(id) } else { FdEntry::Connection(id) },
        );
        self.connections.insert(
            id,
            ReactorConnection {
                socket,
                fd,
                peer: peer.clone(),
                connection_id: id,
                send_buffer: SendBuffer::with_config(&self.config),
                state: ConnectionState::New,
                read_watch: !connecting,
                write_watch: connecting,
                bytes_flushed: 0,
                pending_completions: VecDeque::new(),
            },
        );

        if !connecting {
            // Established sockets announce themselves right away; outbound
            // ones stay New until connect completion promotes them.
            if let Some(conn) = self.connections.get_mut(&id) {
                conn.state = ConnectionState::Active;
            }
            debug!(reactor_id = self.reactor_id, connection_id = id, peer = %peer, "connection added");
            let info = ConnectionInfo::new(id, &peer);
            self.worker_pool
                .submit_lifecycle_event(NetworkEvent::Connected { connection_id: id, info });
        }
        Ok(id)
    }

    /// Composes the next connection id, skipping the rare sequence values
    /// that would collide with a live connection.
    fn allocate_connection_id(&mut self, fd: RawFd) -> u64 {
        loop {
            let seq = self.next_sequence;
            self.next_sequence = self.next_sequence.wrapping_add(1);
            let id = connection_id::generate(self.reactor_id, fd as u16, seq);
            if !self.connections.contains_key(&id) {
                return id;
            }
        }
    }

    fn register_listener(&mut self, listener: Socket) -> Result<()> {
        let fd = listener.as_raw_fd();
        listener.set_nonblocking(true)?;
        self.monitor.watch_readable(fd)?;
        self.fd_index.insert(fd, FdEntry::Listener);
        self.listeners.insert(fd, listener);
        debug!(reactor_id = self.reactor_id, fd, "listener registered");
        Ok(())
    }

    fn drain_actions(&mut self) {
        while let Ok(action) = self.actions.try_recv() {
            match action {
                ReactorAction::Write { connection_id, data, buffered_ack, completion } => {
                    self.handle_write_action(connection_id, data, buffered_ack, completion);
                }
                ReactorAction::Remove { connection_id } => self.handle_remove(connection_id),
                ReactorAction::AddConnection { socket, peer, reply } => {
                    let result = self.register_connection(socket, peer, false);
                    match reply {
                        Some(reply) => {
                            let _ = reply.send(result);
                        }
                        None => {
                            if let Err(err) = result {
                                warn!(
                                    reactor_id = self.reactor_id,
                                    "connection registration failed: {}", err
                                );
                            }
                        }
                    }
                }
                ReactorAction::Connect { socket, peer, reply } => {
                    let result = self.register_connection(socket, peer, true);
                    let _ = reply.send(result);
                }
                ReactorAction::AddListener { listener, reply } => {
                    let result = self.register_listener(listener);
                    let _ = reply.send(result);
                }
                ReactorAction::QueryBufferSize { connection_id, reply } => {
                    let result = self
                        .connections
                        .get(&connection_id)
                        .map(|conn| conn.send_buffer.len())
                        .ok_or(ErrorKind::UnknownConnection(connection_id));
                    let _ = reply.send(result);
                }
            }
        }
    }

    fn fail_connection(&mut self, id: u64, err: io::Error) {
        let network = NetworkError::from_io(&err);
        self.close_connection(id, CloseReason::Fault(network, err.to_string()));
    }

    /// Removes a connection, fires its outstanding completions as failed,
    /// emits its terminal event and closes the socket.
    fn close_connection(&mut self, id: u64, reason: CloseReason) {
        let Some(mut conn) = self.connections.remove(&id) else {
            return;
        };
        conn.state = ConnectionState::Closed;
        conn.read_watch = false;
        conn.write_watch = false;
        self.fd_index.remove(&conn.fd);
        if let Err(err) = self.monitor.unwatch(conn.fd) {
            warn!(reactor_id = self.reactor_id, fd = conn.fd, "unwatch failed: {}", err);
        }

        for completion in conn.pending_completions.drain(..) {
            Self::fire_completion(completion, false);
        }

        let event = match reason {
            CloseReason::Orderly => NetworkEvent::Disconnected { connection_id: id },
            CloseReason::Overflow => NetworkEvent::Error {
                connection_id: id,
                error: NetworkError::ProtocolViolation,
                detail: String::from("worker queue overflow"),
            },
            CloseReason::Fault(error, detail) => {
                NetworkEvent::Error { connection_id: id, error, detail }
            }
        };
        debug!(reactor_id = self.reactor_id, connection_id = id, "connection closed");
        self.worker_pool.submit_lifecycle_event(event);
        // Dropping the socket closes the descriptor.
    }

    fn fire_completion(pending: PendingCompletion, success: bool) {
        match pending.completion {
            SendCompletion::Sync(tx) => {
                let _ = tx.send(success);
            }
            SendCompletion::Async(callback) => {
                callback(success, if success { pending.len } else { 0 });
            }
        }
    }

    fn shutdown(&mut self) {
        debug!(
            reactor_id = self.reactor_id,
            connections = self.connections.len(),
            "closing owned sockets"
        );
        let ids: Vec<u64> = self.connections.keys().copied().collect();
        for id in ids {
            self.close_connection(id, CloseReason::Orderly);
        }
        for (fd, _listener) in self.listeners.drain() {
            let _ = self.monitor.unwatch(fd);
        }
        self.fd_index.clear();
        info!(reactor_id = self.reactor_id, "event loop stopped");
    }
}
