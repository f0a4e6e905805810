//! Client facade.
//!
//! A [`Client`] drives one outbound connection over a single reactor and a
//! single-worker pool, which keeps callback dispatch strictly ordered.
//! Connects are non-blocking: `connect_*` returns once the attempt is
//! registered, and the connected callback (or an error) reports the
//! outcome. `SO_ERROR` is checked on writability to confirm success.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Condvar, Mutex, RwLock, Weak,
};
use std::time::Duration;

use socket2::Domain;
use tracing::{debug, warn};

use tidewire_core::{
    config::Config,
    error::{ErrorKind, NetworkError, Result},
    event::{ConnectionInfo, NetworkEvent, PeerAddr},
};
use tidewire_protocol::{Encoder, StreamEvent};
use tidewire_reactor::{Reactor, WorkerPool};

use crate::{framed::FramedPipeline, socket};

type Slot<T> = RwLock<Option<Arc<T>>>;

fn installed<T: ?Sized>(slot: &Slot<T>) -> Option<Arc<T>> {
    slot.read().unwrap_or_else(|e| e.into_inner()).clone()
}

fn install<T: ?Sized>(slot: &Slot<T>, value: Arc<T>) {
    *slot.write().unwrap_or_else(|e| e.into_inner()) = Some(value);
}

/// Connection lifecycle as seen by the client facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No connection and none in progress.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The connection is established.
    Connected,
    /// A close was requested and is draining.
    Closing,
}

#[derive(Default)]
struct ClientCallbacks {
    on_connected: Slot<dyn Fn(&ConnectionInfo) + Send + Sync>,
    on_message: Slot<dyn Fn(&[u8]) + Send + Sync>,
    on_stream_event: Slot<dyn Fn(&StreamEvent) + Send + Sync>,
    on_disconnected: Slot<dyn Fn() + Send + Sync>,
    on_error: Slot<dyn Fn(NetworkError, &str) + Send + Sync>,
    on_writable: Slot<dyn Fn() + Send + Sync>,
}

struct ClientShared {
    state: Mutex<ClientState>,
    state_changed: Condvar,
    connection_id: AtomicU64,
    callbacks: ClientCallbacks,
    framing: Option<FramedPipeline>,
    reactor: Arc<Reactor>,
}

/// Single-connection client endpoint.
pub struct Client {
    config: Config,
    worker_pool: Arc<WorkerPool>,
    shared: Arc<ClientShared>,
}

impl Client {
    /// Creates a client with the client-profile configuration (one worker).
    pub fn new() -> Result<Self> {
        Self::with_config(Config::client())
    }

    /// Creates a client with an explicit configuration.
    pub fn with_config(config: Config) -> Result<Self> {
        socket::ignore_sigpipe();

        let worker_pool = Arc::new(WorkerPool::new(
            config.worker_count,
            config.worker_queue_capacity,
            config.lifecycle_enqueue_budget,
        ));
        let reactor = Arc::new(Reactor::new(0, config.clone(), Arc::clone(&worker_pool))?);

        let shared = Arc::new(ClientShared {
            state: Mutex::new(ClientState::Disconnected),
            state_changed: Condvar::new(),
            connection_id: AtomicU64::new(0),
            callbacks: ClientCallbacks::default(),
            framing: config
                .use_framing
                .then(|| FramedPipeline::new(config.message_timeout)),
            reactor: Arc::clone(&reactor),
        });

        let weak: Weak<ClientShared> = Arc::downgrade(&shared);
        worker_pool.set_event_callback(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.dispatch(event);
            }
        });

        worker_pool.start();
        reactor.start()?;

        Ok(Self { config, worker_pool, shared })
    }

    /// Connects to a numeric IPv4 host and port.
    pub fn connect_ipv4(&self, host: &str, port: u16) -> Result<()> {
        let addr = socket::parse_ipv4(host, port)?;
        self.connect_inet(addr)
    }

    /// Connects to a numeric IPv6 host and port.
    pub fn connect_ipv6(&self, host: &str, port: u16) -> Result<()> {
        let addr = socket::parse_ipv6(host, port)?;
        self.connect_inet(addr)
    }

    fn connect_inet(&self, addr: std::net::SocketAddr) -> Result<()> {
        self.begin_connecting()?;

        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let result = (|| {
            let stream = socket::stream_socket(domain)?;
            socket::apply_stream_options(&stream, &self.config, true)?;
            socket::begin_connect(&stream, &addr.into())?;
            self.shared.reactor.connect(stream, PeerAddr::Inet(addr))
        })();

        self.finish_connect_attempt(result)
    }

    /// Connects to a Unix-domain socket path.
    pub fn connect_unix(&self, path: &str) -> Result<()> {
        let sockaddr = socket::unix_sockaddr(path)?;
        self.begin_connecting()?;

        let result = (|| {
            let stream = socket::stream_socket(Domain::UNIX)?;
            socket::apply_stream_options(&stream, &self.config, false)?;
            socket::begin_connect(&stream, &sockaddr)?;
            self.shared
                .reactor
                .connect(stream, PeerAddr::Unix(Some(path.to_string())))
        })();

        self.finish_connect_attempt(result)
    }

    fn begin_connecting(&self) -> Result<()> {
        let mut state = self.shared.lock_state();
        if *state != ClientState::Disconnected {
            return Err(ErrorKind::ConnectionClosed);
        }
        *state = ClientState::Connecting;
        Ok(())
    }

    fn finish_connect_attempt(&self, result: Result<u64>) -> Result<()> {
        match result {
            Ok(_pending_id) => Ok(()),
            Err(err) => {
                self.shared.set_state(ClientState::Disconnected);
                Err(err)
            }
        }
    }

    /// Blocks until the connection is established, the attempt fails, or
    /// the timeout elapses. Returns whether the client is connected.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let state = self.shared.lock_state();
        let (state, _) = self
            .shared
            .state_changed
            .wait_timeout_while(state, timeout, |s| *s == ClientState::Connecting)
            .unwrap_or_else(|e| e.into_inner());
        *state == ClientState::Connected
    }

    /// True while the connection is established.
    pub fn is_connected(&self) -> bool {
        *self.shared.lock_state() == ClientState::Connected
    }

    /// The live connection's id, or 0 when disconnected.
    pub fn connection_id(&self) -> u64 {
        self.shared.connection_id.load(Ordering::SeqCst)
    }

    /// Sends raw bytes. A zero timeout returns once buffered; a nonzero
    /// timeout blocks until the bytes drained to the socket.
    pub fn send(&self, data: &[u8], timeout: Duration) -> Result<()> {
        let connection_id = self.connected_id()?;
        self.shared.reactor.send(connection_id, data, timeout)
    }

    /// Sends raw bytes without blocking; the completion callback runs on
    /// the reactor thread after the bytes drained.
    pub fn send_async<F>(&self, data: Vec<u8>, on_complete: F) -> bool
    where
        F: FnOnce(bool, usize) + Send + 'static,
    {
        match self.connected_id() {
            Ok(connection_id) => self.shared.reactor.send_async(connection_id, data, on_complete),
            Err(_) => false,
        }
    }

    /// Encodes a message through the framing codec and sends its frames.
    pub fn send_message(&self, message_id: u64, data: &[u8]) -> Result<()> {
        let connection_id = self.connected_id()?;
        let frames = Encoder::encode_message(message_id, data, self.config.framing_crc)?;
        for packet in Encoder::serialize_frames(&frames) {
            self.shared.reactor.send(connection_id, &packet, Duration::ZERO)?;
        }
        Ok(())
    }

    /// Bytes currently buffered toward the peer.
    pub fn send_buffer_size(&self) -> Result<usize> {
        let connection_id = self.connected_id()?;
        self.shared.reactor.send_buffer_size(connection_id)
    }

    /// Stops accepting new sends, waits until the send buffer drained to
    /// the peer (bounded by `timeout`), then tears the client down.
    /// Returns `true` when the buffer fully drained in time.
    pub fn graceful_shutdown(&self, timeout: Duration) -> bool {
        let connection_id = {
            let mut state = self.shared.lock_state();
            match *state {
                ClientState::Connected | ClientState::Connecting => {
                    *state = ClientState::Closing;
                    self.shared.connection_id.load(Ordering::SeqCst)
                }
                ClientState::Closing => 0,
                ClientState::Disconnected => {
                    drop(state);
                    self.teardown();
                    return true;
                }
            }
        };

        if connection_id != 0 {
            // Draining close: the reactor flushes buffered bytes first and
            // emits `Disconnected` when done.
            let _ = self.shared.reactor.remove_connection(connection_id);
        }

        let drained = {
            let state = self.shared.lock_state();
            let (state, _) = self
                .shared
                .state_changed
                .wait_timeout_while(state, timeout, |s| *s != ClientState::Disconnected)
                .unwrap_or_else(|e| e.into_inner());
            *state == ClientState::Disconnected
        };

        self.teardown();
        debug!(drained, "graceful shutdown finished");
        drained
    }

    /// Closes the connection immediately (buffered bytes still drain in
    /// the background before the socket closes) and tears the client down.
    pub fn disconnect(&self) {
        let connection_id = self.shared.connection_id.load(Ordering::SeqCst);
        if connection_id != 0 {
            let _ = self.shared.reactor.remove_connection(connection_id);
        }
        self.shared.set_state(ClientState::Disconnected);
        self.teardown();
    }

    fn teardown(&self) {
        self.shared.reactor.stop();
        self.worker_pool.stop();
    }

    fn connected_id(&self) -> Result<u64> {
        if !self.is_connected() {
            return Err(ErrorKind::ConnectionClosed);
        }
        match self.shared.connection_id.load(Ordering::SeqCst) {
            0 => Err(ErrorKind::ConnectionClosed),
            id => Ok(id),
        }
    }

    /// Installs the connected callback.
    pub fn set_on_connected<F>(&self, callback: F)
    where
        F: Fn(&ConnectionInfo) + Send + Sync + 'static,
    {
        install(&self.shared.callbacks.on_connected, Arc::new(callback));
    }

    /// Installs the message callback. Without framing it receives raw
    /// segments; with framing, whole reassembled messages.
    pub fn set_on_message<F>(&self, callback: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        install(&self.shared.callbacks.on_message, Arc::new(callback));
    }

    /// Installs the stream-event callback (framing only).
    pub fn set_on_stream_event<F>(&self, callback: F)
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        install(&self.shared.callbacks.on_stream_event, Arc::new(callback));
    }

    /// Installs the disconnected callback.
    pub fn set_on_disconnected<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        install(&self.shared.callbacks.on_disconnected, Arc::new(callback));
    }

    /// Installs the error callback.
    pub fn set_on_error<F>(&self, callback: F)
    where
        F: Fn(NetworkError, &str) + Send + Sync + 'static,
    {
        install(&self.shared.callbacks.on_error, Arc::new(callback));
    }

    /// Installs the writable-again callback, fired when the congested
    /// connection drops below the low watermark.
    pub fn set_on_writable<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        install(&self.shared.callbacks.on_writable, Arc::new(callback));
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl ClientShared {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, new_state: ClientState) {
        let mut state = self.lock_state();
        *state = new_state;
        self.state_changed.notify_all();
    }

    fn dispatch(&self, event: &NetworkEvent) {
        match event {
            NetworkEvent::Connected { connection_id, info } => {
                self.connection_id.store(*connection_id, Ordering::SeqCst);
                self.set_state(ClientState::Connected);
                if let Some(framing) = &self.framing {
                    framing.open(*connection_id);
                }
                if let Some(cb) = installed(&self.callbacks.on_connected) {
                    cb(info);
                }
            }
            NetworkEvent::Data { connection_id, payload } => match &self.framing {
                None => {
                    if let Some(cb) = installed(&self.callbacks.on_message) {
                        cb(payload);
                    }
                }
                Some(framing) => match framing.feed(*connection_id, payload) {
                    Ok(batch) => {
                        if let Some(cb) = installed(&self.callbacks.on_message) {
                            for message in &batch.messages {
                                cb(&message.data);
                            }
                        }
                        if let Some(cb) = installed(&self.callbacks.on_stream_event) {
                            for stream_event in &batch.stream_events {
                                cb(stream_event);
                            }
                        }
                    }
                    Err(err) => {
                        warn!(connection_id, "protocol violation: {}", err);
                        if let Some(cb) = installed(&self.callbacks.on_error) {
                            cb(NetworkError::ProtocolViolation, &err.to_string());
                        }
                        let _ = self.reactor.remove_connection(*connection_id);
                    }
                },
            },
            NetworkEvent::Disconnected { connection_id } => {
                if let Some(framing) = &self.framing {
                    framing.close(*connection_id);
                }
                self.connection_id.store(0, Ordering::SeqCst);
                self.set_state(ClientState::Disconnected);
                if let Some(cb) = installed(&self.callbacks.on_disconnected) {
                    cb();
                }
            }
            NetworkEvent::Error { connection_id, error, detail } => {
                if let Some(framing) = &self.framing {
                    framing.close(*connection_id);
                }
                self.connection_id.store(0, Ordering::SeqCst);
                self.set_state(ClientState::Disconnected);
                if let Some(cb) = installed(&self.callbacks.on_error) {
                    cb(*error, detail);
                }
                if let Some(cb) = installed(&self.callbacks.on_disconnected) {
                    cb();
                }
            }
            NetworkEvent::Writable { .. } => {
                if let Some(cb) = installed(&self.callbacks.on_writable) {
                    cb();
                }
            }
        }
    }
}
