//! Server facade.
//!
//! A [`Server`] owns its listeners, one or more reactors and a shared
//! worker pool. Listeners live on reactor 0; accepted sockets are spread
//! round-robin across the reactors. Application callbacks run on worker
//! threads and may call back into the server (sends, disconnects) freely;
//! those calls post to the owning reactor's mailbox.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex, RwLock, Weak,
};
use std::time::Duration;

use socket2::Socket;
use tracing::{info, warn};

use tidewire_core::{
    config::Config,
    connection_id,
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

#[derive(Default)]
struct ServerCallbacks {
    on_connected: Slot<dyn Fn(&ConnectionInfo) + Send + Sync>,
    on_message: Slot<dyn Fn(u64, &[u8]) + Send + Sync>,
    on_stream_event: Slot<dyn Fn(u64, &StreamEvent) + Send + Sync>,
    on_disconnected: Slot<dyn Fn(u64) + Send + Sync>,
    on_error: Slot<dyn Fn(u64, NetworkError, &str) + Send + Sync>,
    on_writable: Slot<dyn Fn(u64) + Send + Sync>,
}

struct ServerInner {
    config: Config,
    worker_pool: Arc<WorkerPool>,
    reactors: Vec<Arc<Reactor>>,
    callbacks: ServerCallbacks,
    framing: Option<FramedPipeline>,
    unix_paths: Mutex<Vec<String>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

/// Multi-connection server endpoint.
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Creates a server with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    /// Creates a server with an explicit configuration.
    pub fn with_config(config: Config) -> Result<Self> {
        socket::ignore_sigpipe();

        let worker_pool = Arc::new(WorkerPool::new(
            config.worker_count,
            config.worker_queue_capacity,
            config.lifecycle_enqueue_budget,
        ));

        let reactor_count = config.reactor_count.clamp(1, u8::MAX as usize);
        let mut reactors = Vec::with_capacity(reactor_count);
        for reactor_id in 0..reactor_count {
            reactors.push(Arc::new(Reactor::new(
                reactor_id as u8,
                config.clone(),
                Arc::clone(&worker_pool),
            )?));
        }

        let framing = config
            .use_framing
            .then(|| FramedPipeline::new(config.message_timeout));

        let inner = Arc::new(ServerInner {
            config,
            worker_pool,
            reactors,
            callbacks: ServerCallbacks::default(),
            framing,
            unix_paths: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });

        // The worker callback holds only a weak back-reference so that
        // dropping the server tears everything down.
        let weak: Weak<ServerInner> = Arc::downgrade(&inner);
        inner.worker_pool.set_event_callback(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(event);
            }
        });

        // Accepted sockets are configured and spread round-robin.
        let sink_reactors = inner.reactors.clone();
        let sink_config = inner.config.clone();
        let next = AtomicUsize::new(0);
        inner.reactors[0].set_accept_sink(Box::new(move |stream: Socket, peer: PeerAddr| {
            let is_tcp = matches!(peer, PeerAddr::Inet(_));
            if let Err(err) = socket::apply_stream_options(&stream, &sink_config, is_tcp) {
                warn!(peer = %peer, "dropping accepted socket, options failed: {}", err);
                return;
            }
            let pick = next.fetch_add(1, Ordering::Relaxed) % sink_reactors.len();
            if let Err(err) = sink_reactors[pick].add_connection_async(stream, peer) {
                warn!("dropping accepted socket, reactor rejected it: {}", err);
            }
        }));

        Ok(Self { inner })
    }

    fn ensure_started(&self) -> Result<()> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(ErrorKind::NotRunning);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.worker_pool.start();
        for reactor in &self.inner.reactors {
            reactor.start()?;
        }
        Ok(())
    }

    /// Starts listening on a numeric IPv4 host and port.
    pub fn start_ipv4(&self, host: &str, port: u16) -> Result<()> {
        let addr = socket::parse_ipv4(host, port)?;
        self.ensure_started()?;
        let listener = socket::tcp_listener(addr, self.inner.config.listen_backlog, None)?;
        self.inner.reactors[0].add_listener(listener)?;
        info!(%addr, "listening (ipv4)");
        Ok(())
    }

    /// Starts listening on a numeric IPv6 host and port.
    pub fn start_ipv6(&self, host: &str, port: u16) -> Result<()> {
        let addr = socket::parse_ipv6(host, port)?;
        self.ensure_started()?;
        let listener =
            socket::tcp_listener(addr, self.inner.config.listen_backlog, Some(true))?;
        self.inner.reactors[0].add_listener(listener)?;
        info!(%addr, "listening (ipv6)");
        Ok(())
    }

    /// Starts one dual-stack listener (an IPv6 socket with `IPV6_V6ONLY`
    /// cleared) accepting both IPv4 and IPv6 peers.
    pub fn start_universal(&self, host: &str, port: u16) -> Result<()> {
        let addr = socket::parse_ipv6(host, port)?;
        self.ensure_started()?;
        let listener =
            socket::tcp_listener(addr, self.inner.config.listen_backlog, Some(false))?;
        self.inner.reactors[0].add_listener(listener)?;
        info!(%addr, "listening (dual-stack)");
        Ok(())
    }

    /// Starts listening on a Unix-domain socket path. The path is unlinked
    /// before bind and again when the server stops.
    pub fn start_unix(&self, path: &str) -> Result<()> {
        self.ensure_started()?;
        let listener = socket::unix_listener(path, self.inner.config.listen_backlog)?;
        self.inner.reactors[0].add_listener(listener)?;
        let mut paths = self.inner.unix_paths.lock().unwrap_or_else(|e| e.into_inner());
        paths.push(path.to_string());
        info!(path, "listening (unix)");
        Ok(())
    }

    /// Stops the server: listeners close with their reactor, then the
    /// worker pool drains, then Unix socket paths are unlinked. Calling it
    /// again is a no-op.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for reactor in &self.inner.reactors {
            reactor.stop();
        }
        self.inner.worker_pool.stop();
        let mut paths = self.inner.unix_paths.lock().unwrap_or_else(|e| e.into_inner());
        for path in paths.drain(..) {
            let _ = std::fs::remove_file(&path);
        }
        info!("server stopped");
    }

    /// Sends raw bytes on a connection. A zero timeout returns once the
    /// bytes are buffered; a nonzero timeout blocks until they drained to
    /// the socket or the timeout elapsed.
    pub fn send(&self, connection_id: u64, data: &[u8], timeout: Duration) -> Result<()> {
        self.inner.reactor_for(connection_id)?.send(connection_id, data, timeout)
    }

    /// Sends raw bytes without blocking; `on_complete(success, bytes_sent)`
    /// runs on the reactor thread after the bytes drained.
    pub fn send_async<F>(&self, connection_id: u64, data: Vec<u8>, on_complete: F) -> bool
    where
        F: FnOnce(bool, usize) + Send + 'static,
    {
        match self.inner.reactor_for(connection_id) {
            Ok(reactor) => reactor.send_async(connection_id, data, on_complete),
            Err(_) => false,
        }
    }

    /// Encodes a message through the framing codec and sends its frames.
    pub fn send_message(&self, connection_id: u64, message_id: u64, data: &[u8]) -> Result<()> {
        let frames = Encoder::encode_message(message_id, data, self.inner.config.framing_crc)?;
        let reactor = self.inner.reactor_for(connection_id)?;
        for packet in Encoder::serialize_frames(&frames) {
            reactor.send(connection_id, &packet, Duration::ZERO)?;
        }
        Ok(())
    }

    /// Closes a connection; its final event is `Disconnected`.
    pub fn disconnect(&self, connection_id: u64) -> Result<()> {
        self.inner.reactor_for(connection_id)?.remove_connection(connection_id)
    }

    /// Bytes currently buffered for the connection, for flow control.
    pub fn send_buffer_size(&self, connection_id: u64) -> Result<usize> {
        self.inner.reactor_for(connection_id)?.send_buffer_size(connection_id)
    }

    /// Installs the connected callback.
    pub fn set_on_connected<F>(&self, callback: F)
    where
        F: Fn(&ConnectionInfo) + Send + Sync + 'static,
    {
        install(&self.inner.callbacks.on_connected, Arc::new(callback));
    }

    /// Installs the message callback. Without framing it receives raw
    /// segments; with framing, whole reassembled messages.
    pub fn set_on_message<F>(&self, callback: F)
    where
        F: Fn(u64, &[u8]) + Send + Sync + 'static,
    {
        install(&self.inner.callbacks.on_message, Arc::new(callback));
    }

    /// Installs the stream-event callback (framing only).
    pub fn set_on_stream_event<F>(&self, callback: F)
    where
        F: Fn(u64, &StreamEvent) + Send + Sync + 'static,
    {
        install(&self.inner.callbacks.on_stream_event, Arc::new(callback));
    }

    /// Installs the disconnected callback.
    pub fn set_on_disconnected<F>(&self, callback: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        install(&self.inner.callbacks.on_disconnected, Arc::new(callback));
    }

    /// Installs the error callback.
    pub fn set_on_error<F>(&self, callback: F)
    where
        F: Fn(u64, NetworkError, &str) + Send + Sync + 'static,
    {
        install(&self.inner.callbacks.on_error, Arc::new(callback));
    }

    /// Installs the writable-again callback, fired when a congested
    /// connection drops below the low watermark.
    pub fn set_on_writable<F>(&self, callback: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        install(&self.inner.callbacks.on_writable, Arc::new(callback));
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ServerInner {
    fn reactor_for(&self, connection_id: u64) -> Result<&Arc<Reactor>> {
        let reactor_id = connection_id::reactor_id(connection_id) as usize;
        self.reactors
            .get(reactor_id)
            .ok_or(ErrorKind::UnknownConnection(connection_id))
    }

    fn dispatch(&self, event: &NetworkEvent) {
        match event {
            NetworkEvent::Connected { connection_id, info } => {
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
                        cb(*connection_id, payload);
                    }
                }
                Some(framing) => match framing.feed(*connection_id, payload) {
                    Ok(batch) => {
                        if let Some(cb) = installed(&self.callbacks.on_message) {
                            for message in &batch.messages {
                                cb(*connection_id, &message.data);
                            }
                        }
                        if let Some(cb) = installed(&self.callbacks.on_stream_event) {
                            for stream_event in &batch.stream_events {
                                cb(*connection_id, stream_event);
                            }
                        }
                    }
                    Err(err) => {
                        warn!(connection_id, "protocol violation: {}", err);
                        if let Some(cb) = installed(&self.callbacks.on_error) {
                            cb(*connection_id, NetworkError::ProtocolViolation, &err.to_string());
                        }
                        if let Ok(reactor) = self.reactor_for(*connection_id) {
                            let _ = reactor.remove_connection(*connection_id);
                        }
                    }
                },
            },
            NetworkEvent::Disconnected { connection_id } => {
                if let Some(framing) = &self.framing {
                    framing.close(*connection_id);
                }
                if let Some(cb) = installed(&self.callbacks.on_disconnected) {
                    cb(*connection_id);
                }
            }
            NetworkEvent::Error { connection_id, error, detail } => {
                if let Some(framing) = &self.framing {
                    framing.close(*connection_id);
                }
                if let Some(cb) = installed(&self.callbacks.on_error) {
                    cb(*connection_id, *error, detail);
                }
            }
            NetworkEvent::Writable { connection_id } => {
                if let Some(cb) = installed(&self.callbacks.on_writable) {
                    cb(*connection_id);
                }
            }
        }
    }
}
