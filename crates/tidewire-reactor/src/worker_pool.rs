//! Sharded worker pool.
//!
//! Events are routed to worker `connection_id % worker_count`, so all
//! events of one connection land on one worker and are observed in FIFO
//! order; across connections no ordering is guaranteed. Each worker owns a
//! bounded queue; enqueue policy on overflow is the caller's (the reactor
//! drops data and bounded-waits for lifecycle events).
//!
//! The application callback runs on worker threads. Panics inside it are
//! caught at the loop boundary so a misbehaving callback can never tear
//! down the pool.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, trace};

use tidewire_core::event::NetworkEvent;

/// The single application callback, invoked on a worker thread.
pub type EventCallback = Arc<dyn Fn(&NetworkEvent) + Send + Sync + 'static>;

type CallbackSlot = Arc<RwLock<Option<EventCallback>>>;

/// Fixed-size pool of worker threads dispatching network events.
pub struct WorkerPool {
    shards: Vec<Sender<NetworkEvent>>,
    receivers: Vec<Receiver<NetworkEvent>>,
    callback: CallbackSlot,
    running: Arc<AtomicBool>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    lifecycle_budget: Duration,
}

impl WorkerPool {
    /// Creates a pool with `worker_count` shards of `queue_capacity` events
    /// each. `lifecycle_budget` bounds how long a lifecycle enqueue may
    /// block on a full shard.
    pub fn new(worker_count: usize, queue_capacity: usize, lifecycle_budget: Duration) -> Self {
        let worker_count = worker_count.max(1);
        let mut shards = Vec::with_capacity(worker_count);
        let mut receivers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let (tx, rx) = bounded(queue_capacity);
            shards.push(tx);
            receivers.push(rx);
        }
        Self {
            shards,
            receivers,
            callback: Arc::new(RwLock::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
            lifecycle_budget,
        }
    }

    /// Number of worker shards.
    pub fn worker_count(&self) -> usize {
        self.shards.len()
    }

    /// Installs the application callback, replacing any previous one.
    /// Safe to call from any thread, including while the pool runs.
    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(&NetworkEvent) + Send + Sync + 'static,
    {
        let mut slot = self.callback.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(callback));
    }

    /// Non-blocking enqueue into the event's shard. Returns `false` when
    /// the shard is full; the caller decides the overflow policy.
    pub fn submit_event(&self, event: NetworkEvent) -> bool {
        let shard = (event.connection_id() % self.shards.len() as u64) as usize;
        self.shards[shard].try_send(event).is_ok()
    }

    /// Enqueue for lifecycle events: waits up to the configured budget for
    /// space in the shard to preserve lifecycle fidelity, then gives up.
    pub fn submit_lifecycle_event(&self, event: NetworkEvent) -> bool {
        let shard = (event.connection_id() % self.shards.len() as u64) as usize;
        match self.shards[shard].send_timeout(event, self.lifecycle_budget) {
            Ok(()) => true,
            Err(err) => {
                error!("lifecycle event dropped, worker shard {} saturated: {}", shard, err);
                false
            }
        }
    }

    /// Starts the worker threads; a second call is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        for (worker_id, rx) in self.receivers.iter().enumerate() {
            let rx = rx.clone();
            let callback = Arc::clone(&self.callback);
            let running = Arc::clone(&self.running);
            threads.push(
                thread::Builder::new()
                    .name(format!("tidewire-worker-{}", worker_id))
                    .spawn(move || Self::worker_loop(worker_id, rx, callback, running))
                    .expect("failed to spawn worker thread"),
            );
        }
    }

    /// Stops the pool: signals the workers, lets them drain their shards,
    /// and joins them. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
        debug!("worker pool stopped");
    }

    fn worker_loop(
        worker_id: usize,
        rx: Receiver<NetworkEvent>,
        callback: CallbackSlot,
        running: Arc<AtomicBool>,
    ) {
        debug!(worker_id, "worker started");
        while running.load(Ordering::SeqCst) {
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(event) => Self::dispatch(&callback, &event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // Drain whatever is still queued so lifecycle events are not lost
        // across shutdown.
        while let Ok(event) = rx.try_recv() {
            Self::dispatch(&callback, &event);
        }
        debug!(worker_id, "worker exited");
    }

    fn dispatch(callback: &CallbackSlot, event: &NetworkEvent) {
        let cb = {
            let slot = callback.read().unwrap_or_else(|e| e.into_inner());
            slot.clone()
        };
        let Some(cb) = cb else {
            trace!("event dropped, no callback installed");
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| cb(event))).is_err() {
            error!(
                connection_id = event.connection_id(),
                "application callback panicked; worker continues"
            );
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}
