use std::{default::Default, time::Duration};

#[derive(Clone, Debug)]
/// Configuration options to tune runtime behavior.
pub struct Config {
    /// Number of reactor threads (servers may shard connections across several).
    pub reactor_count: usize,
    /// Number of worker threads invoking the application callback.
    pub worker_count: usize,
    /// Max readiness events returned per poll iteration.
    pub event_batch_size: usize,
    /// Size of the per-read receive buffer in bytes.
    pub receive_buffer_size: usize,
    /// Initial capacity of each connection's send buffer.
    pub send_buffer_initial_capacity: usize,
    /// Send-buffer size at which a connection is considered congested.
    pub send_buffer_high_watermark: usize,
    /// Send-buffer size below which a congested connection becomes writable again.
    pub send_buffer_low_watermark: usize,
    /// Hard cap on a connection's send buffer; writes beyond this fail.
    pub send_buffer_max_capacity: usize,
    /// Capacity of each worker's bounded event queue.
    pub worker_queue_capacity: usize,
    /// Capacity of the reactor's cross-thread action mailbox.
    pub mailbox_capacity: usize,
    /// How long the reactor may block enqueueing a lifecycle event into a
    /// full worker queue before dropping it.
    pub lifecycle_enqueue_budget: Duration,
    /// Reassembly timeout for partially received framed messages.
    pub message_timeout: Duration,
    /// Upper bound on a single poll wait, so shutdown and timers are honored.
    pub poll_interval: Duration,
    /// Listen backlog for server sockets.
    pub listen_backlog: i32,
    /// Socket receive buffer size in bytes (None = system default).
    /// Corresponds to SO_RCVBUF.
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = system default).
    /// Corresponds to SO_SNDBUF.
    pub socket_send_buffer_size: Option<usize>,
    /// Enable the framing codec at the application boundary.
    pub use_framing: bool,
    /// Append per-frame CRC32 checksums to outbound frames.
    pub framing_crc: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reactor_count: 1,
            worker_count: 4,
            event_batch_size: 64,
            receive_buffer_size: 8 * 1024,
            send_buffer_initial_capacity: 4 * 1024,
            send_buffer_high_watermark: 8 * 1024 * 1024,
            send_buffer_low_watermark: 4 * 1024 * 1024,
            send_buffer_max_capacity: 32 * 1024 * 1024,
            worker_queue_capacity: 10_000,
            mailbox_capacity: 4096,
            lifecycle_enqueue_budget: Duration::from_millis(250),
            message_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            listen_backlog: 128,
            socket_recv_buffer_size: None,
            socket_send_buffer_size: None,
            use_framing: false,
            framing_crc: true,
        }
    }
}

impl Config {
    /// Returns a configuration suited to client endpoints: a single reactor
    /// and a single worker, which keeps callback dispatch strictly ordered.
    pub fn client() -> Self {
        Self { reactor_count: 1, worker_count: 1, ..Self::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_tunables() {
        let config = Config::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.event_batch_size, 64);
        assert_eq!(config.receive_buffer_size, 8 * 1024);
        assert_eq!(config.send_buffer_initial_capacity, 4 * 1024);
        assert_eq!(config.send_buffer_high_watermark, 8 * 1024 * 1024);
        assert_eq!(config.send_buffer_low_watermark, 4 * 1024 * 1024);
        assert_eq!(config.send_buffer_max_capacity, 32 * 1024 * 1024);
        assert_eq!(config.worker_queue_capacity, 10_000);
        assert_eq!(config.message_timeout, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.listen_backlog, 128);
    }

    #[test]
    fn client_config_uses_single_worker() {
        let config = Config::client();
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.reactor_count, 1);
    }
}
