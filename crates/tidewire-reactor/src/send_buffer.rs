//! Per-connection outbound byte buffer.
//!
//! A linear buffer managed by read/write positions rather than a ring.
//! Invariants: `read_pos <= write_pos <= capacity`; after a full drain both
//! positions reset to zero; the buffer compacts once the read position
//! passes half the capacity, and grows by doubling up to a hard cap.
//!
//! Only the owning reactor thread ever touches a send buffer.

use std::io;

use socket2::Socket;

use tidewire_core::config::Config;

#[cfg(target_os = "linux")]
const SEND_FLAGS: i32 = libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL;
#[cfg(not(target_os = "linux"))]
const SEND_FLAGS: i32 = libc::MSG_DONTWAIT;

/// Linear send buffer with watermark-based congestion signalling.
#[derive(Debug)]
pub struct SendBuffer {
    buffer: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    high_watermark: usize,
    low_watermark: usize,
    max_capacity: usize,
}

impl SendBuffer {
    /// Creates a buffer with explicit capacity and watermark settings.
    pub fn new(initial: usize, high: usize, low: usize, max: usize) -> Self {
        Self {
            buffer: vec![0; initial],
            read_pos: 0,
            write_pos: 0,
            high_watermark: high,
            low_watermark: low,
            max_capacity: max,
        }
    }

    /// Creates a buffer from the runtime configuration.
    pub fn with_config(config: &Config) -> Self {
        Self::new(
            config.send_buffer_initial_capacity,
            config.send_buffer_high_watermark,
            config.send_buffer_low_watermark,
            config.send_buffer_max_capacity,
        )
    }

    /// Appends bytes, compacting and growing as needed. Returns `false`
    /// when the bytes do not fit even at maximum capacity.
    pub fn write(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        if !self.ensure_writable_space(data.len()) {
            return false;
        }
        self.buffer[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
        true
    }

    /// Flushes as much buffered data to the socket as the kernel accepts.
    ///
    /// Returns the number of bytes handed to the kernel; `Ok(0)` means
    /// "try later" (nothing buffered, or the socket would block). Any other
    /// error is fatal for the connection.
    pub fn send_to_socket(&mut self, socket: &Socket) -> io::Result<usize> {
        let readable = self.len();
        if readable == 0 {
            return Ok(0);
        }

        match socket.send_with_flags(&self.buffer[self.read_pos..self.write_pos], SEND_FLAGS) {
            Ok(sent) => {
                self.read_pos += sent;
                if self.read_pos == self.write_pos {
                    self.read_pos = 0;
                    self.write_pos = 0;
                } else if self.read_pos > self.buffer.len() / 2 {
                    self.compact();
                }
                Ok(sent)
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    /// Moves unread bytes to the start of the buffer.
    pub fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        let readable = self.len();
        self.buffer.copy_within(self.read_pos..self.write_pos, 0);
        self.read_pos = 0;
        self.write_pos = readable;
    }

    /// Number of buffered, unsent bytes.
    pub fn len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// True when no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// Current underlying capacity.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// True when the buffered amount has reached the high watermark and the
    /// connection should be treated as congested.
    pub fn is_above_high_watermark(&self) -> bool {
        self.len() >= self.high_watermark
    }

    /// True when the buffered amount has fallen below the low watermark and
    /// a congested connection may resume.
    pub fn is_below_low_watermark(&self) -> bool {
        self.len() < self.low_watermark
    }

    /// Discards all buffered bytes.
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    fn ensure_writable_space(&mut self, size: usize) -> bool {
        if self.buffer.len() - self.write_pos >= size {
            return true;
        }

        // Reclaim the dead prefix before considering growth.
        if self.read_pos > 0 {
            self.compact();
            if self.buffer.len() - self.write_pos >= size {
                return true;
            }
        }

        let required = self.write_pos + size;
        if required > self.max_capacity {
            return false;
        }

        let mut new_capacity = self.buffer.len().max(1);
        while new_capacity < required {
            new_capacity *= 2;
        }
        self.buffer.resize(new_capacity.min(self.max_capacity), 0);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::os::unix::net::UnixStream;

    use super::*;

    fn small_buffer() -> SendBuffer {
        SendBuffer::new(16, 64, 32, 256)
    }

    #[test]
    fn write_then_drain_resets_positions() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let socket = Socket::from(a);

        let mut buffer = small_buffer();
        assert!(buffer.write(b"hello"));
        assert_eq!(buffer.len(), 5);

        let sent = buffer.send_to_socket(&socket).unwrap();
        assert_eq!(sent, 5);
        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);

        let mut received = [0u8; 5];
        b.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"hello");
    }

    #[test]
    fn grows_by_doubling_up_to_max() {
        let mut buffer = small_buffer();
        assert_eq!(buffer.capacity(), 16);
        assert!(buffer.write(&[0u8; 20]));
        assert_eq!(buffer.capacity(), 32);
        assert!(buffer.write(&[0u8; 200]));
        assert!(buffer.capacity() <= 256);
    }

    #[test]
    fn rejects_writes_beyond_max_capacity() {
        let mut buffer = small_buffer();
        assert!(buffer.write(&[0u8; 256]));
        assert!(!buffer.write(&[0u8; 1]));
        // The failed write leaves the buffer untouched.
        assert_eq!(buffer.len(), 256);
    }

    #[test]
    fn compaction_reclaims_consumed_prefix() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let socket = Socket::from(a);

        let mut buffer = small_buffer();
        assert!(buffer.write(&[1u8; 12]));

        // Drain a few bytes on the peer side to advance read_pos.
        let sent = buffer.send_to_socket(&socket).unwrap();
        assert_eq!(sent, 12);
        let mut sink = [0u8; 12];
        b.read_exact(&mut sink).unwrap();

        assert!(buffer.write(&[2u8; 14]));
        buffer.compact();
        assert_eq!(buffer.len(), 14);
    }

    #[test]
    fn would_block_reports_zero() {
        let (a, _b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let socket = Socket::from(a);

        let mut buffer = SendBuffer::new(4096, 1 << 20, 1 << 19, 1 << 24);
        let chunk = vec![7u8; 64 * 1024];

        // Fill the kernel buffer until the socket stops accepting bytes.
        let mut stalled = false;
        for _ in 0..64 {
            assert!(buffer.write(&chunk));
            buffer.send_to_socket(&socket).unwrap();
            if !buffer.is_empty() {
                let sent = buffer.send_to_socket(&socket).unwrap();
                if sent == 0 {
                    stalled = true;
                    break;
                }
            }
        }
        assert!(stalled, "expected the unread peer to exert backpressure");
        assert!(buffer.len() > 0);
    }

    #[test]
    fn watermarks_track_buffered_size() {
        let mut buffer = SendBuffer::new(16, 64, 32, 256);
        assert!(!buffer.is_above_high_watermark());
        assert!(buffer.is_below_low_watermark());

        assert!(buffer.write(&[0u8; 64]));
        assert!(buffer.is_above_high_watermark());
        assert!(!buffer.is_below_low_watermark());

        buffer.clear();
        assert!(buffer.is_below_low_watermark());
        assert!(buffer.is_empty());
    }

    #[test]
    fn closed_peer_is_a_hard_error() {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let socket = Socket::from(a);
        drop(b);

        let mut buffer = small_buffer();
        assert!(buffer.write(b"doomed"));
        // The first send may succeed into the kernel buffer; the following
        // ones must surface the broken pipe.
        let mut failed = false;
        for _ in 0..4 {
            assert!(buffer.write(b"doomed"));
            if buffer.send_to_socket(&socket).is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed, "writing to a closed peer should fail");
    }
}
