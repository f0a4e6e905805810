//! Readiness polling abstraction.
//!
//! [`IoMonitor`] wraps `mio::Poll` (kqueue on Darwin/BSD, epoll on Linux)
//! behind four operations: watch a descriptor for read or write readiness,
//! stop watching it, and wait for events with a bounded timeout. Interests
//! are tracked per descriptor so direction changes translate to the right
//! register/reregister/deregister call, and both watch directions are
//! idempotent.
//!
//! `EINTR` from the kernel is swallowed and reported as "no events"; callers
//! simply poll again on the next loop iteration.

use std::{
    collections::HashMap,
    io,
    os::fd::RawFd,
    sync::Arc,
    time::Duration,
};

use mio::{unix::SourceFd, Events, Interest, Poll, Token, Waker};

/// Token reserved for the cross-thread waker.
const WAKE_TOKEN: Token = Token(usize::MAX);

/// One descriptor's readiness, as reported by a poll wait.
#[derive(Debug, Clone, Copy)]
pub struct Ready {
    /// The ready descriptor.
    pub fd: RawFd,
    /// Readable (data or EOF pending).
    pub readable: bool,
    /// Writable.
    pub writable: bool,
    /// Peer hangup observed by the kernel.
    pub closed: bool,
    /// Error condition flagged on the descriptor.
    pub error: bool,
}

/// Thin poller over the platform's readiness facility.
pub struct IoMonitor {
    poll: Poll,
    events: Events,
    interests: HashMap<RawFd, Interest>,
    waker: Arc<Waker>,
}

impl IoMonitor {
    /// Creates the underlying kernel handle.
    pub fn new(event_batch_size: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(event_batch_size),
            interests: HashMap::new(),
            waker,
        })
    }

    /// Returns a handle other threads may use to interrupt [`Self::wait`].
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Starts (or keeps) watching `fd` for read readiness.
    pub fn watch_readable(&mut self, fd: RawFd) -> io::Result<()> {
        self.add_interest(fd, Interest::READABLE)
    }

    /// Starts (or keeps) watching `fd` for write readiness.
    pub fn watch_writable(&mut self, fd: RawFd) -> io::Result<()> {
        self.add_interest(fd, Interest::WRITABLE)
    }

    /// Stops watching `fd` for write readiness, keeping any read interest.
    pub fn unwatch_writable(&mut self, fd: RawFd) -> io::Result<()> {
        let Some(&current) = self.interests.get(&fd) else {
            return Ok(());
        };
        match current.remove(Interest::WRITABLE) {
            Some(remaining) => {
                self.poll
                    .registry()
                    .reregister(&mut SourceFd(&fd), Token(fd as usize), remaining)?;
                self.interests.insert(fd, remaining);
            }
            None => return self.unwatch(fd),
        }
        Ok(())
    }

    /// Stops watching `fd` entirely. Safe to call for unknown descriptors.
    pub fn unwatch(&mut self, fd: RawFd) -> io::Result<()> {
        if self.interests.remove(&fd).is_some() {
            self.poll.registry().deregister(&mut SourceFd(&fd))?;
        }
        Ok(())
    }

    fn add_interest(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        match self.interests.get(&fd) {
            None => {
                self.poll
                    .registry()
                    .register(&mut SourceFd(&fd), Token(fd as usize), interest)?;
                self.interests.insert(fd, interest);
            }
            Some(&current) => {
                let combined = current.add(interest);
                if combined != current {
                    self.poll
                        .registry()
                        .reregister(&mut SourceFd(&fd), Token(fd as usize), combined)?;
                    self.interests.insert(fd, combined);
                }
            }
        }
        Ok(())
    }

    /// Blocks up to `timeout` for readiness events, appending them to `out`.
    /// Returns the number of ready descriptors; zero on timeout, wakeup or
    /// signal interruption.
    pub fn wait(&mut self, out: &mut Vec<Ready>, timeout: Option<Duration>) -> io::Result<usize> {
        out.clear();
        if let Err(err) = self.poll.poll(&mut self.events, timeout) {
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        for event in self.events.iter() {
            if event.token() == WAKE_TOKEN {
                continue;
            }
            out.push(Ready {
                fd: event.token().0 as RawFd,
                readable: event.is_readable(),
                writable: event.is_writable(),
                closed: event.is_read_closed() || event.is_write_closed(),
                error: event.is_error(),
            });
        }
        Ok(out.len())
    }
}
