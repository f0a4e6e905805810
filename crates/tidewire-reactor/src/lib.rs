#![warn(missing_docs)]

//! tidewire-reactor: the event-driven I/O engine.
//!
//! A [`reactor::Reactor`] is a single-threaded event loop that exclusively
//! owns a set of sockets: it is the only code that reads from or writes to
//! them. Readiness comes from an [`io_monitor::IoMonitor`] (a thin
//! kqueue/epoll abstraction), outbound bytes are staged in per-connection
//! [`send_buffer::SendBuffer`]s, and every observable outcome crosses to the
//! [`worker_pool::WorkerPool`] as a value-only `NetworkEvent`.
//!
//! Cross-thread requests (sends, disconnects, queries) enter through a
//! bounded action mailbox and are executed on the reactor thread, so no
//! lock ever guards connection state.

/// Per-connection state owned by the reactor thread.
mod connection;
/// Readiness polling abstraction over kqueue/epoll.
pub mod io_monitor;
/// Cross-thread action mailbox.
pub mod mailbox;
/// The reactor event loop.
pub mod reactor;
/// Per-connection outbound byte buffer.
pub mod send_buffer;
/// Sharded worker pool dispatching the application callback.
pub mod worker_pool;

pub use mailbox::SendCompletion;
pub use reactor::Reactor;
pub use worker_pool::WorkerPool;
