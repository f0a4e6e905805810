#![warn(missing_docs)]

//! tidewire-host: server and client facades.
//!
//! The facades own the runtime pieces (reactors, worker pool, listeners)
//! and translate `NetworkEvent`s into role-appropriate callbacks invoked on
//! worker threads. With framing enabled, inbound bytes pass through a
//! per-connection decoder and callbacks receive whole messages instead of
//! raw segments.

/// Client facade: one reactor, one worker.
pub mod client;
/// Per-connection framing decoders at the application boundary.
pub mod framed;
/// Server facade: listeners, reactor shards, worker pool.
pub mod server;
/// Socket creation and option helpers.
pub mod socket;

pub use client::Client;
pub use server::Server;
