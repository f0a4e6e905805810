#![warn(missing_docs)]

//! tidewire-core: foundational types shared across the runtime.
//!
//! This crate provides the minimal set of types every layer agrees on:
//! - Configuration
//! - Error taxonomy (semantic network errors, protocol violations)
//! - Network events (the only type that crosses the reactor/worker boundary)
//! - Connection identifiers
//!
//! Runtime-specific logic lives in specialized crates:
//! - `tidewire-protocol`: wire framing, fragmentation, CRC32
//! - `tidewire-reactor`: event loop, send buffering, worker pool
//! - `tidewire-host`: server and client facades

/// Configuration options for the runtime.
pub mod config;
/// Connection identifier encoding and decoding.
pub mod connection_id;
/// Error types and results.
pub mod error;
/// Network events and connection metadata.
pub mod event;
