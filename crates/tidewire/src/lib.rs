#![warn(missing_docs)]

//! Tidewire: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports the most
//! commonly used types to build reactor-based TCP and Unix-domain socket
//! applications:
//!
//! - Server and client endpoints (`Server`, `Client`)
//! - Core configuration (`Config`)
//! - Events and errors (`NetworkEvent`, `ConnectionInfo`, `NetworkError`)
//! - The framing codec (`Encoder`, `Decoder`, frame types)
//!
//! Example
//! ```ignore
//! use std::time::Duration;
//! use tidewire::{Client, Server};
//!
//! let server = Server::new().unwrap();
//! server.set_on_message(|connection_id, _payload| {
//!     println!("message on connection {}", connection_id);
//! });
//! server.start_ipv4("127.0.0.1", 9000).unwrap();
//!
//! let client = Client::new().unwrap();
//! client.connect_ipv4("127.0.0.1", 9000).unwrap();
//! assert!(client.wait_connected(Duration::from_secs(2)));
//! client.send(b"hello", Duration::ZERO).unwrap();
//! ```

// Core config, errors and events
pub use tidewire_core::config::Config;
pub use tidewire_core::error::{ErrorKind, NetworkError, ProtocolViolationKind, Result};
pub use tidewire_core::event::{ConnectionInfo, NetworkEvent, PeerAddr};
// Facades: server and client endpoints
pub use tidewire_host::{Client, Server};
// Protocol: framing codec
pub use tidewire_protocol::{
    CompletedMessage, Decoder, DecoderStats, Encoder, Frame, FrameHeader, FrameType, StreamEvent,
};
// Engine pieces, for embedders composing their own facade
pub use tidewire_reactor::{Reactor, WorkerPool};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        Client, Config, ConnectionInfo, Decoder, Encoder, ErrorKind, NetworkError, NetworkEvent,
        Result, Server, StreamEvent,
    };
}
