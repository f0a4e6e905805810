//! Simple echo server using Tidewire.
//!
//! Run:
//! - cargo run -p tidewire --example server
//! - cargo run -p tidewire --example server -- 127.0.0.1 7777

use std::{env, sync::Arc, thread, time::Duration};

use tidewire::{Config, Server};

fn parse_bind() -> (String, u16) {
    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.next().and_then(|s| s.parse().ok()).unwrap_or(9000);
    (host, port)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Basic config; tweak here if you want to demo features quickly
    let config = Config::default();
    // Uncomment to try framing:
    // config.use_framing = true;

    let (host, port) = parse_bind();
    let server = Arc::new(Server::with_config(config)?);

    server.set_on_connected(|info| {
        println!("[connect] {}:{} (id {})", info.peer_address, info.peer_port, info.connection_id);
    });

    let echo = Arc::clone(&server);
    server.set_on_message(move |connection_id, payload| {
        let text = String::from_utf8_lossy(payload);
        println!("[message] id={} len={} payload=\"{}\"", connection_id, payload.len(), text);
        if let Err(e) = echo.send(connection_id, payload, Duration::ZERO) {
            eprintln!("failed to queue echo: {}", e);
        }
    });

    server.set_on_disconnected(|connection_id| {
        println!("[disconnect] id={}", connection_id);
    });

    server.set_on_error(|connection_id, error, detail| {
        println!("[error] id={} {}: {}", connection_id, error, detail);
    });

    server.start_ipv4(&host, port)?;
    println!("Tidewire echo server listening on {}:{}", host, port);
    println!("Send from the client example to this address to see echoes.");

    loop {
        thread::sleep(Duration::from_secs(1));
    }
}
