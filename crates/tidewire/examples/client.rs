//! Simple client for the echo server example.
//!
//! Run:
//! - cargo run -p tidewire --example client
//! - cargo run -p tidewire --example client -- 127.0.0.1 7777

use std::{env, thread, time::Duration};

use tidewire::Client;

fn parse_target() -> (String, u16) {
    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.next().and_then(|s| s.parse().ok()).unwrap_or(9000);
    (host, port)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (host, port) = parse_target();
    let client = Client::new()?;

    client.set_on_connected(|info| {
        println!("[connected] {}:{}", info.peer_address, info.peer_port);
    });
    client.set_on_message(|payload| {
        println!("[echo] \"{}\"", String::from_utf8_lossy(payload));
    });
    client.set_on_disconnected(|| {
        println!("[disconnected]");
    });
    client.set_on_error(|error, detail| {
        println!("[error] {}: {}", error, detail);
    });

    client.connect_ipv4(&host, port)?;
    if !client.wait_connected(Duration::from_secs(3)) {
        eprintln!("could not connect to {}:{}", host, port);
        return Ok(());
    }

    for i in 0..5 {
        let message = format!("hello #{}", i);
        client.send(message.as_bytes(), Duration::from_secs(1))?;
        thread::sleep(Duration::from_millis(200));
    }

    // Let the last echo arrive, then drain and leave.
    thread::sleep(Duration::from_millis(300));
    let clean = client.graceful_shutdown(Duration::from_secs(5));
    println!("shutdown clean: {}", clean);
    Ok(())
}
