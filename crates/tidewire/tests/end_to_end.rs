//! End-to-end tests driving real sockets through the full stack:
//! listener -> reactor -> worker pool -> facade callbacks.

use std::{
    io::{Read, Write},
    net::TcpListener,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::bounded;
use tidewire::{Client, Config, Server};

fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn tcp_echo_round_trip() {
    let server = Arc::new(Server::new().unwrap());
    let echo = Arc::clone(&server);
    server.set_on_message(move |connection_id, payload| {
        echo.send(connection_id, payload, Duration::ZERO).unwrap();
    });
    server.start_ipv4("127.0.0.1", 9988).unwrap();

    let client = Client::new().unwrap();
    let received = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
    let received_cb = Arc::clone(&received);
    client.set_on_message(move |payload| {
        received_cb.lock().unwrap().push(payload.to_vec());
    });

    client.connect_ipv4("127.0.0.1", 9988).unwrap();
    assert!(client.wait_connected(Duration::from_secs(5)));

    client.send(b"Hello from Client", Duration::from_secs(2)).unwrap();

    assert!(wait_until(Duration::from_secs(5), || !received.lock().unwrap().is_empty()));
    // Give any stray duplicate a moment to show up, then assert exactly one
    // callback invocation carrying exactly the 17 bytes.
    thread::sleep(Duration::from_millis(200));
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0], b"Hello from Client");
    drop(received);

    client.disconnect();
    server.stop();
}

#[test]
fn framed_message_crosses_segment_boundaries() {
    let mut config = Config::default();
    config.use_framing = true;

    let server = Arc::new(Server::with_config(config).unwrap());
    let (message_tx, message_rx) = bounded::<(u64, Vec<u8>)>(4);
    server.set_on_message(move |connection_id, payload| {
        let _ = message_tx.send((connection_id, payload.to_vec()));
    });
    server.start_ipv4("127.0.0.1", 9989).unwrap();

    let mut client_config = Config::client();
    client_config.use_framing = true;
    let client = Client::with_config(client_config).unwrap();
    client.connect_ipv4("127.0.0.1", 9989).unwrap();
    assert!(client.wait_connected(Duration::from_secs(5)));

    // 300 KiB fragments into two frames and many TCP segments.
    let payload = vec![0xAB; 300 * 1024];
    client.send_message(42, &payload).unwrap();

    let (_, data) = message_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(data.len(), 307_200);
    assert!(data.iter().all(|&b| b == 0xAB));

    // Nothing else arrives.
    assert!(message_rx.recv_timeout(Duration::from_millis(300)).is_err());

    client.disconnect();
    server.stop();
}

#[test]
fn server_echoes_framed_messages_back() {
    let mut config = Config::default();
    config.use_framing = true;

    let server = Arc::new(Server::with_config(config).unwrap());
    let echo = Arc::clone(&server);
    server.set_on_message(move |connection_id, payload| {
        echo.send_message(connection_id, 7, payload).unwrap();
    });
    server.start_ipv4("127.0.0.1", 9991).unwrap();

    let mut client_config = Config::client();
    client_config.use_framing = true;
    let client = Client::with_config(client_config).unwrap();
    let (echo_tx, echo_rx) = bounded::<Vec<u8>>(1);
    client.set_on_message(move |payload| {
        let _ = echo_tx.send(payload.to_vec());
    });
    client.connect_ipv4("127.0.0.1", 9991).unwrap();
    assert!(client.wait_connected(Duration::from_secs(5)));

    client.send_message(1, b"framed ping").unwrap();
    let echoed = echo_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(echoed, b"framed ping");

    client.disconnect();
    server.stop();
}

#[test]
fn graceful_shutdown_drains_buffered_megabyte() {
    let received_bytes = Arc::new(AtomicUsize::new(0));

    let server = Arc::new(Server::new().unwrap());
    let counter = Arc::clone(&received_bytes);
    server.set_on_message(move |_, payload| {
        counter.fetch_add(payload.len(), Ordering::SeqCst);
    });
    server.start_ipv4("127.0.0.1", 9990).unwrap();

    let client = Client::new().unwrap();
    client.connect_ipv4("127.0.0.1", 9990).unwrap();
    assert!(client.wait_connected(Duration::from_secs(5)));

    // Buffer 1 MiB without waiting for the flush.
    let chunk = vec![0x5A; 64 * 1024];
    for _ in 0..16 {
        client.send(&chunk, Duration::ZERO).unwrap();
    }

    assert!(client.graceful_shutdown(Duration::from_secs(5)));
    assert!(!client.is_connected());

    assert!(wait_until(Duration::from_secs(5), || {
        received_bytes.load(Ordering::SeqCst) == 1024 * 1024
    }));

    server.stop();
}

#[test]
fn unix_domain_echo_and_path_unlink() {
    let path = std::env::temp_dir().join(format!("tidewire-e2e-{}.sock", std::process::id()));
    let path = path.to_str().unwrap().to_string();

    let server = Arc::new(Server::new().unwrap());
    let echo = Arc::clone(&server);
    server.set_on_message(move |connection_id, payload| {
        echo.send(connection_id, payload, Duration::ZERO).unwrap();
    });
    server.start_unix(&path).unwrap();
    assert!(std::path::Path::new(&path).exists());

    let client = Client::new().unwrap();
    let (echo_tx, echo_rx) = bounded::<Vec<u8>>(1);
    client.set_on_message(move |payload| {
        let _ = echo_tx.send(payload.to_vec());
    });
    client.connect_unix(&path).unwrap();
    assert!(client.wait_connected(Duration::from_secs(5)));

    client.send(b"over unix", Duration::from_secs(2)).unwrap();
    assert_eq!(echo_rx.recv_timeout(Duration::from_secs(5)).unwrap(), b"over unix");

    client.disconnect();
    server.stop();

    // The socket path is unlinked after stop.
    assert!(!std::path::Path::new(&path).exists());
}

#[test]
fn server_stop_is_idempotent() {
    let server = Server::new().unwrap();
    server.start_ipv4("127.0.0.1", 9992).unwrap();
    server.stop();
    server.stop();

    // Starting after stop is rejected rather than half-working.
    assert!(server.start_ipv4("127.0.0.1", 9992).is_err());
}

#[test]
fn client_observes_disconnect_when_server_stops() {
    let server = Arc::new(Server::new().unwrap());
    server.start_ipv4("127.0.0.1", 9993).unwrap();

    let client = Client::new().unwrap();
    let disconnected = Arc::new(AtomicBool::new(false));
    let disconnected_cb = Arc::clone(&disconnected);
    client.set_on_disconnected(move || {
        disconnected_cb.store(true, Ordering::SeqCst);
    });
    client.connect_ipv4("127.0.0.1", 9993).unwrap();
    assert!(client.wait_connected(Duration::from_secs(5)));

    server.stop();

    assert!(wait_until(Duration::from_secs(5), || disconnected.load(Ordering::SeqCst)));
    assert!(!client.is_connected());
}

#[test]
fn connect_to_closed_port_reports_error() {
    let client = Client::new().unwrap();
    let (error_tx, error_rx) = bounded(1);
    client.set_on_error(move |error, _detail| {
        let _ = error_tx.send(error);
    });

    // Nothing listens on this port. Loopback may refuse synchronously or
    // asynchronously; both must leave the client disconnected.
    if client.connect_ipv4("127.0.0.1", 9).is_ok() {
        assert!(!client.wait_connected(Duration::from_secs(5)));
        let error = error_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(error, tidewire::NetworkError::ConnectionRefused);
    }
    assert!(!client.is_connected());
}

#[test]
fn backpressure_congestion_and_writable_again() {
    // A raw peer that accepts but does not read, so the client's send
    // buffer fills past the high watermark.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = Config::client();
    // Keep the kernel's contribution tiny so buffering happens in the
    // client's send buffer where the watermarks live.
    config.socket_send_buffer_size = Some(16 * 1024);
    let client = Client::with_config(config).unwrap();

    let writable_again = Arc::new(AtomicBool::new(false));
    let writable_cb = Arc::clone(&writable_again);
    client.set_on_writable(move || {
        writable_cb.store(true, Ordering::SeqCst);
    });

    client.connect_ipv4("127.0.0.1", port).unwrap();
    let (mut peer, _) = listener.accept().unwrap();
    assert!(client.wait_connected(Duration::from_secs(5)));

    // Queue 10 MiB in 1 KiB chunks; retry briefly when the mailbox fills.
    let chunk = vec![0xEE; 1024];
    for _ in 0..(10 * 1024) {
        while !client.send_async(chunk.clone(), |_, _| {}) {
            thread::sleep(Duration::from_millis(1));
        }
    }

    // The buffer grows monotonically past the high watermark while the
    // peer refuses to drain.
    assert!(wait_until(Duration::from_secs(10), || {
        client.send_buffer_size().unwrap_or(0) >= 8 * 1024 * 1024
    }));
    let first = client.send_buffer_size().unwrap();
    thread::sleep(Duration::from_millis(100));
    let second = client.send_buffer_size().unwrap();
    assert!(second >= first.saturating_sub(32 * 1024));
    assert!(!writable_again.load(Ordering::SeqCst));

    // Drain the peer; the client crosses the low watermark and signals
    // writable-again, eventually emptying completely.
    let drainer = thread::spawn(move || {
        let mut sink = vec![0u8; 64 * 1024];
        let mut total = 0usize;
        while total < 10 * 1024 * 1024 {
            match peer.read(&mut sink) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(_) => break,
            }
        }
        total
    });

    assert!(wait_until(Duration::from_secs(30), || writable_again.load(Ordering::SeqCst)));
    assert!(wait_until(Duration::from_secs(30), || {
        client.send_buffer_size().unwrap_or(0) == 0
    }));

    client.disconnect();
    let drained = drainer.join().unwrap();
    assert_eq!(drained, 10 * 1024 * 1024);
}

#[test]
fn raw_peer_sees_exact_bytes() {
    // Bypass the client: talk to the server with a plain TcpStream to pin
    // down the wire behavior.
    let server = Arc::new(Server::new().unwrap());
    let echo = Arc::clone(&server);
    server.set_on_message(move |connection_id, payload| {
        echo.send(connection_id, payload, Duration::ZERO).unwrap();
    });
    server.start_ipv4("127.0.0.1", 9994).unwrap();

    let mut stream = std::net::TcpStream::connect("127.0.0.1:9994").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(b"raw bytes").unwrap();

    let mut received = [0u8; 9];
    stream.read_exact(&mut received).unwrap();
    assert_eq!(&received, b"raw bytes");

    server.stop();
}
