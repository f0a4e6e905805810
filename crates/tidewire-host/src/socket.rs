//! Socket creation and option helpers.
//!
//! All sockets the facades hand to a reactor are created here: listeners
//! get `SO_REUSEADDR`, everything is non-blocking, and TCP streams carry
//! `TCP_NODELAY` and `SO_KEEPALIVE`. Host strings are parsed numerically
//! only; name resolution is out of scope.

use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Once,
};

use socket2::{Domain, SockAddr, Socket, Type};

use tidewire_core::{
    config::Config,
    error::{ErrorKind, Result},
};

/// Ignores `SIGPIPE` process-wide so writes to a peer-closed socket fail
/// with `EPIPE` instead of killing the process. Installed once, on first
/// facade construction.
pub fn ignore_sigpipe() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    });
}

/// Parses a numeric IPv4 host into a socket address.
pub fn parse_ipv4(host: &str, port: u16) -> Result<SocketAddr> {
    let ip: Ipv4Addr =
        host.parse().map_err(|_| ErrorKind::InvalidAddress(host.to_string()))?;
    Ok(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Parses a numeric IPv6 host into a socket address.
pub fn parse_ipv6(host: &str, port: u16) -> Result<SocketAddr> {
    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    let ip: Ipv6Addr =
        trimmed.parse().map_err(|_| ErrorKind::InvalidAddress(host.to_string()))?;
    Ok(SocketAddr::new(IpAddr::V6(ip), port))
}

/// Creates a bound, listening, non-blocking TCP socket with
/// `SO_REUSEADDR`. For dual-stack listeners pass `only_v6 = Some(false)`.
pub fn tcp_listener(addr: SocketAddr, backlog: i32, only_v6: Option<bool>) -> Result<Socket> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    if let Some(only) = only_v6 {
        socket.set_only_v6(only)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket)
}

/// Creates a bound, listening, non-blocking Unix-domain socket. A stale
/// socket file from a previous run is unlinked before bind; over-long
/// paths are rejected.
pub fn unix_listener(path: &str, backlog: i32) -> Result<Socket> {
    let sockaddr = unix_sockaddr(path)?;
    let _ = std::fs::remove_file(path);
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    socket.bind(&sockaddr)?;
    socket.listen(backlog)?;
    Ok(socket)
}

/// Builds a Unix-domain socket address, rejecting paths longer than the
/// platform's `sun_path`.
pub fn unix_sockaddr(path: &str) -> Result<SockAddr> {
    SockAddr::unix(path).map_err(|_| ErrorKind::PathTooLong(path.to_string()))
}

/// Creates a non-blocking stream socket for an outbound connect.
pub fn stream_socket(domain: Domain) -> Result<Socket> {
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Applies the per-stream options the runtime requires: non-blocking mode,
/// `TCP_NODELAY`/`SO_KEEPALIVE` for TCP, and any configured kernel buffer
/// sizes.
pub fn apply_stream_options(socket: &Socket, config: &Config, is_tcp: bool) -> io::Result<()> {
    socket.set_nonblocking(true)?;
    if is_tcp {
        socket.set_nodelay(true)?;
        socket.set_keepalive(true)?;
    }
    if let Some(size) = config.socket_recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    if let Some(size) = config.socket_send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }
    Ok(())
}

/// Starts a non-blocking connect, tolerating the in-progress result.
pub fn begin_connect(socket: &Socket, addr: &SockAddr) -> Result<()> {
    match socket.connect(addr) {
        Ok(()) => Ok(()),
        Err(err)
            if err.raw_os_error() == Some(libc::EINPROGRESS)
                || err.kind() == io::ErrorKind::WouldBlock =>
        {
            Ok(())
        }
        Err(err) => Err(ErrorKind::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_hosts_only() {
        assert!(parse_ipv4("127.0.0.1", 80).is_ok());
        assert!(parse_ipv4("localhost", 80).is_err());
        assert!(parse_ipv6("::1", 80).is_ok());
        assert!(parse_ipv6("[::1]", 80).is_ok());
        assert!(parse_ipv6("example.com", 80).is_err());
    }

    #[test]
    fn over_long_unix_path_is_rejected() {
        let path = format!("/tmp/{}", "x".repeat(200));
        assert!(matches!(unix_sockaddr(&path), Err(ErrorKind::PathTooLong(_))));
    }

    #[test]
    fn listener_binds_ephemeral_port() {
        let listener =
            tcp_listener(parse_ipv4("127.0.0.1", 0).unwrap(), 16, None).unwrap();
        let local = listener.local_addr().unwrap();
        assert!(local.as_socket().unwrap().port() > 0);
    }

    #[test]
    fn unix_listener_creates_and_replaces_socket_file() {
        let path = std::env::temp_dir().join(format!("tidewire-sock-{}", std::process::id()));
        let path = path.to_str().unwrap().to_string();

        let first = unix_listener(&path, 8).unwrap();
        drop(first);
        // The stale file is silently replaced.
        let second = unix_listener(&path, 8).unwrap();
        drop(second);
        let _ = std::fs::remove_file(&path);
    }
}
