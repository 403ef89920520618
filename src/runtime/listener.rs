//! Listening socket creation shared by both backends.

use crate::error::BindError;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

const BACKLOG: i32 = 1024;

/// How long an accept loop waits before retrying after a resource error
/// (fd exhaustion, out of buffers).
pub const ACCEPT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Create a non-blocking TCP listener bound to `addr`.
///
/// `SO_REUSEADDR` lets a restarted server rebind past `TIME_WAIT`.
/// `SO_REUSEPORT` is left off, so a second listener on a live port fails.
pub fn bind(addr: SocketAddr) -> Result<TcpListener, BindError> {
    create_listener(addr).map_err(|source| BindError { addr, source })
}

fn create_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = bind(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_second_bind_fails() {
        let first = bind(loopback()).unwrap();
        let addr = first.local_addr().unwrap();

        let err = bind(addr).unwrap_err();
        assert_eq!(err.addr, addr);
        assert_eq!(err.source.kind(), std::io::ErrorKind::AddrInUse);

        // The first listener is unaffected
        assert_eq!(first.local_addr().unwrap(), addr);
        let client = std::net::TcpStream::connect(addr).unwrap();
        drop(client);
    }
}
