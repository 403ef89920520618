//! Accept loop for the tokio backend.
//!
//! Runs on a current-thread runtime: every connection is a task on the same
//! thread, and the task owns its socket and buffer until it finishes.

use crate::config::Config;
use crate::error::{AcceptError, ServerError};
use crate::runtime::listener::ACCEPT_RETRY_INTERVAL;
use crate::runtime::tokio_impl::handler::handle_connection;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Build a current-thread runtime and run the accept loop on it.
pub fn run(listener: std::net::TcpListener, config: &Config) -> Result<(), ServerError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(serve(listener, config.clone()))
}

/// Accept connections forever, spawning one echo task per connection.
pub async fn serve(listener: std::net::TcpListener, config: Config) -> Result<(), ServerError> {
    let listener = TcpListener::from_std(listener)?;
    let connection_limit = Arc::new(Semaphore::new(config.max_connections));

    info!(
        addr = %listener.local_addr()?,
        max_connections = config.max_connections,
        "Task runtime started"
    );

    loop {
        // Wait for a connection slot
        let permit = connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "New connection");
                let log_messages = config.log_messages;

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, log_messages).await {
                        debug!(peer = %peer, error = %e, "Connection error");
                    }
                    debug!(peer = %peer, "Connection closed");
                    drop(permit);
                });
            }
            Err(e) => recover_from_accept_error(e).await?,
        }
    }
}

/// Decide whether the accept loop can go on after `e`.
///
/// A broken listener is returned as an error. Resource errors back off for
/// `ACCEPT_RETRY_INTERVAL` so the loop does not spin while fds are exhausted.
async fn recover_from_accept_error(e: io::Error) -> Result<(), AcceptError> {
    let err = AcceptError(e);
    if err.is_fatal() {
        return Err(err);
    }
    warn!(error = %err, "Failed to accept connection");

    if !err.is_peer_abort() {
        tokio::time::sleep(ACCEPT_RETRY_INTERVAL).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeType;
    use crate::runtime::listener;
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn start_server() -> SocketAddr {
        start_server_with(16)
    }

    fn start_server_with(max_connections: usize) -> SocketAddr {
        let listener = listener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let config = Config {
            listen: addr,
            runtime: RuntimeType::Tokio,
            max_connections,
            log_level: "info".to_string(),
            log_messages: true,
        };

        tokio::spawn(serve(listener, config));
        addr
    }

    async fn echo(stream: &mut TcpStream, payload: &[u8]) -> Vec<u8> {
        stream.write_all(payload).await.unwrap();
        let mut buf = vec![0u8; payload.len()];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_echo_over_socket() {
        let addr = start_server();
        let mut client = TcpStream::connect(addr).await.unwrap();

        assert_eq!(echo(&mut client, b"hello").await, b"hello");

        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 199) as u8).collect();
        assert_eq!(echo(&mut client, &payload).await, payload);
    }

    #[tokio::test]
    async fn test_clients_are_isolated() {
        let addr = start_server();
        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();

        a.write_all(b"aaaa").await.unwrap();
        b.write_all(b"bbbb").await.unwrap();

        let mut buf = [0u8; 4];
        a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"aaaa");
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"bbbb");
    }

    #[tokio::test]
    async fn test_server_survives_client_close() {
        let addr = start_server();

        let mut first = TcpStream::connect(addr).await.unwrap();
        assert_eq!(echo(&mut first, b"bye").await, b"bye");
        drop(first);

        let mut second = TcpStream::connect(addr).await.unwrap();
        assert_eq!(echo(&mut second, b"next").await, b"next");
    }

    #[tokio::test]
    async fn test_second_bind_leaves_server_running() {
        let addr = start_server();
        let err = listener::bind(addr).unwrap_err();
        assert_eq!(err.addr, addr);

        // The running server keeps serving
        let mut client = TcpStream::connect(addr).await.unwrap();
        assert_eq!(echo(&mut client, b"ok").await, b"ok");
    }

    #[tokio::test]
    async fn test_client_over_limit_waits_for_slot() {
        let addr = start_server_with(1);

        let mut first = TcpStream::connect(addr).await.unwrap();
        assert_eq!(echo(&mut first, b"one").await, b"one");

        // Queued in the kernel backlog until the first client leaves
        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(b"wait").await.unwrap();

        let mut buf = [0u8; 4];
        let pending = tokio::time::timeout(Duration::from_millis(200), second.read(&mut buf)).await;
        assert!(pending.is_err(), "second client served while the slot was taken");

        drop(first);

        tokio::time::timeout(Duration::from_secs(5), second.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"wait");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_broken_listener_is_fatal() {
        let err = recover_from_accept_error(io::Error::from_raw_os_error(libc::EBADF))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fd_exhaustion_backs_off() {
        let start = Instant::now();
        recover_from_accept_error(io::Error::from_raw_os_error(libc::EMFILE))
            .await
            .unwrap();
        assert!(start.elapsed() >= ACCEPT_RETRY_INTERVAL);
    }

    #[tokio::test]
    async fn test_peer_abort_retries_immediately() {
        let start = Instant::now();
        recover_from_accept_error(io::Error::from(io::ErrorKind::ConnectionAborted))
            .await
            .unwrap();
        assert!(start.elapsed() < ACCEPT_RETRY_INTERVAL);
    }
}
