//! Server error types.

use std::io;
use std::net::SocketAddr;

/// The listening socket could not be created.
#[derive(Debug)]
pub struct BindError {
    pub addr: SocketAddr,
    pub source: io::Error,
}

impl std::fmt::Display for BindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to bind {}: {}", self.addr, self.source)
    }
}

impl std::error::Error for BindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// A failed `accept` on the listening socket.
#[derive(Debug)]
pub struct AcceptError(pub io::Error);

impl AcceptError {
    /// Whether the listening socket itself is broken.
    ///
    /// Anything else (aborted handshakes, fd exhaustion, ...) is transient
    /// and the accept loop keeps going.
    pub fn is_fatal(&self) -> bool {
        #[cfg(unix)]
        {
            matches!(
                self.0.raw_os_error(),
                Some(libc::EBADF | libc::ENOTSOCK | libc::EINVAL | libc::EOPNOTSUPP | libc::EFAULT)
            )
        }

        #[cfg(not(unix))]
        {
            self.0.kind() == io::ErrorKind::InvalidInput
        }
    }

    /// The peer dropped the handshake before we took it. The rest of the
    /// accept queue is unaffected, so accepting can resume immediately.
    pub fn is_peer_abort(&self) -> bool {
        matches!(
            self.0.kind(),
            io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
        )
    }
}

impl std::fmt::Display for AcceptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Accept failed: {}", self.0)
    }
}

impl std::error::Error for AcceptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

/// An I/O failure on a client connection. Ends that connection only.
#[derive(Debug)]
pub enum ConnectionError {
    Read(io::Error),
    Write(io::Error),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Read(e) => write!(f, "Read failed: {}", e),
            ConnectionError::Write(e) => write!(f, "Write failed: {}", e),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Read(e) | ConnectionError::Write(e) => Some(e),
        }
    }
}

/// Errors that stop the server.
#[derive(Debug)]
pub enum ServerError {
    Bind(BindError),
    Accept(AcceptError),
    /// Poller or runtime setup/IO failure.
    Io(io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind(e) => e.fmt(f),
            ServerError::Accept(e) => e.fmt(f),
            ServerError::Io(e) => write!(f, "Runtime error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind(e) => Some(e),
            ServerError::Accept(e) => Some(e),
            ServerError::Io(e) => Some(e),
        }
    }
}

impl From<BindError> for ServerError {
    fn from(err: BindError) -> Self {
        ServerError::Bind(err)
    }
}

impl From<AcceptError> for ServerError {
    fn from(err: AcceptError) -> Self {
        ServerError::Accept(err)
    }
}

impl From<io::Error> for ServerError {
    fn from(err: io::Error) -> Self {
        ServerError::Io(err)
    }
}
