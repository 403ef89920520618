//! mio-based event loop implementation.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).

mod event_loop;

use crate::config::Config;
use crate::error::ServerError;

/// Run the server using the mio backend.
pub fn run(listener: std::net::TcpListener, config: &Config) -> Result<(), ServerError> {
    event_loop::run(listener, config)
}
