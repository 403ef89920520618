//! Single-threaded runtimes for the echo server.
//!
//! Two interchangeable backends:
//! - `mio_impl`: readiness-based poll loop (epoll on Linux, kqueue on macOS)
//! - `tokio_impl`: current-thread tokio runtime, one task per connection
//!
//! Both share common pieces:
//! - `listener`: socket creation and bind errors
//! - `ChatMessage`: the fixed 1024-byte per-connection buffer
//! - `Connection`: lockstep read/write state machine (mio backend)

mod buffer;
mod connection;
mod listener;
mod mio_impl;
mod tokio_impl;

use buffer::MAX_LENGTH;
use crate::config::{Config, RuntimeType};
use crate::error::ServerError;
use tracing::info;

/// Bind the listener and run the configured backend until a fatal error.
pub fn run(config: Config) -> Result<(), ServerError> {
    let listener = listener::bind(config.listen)?;

    info!(
        addr = %config.listen,
        runtime = ?config.runtime,
        chunk_size = MAX_LENGTH,
        "Chat server started on port {}",
        config.listen.port()
    );

    match config.runtime {
        RuntimeType::Mio => mio_impl::run(listener, &config),
        RuntimeType::Tokio => tokio_impl::run(listener, &config),
    }
}
