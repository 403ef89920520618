//! chat-echo: a single-threaded TCP echo server
//!
//! Every client gets back exactly the bytes it sent, one chunk (at most
//! 1024 bytes) at a time. Connections are independent of each other.
//!
//! Features:
//! - Lockstep read → echo → read per connection
//! - mio (epoll/kqueue) or current-thread tokio backend
//! - Configuration via CLI arguments or TOML file

mod config;
mod error;
mod runtime;

use config::Config;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    runtime::run(config)?;
    Ok(())
}
