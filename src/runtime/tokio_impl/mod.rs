//! Tokio task-per-connection backend.

mod handler;
mod server;

pub use server::run;
