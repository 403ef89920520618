//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! One thread owns the poller, the listener and every connection. The slab
//! slot of a connection is its poll token, so the connection lives exactly
//! as long as it is registered with the poller.
//!
//! Readiness is edge-triggered. Two kinds of work therefore survive a poll
//! round without a new event: a listener whose queue could not be drained
//! (fd exhaustion), retried every `ACCEPT_RETRY_INTERVAL`, and connections
//! that spent their chunk budget, driven again on the next round.

use crate::config::Config;
use crate::error::{AcceptError, ServerError};
use crate::runtime::connection::{ConnState, Connection, ConnectionRegistry, Wants};
use crate::runtime::listener::ACCEPT_RETRY_INTERVAL;
use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 1024;

type MioConnections = ConnectionRegistry<TcpStream>;

/// Source of accepted connections.
///
/// Implemented by `mio::net::TcpListener`; the event loop only needs this
/// much of it.
pub(crate) trait Acceptor: Source {
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Acceptor for TcpListener {
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Outcome of draining the accept queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backlog {
    /// `accept` reported `WouldBlock`; the next connection raises an event.
    Drained,
    /// A resource error stopped the drain; connections may still be queued.
    Stalled,
}

/// Run the accept/echo loop on the current thread. Returns only on a fatal error.
pub fn run(listener: std::net::TcpListener, config: &Config) -> Result<(), ServerError> {
    serve(TcpListener::from_std(listener), config)
}

pub(crate) fn serve<L: Acceptor>(mut listener: L, config: &Config) -> Result<(), ServerError> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(EVENTS_CAPACITY);

    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut connections = MioConnections::new(config.max_connections);
    let mut resume: Vec<usize> = Vec::new();
    let mut backlog = Backlog::Drained;

    info!(
        addr = %listener.local_addr()?,
        max_connections = config.max_connections,
        "Event loop started"
    );

    loop {
        let timeout = if !resume.is_empty() {
            Some(Duration::ZERO)
        } else if backlog == Backlog::Stalled {
            Some(ACCEPT_RETRY_INTERVAL)
        } else {
            None
        };

        if let Err(e) = poll.poll(&mut events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e.into());
        }

        let mut listener_ready = backlog == Backlog::Stalled;

        for conn_id in std::mem::take(&mut resume) {
            handle_connection_event(conn_id, poll.registry(), &mut connections, &mut resume);
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => listener_ready = true,
                Token(conn_id) => {
                    handle_connection_event(conn_id, poll.registry(), &mut connections, &mut resume);
                }
            }
        }

        if listener_ready {
            backlog = accept_connections(
                &listener,
                poll.registry(),
                &mut connections,
                config.log_messages,
            )?;
        }
    }
}

/// Drain the accept queue. Only a broken listening socket is an error.
fn accept_connections<L: Acceptor>(
    listener: &L,
    registry: &Registry,
    connections: &mut MioConnections,
    log_messages: bool,
) -> Result<Backlog, AcceptError> {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                let conn_id = match connections.insert(Connection::new(stream, peer, log_messages)) {
                    Ok(id) => id,
                    Err(_) => {
                        // Dropping the rejected connection closes the socket
                        warn!(peer = %peer, "Connection limit reached");
                        continue;
                    }
                };

                let registered = match connections.get_mut(conn_id) {
                    Some(conn) => {
                        registry.register(conn.stream_mut(), Token(conn_id), Interest::READABLE)
                    }
                    None => continue,
                };

                if let Err(e) = registered {
                    warn!(peer = %peer, error = %e, "Failed to register connection");
                    connections.remove(conn_id);
                    continue;
                }

                debug!(conn_id, peer = %peer, active = connections.len(), "Accepted connection");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Backlog::Drained),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                let err = AcceptError(e);
                if err.is_fatal() {
                    return Err(err);
                }
                warn!(error = %err, "Failed to accept connection");

                // fd exhaustion would fail again right away; retry on a timer
                if !err.is_peer_abort() {
                    return Ok(Backlog::Stalled);
                }
            }
        }
    }
}

fn handle_connection_event(
    conn_id: usize,
    registry: &Registry,
    connections: &mut MioConnections,
    resume: &mut Vec<usize>,
) {
    let conn = match connections.get_mut(conn_id) {
        Some(conn) => conn,
        None => return,
    };

    let before = match conn.state() {
        ConnState::Writing { .. } => Wants::Write,
        _ => Wants::Read,
    };

    let keep = match conn.drive() {
        Ok(Wants::Close) => false,
        Ok(wants) => {
            let waiting_on = if wants == Wants::Resume {
                resume.push(conn_id);
                Wants::Read
            } else {
                wants
            };

            if waiting_on == before {
                true
            } else {
                match registry.reregister(conn.stream_mut(), Token(conn_id), interest_for(waiting_on)) {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(conn_id, error = %e, "Failed to reregister connection");
                        false
                    }
                }
            }
        }
        Err(e) => {
            debug!(conn_id, peer = %conn.peer(), error = %e, "Connection error");
            false
        }
    };

    if !keep {
        close_connection(registry, connections, conn_id);
    }
}

fn interest_for(wants: Wants) -> Interest {
    match wants {
        Wants::Write => Interest::WRITABLE,
        Wants::Read | Wants::Resume | Wants::Close => Interest::READABLE,
    }
}

fn close_connection(registry: &Registry, connections: &mut MioConnections, conn_id: usize) {
    if let Some(mut conn) = connections.remove(conn_id) {
        let _ = registry.deregister(conn.stream_mut());
        debug!(conn_id, peer = %conn.peer(), "Connection closed");
    }
}
