//! Connection state machine for readiness-driven echo.
//!
//! Each connection tracks its current state (reading, writing, closed)
//! and owns its socket and message buffer. The state machine is written
//! against `Read + Write` so the event loop drives real sockets while tests
//! drive in-memory streams.

use crate::error::ConnectionError;
use crate::runtime::buffer::ChatMessage;
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use tracing::{info, trace};

/// Chunks echoed per `drive` call before yielding to other connections.
pub const MAX_CHUNKS_PER_DRIVE: usize = 16;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for data to be read.
    Reading,
    /// Echoing the buffered chunk.
    Writing {
        /// Bytes already written.
        written: usize,
    },
    /// Peer closed or an I/O error occurred. Nothing more is attempted.
    Closed,
}

/// What the connection is waiting for after being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wants {
    Read,
    Write,
    /// Chunk budget spent with the socket possibly still readable.
    /// Drive again without waiting for a readiness event.
    Resume,
    Close,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    peer: SocketAddr,
    state: ConnState,
    message: ChatMessage,
    log_messages: bool,
}

impl<S: Read + Write> Connection<S> {
    /// Create a new connection in initial reading state.
    pub fn new(stream: S, peer: SocketAddr, log_messages: bool) -> Self {
        Self {
            stream,
            peer,
            state: ConnState::Reading,
            message: ChatMessage::new(),
            log_messages,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Run the read → write cycle until the socket would block or closes,
    /// or `MAX_CHUNKS_PER_DRIVE` chunks have been echoed.
    ///
    /// Readiness is edge-triggered, so after `Wants::Resume` the caller must
    /// drive again without waiting for a new event.
    pub fn drive(&mut self) -> Result<Wants, ConnectionError> {
        let mut chunks = 0;

        loop {
            match self.state {
                ConnState::Reading if chunks == MAX_CHUNKS_PER_DRIVE => {
                    return Ok(Wants::Resume);
                }
                ConnState::Reading => match self.stream.read(self.message.read_buf()) {
                    Ok(0) => {
                        trace!(peer = %self.peer, "Connection closed by client");
                        self.state = ConnState::Closed;
                        return Ok(Wants::Close);
                    }
                    Ok(n) => {
                        chunks += 1;
                        self.message.set_len(n);
                        if self.log_messages {
                            info!("Received: {}", self.message.text());
                        }
                        self.state = ConnState::Writing { written: 0 };
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(Wants::Read);
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        self.state = ConnState::Closed;
                        return Err(ConnectionError::Read(e));
                    }
                },
                ConnState::Writing { written } => {
                    if written >= self.message.len() {
                        // Chunk fully echoed, go back to reading
                        self.message.clear();
                        self.state = ConnState::Reading;
                        continue;
                    }

                    match self.stream.write(self.message.remaining(written)) {
                        Ok(0) => {
                            self.state = ConnState::Closed;
                            return Err(ConnectionError::Write(io::Error::new(
                                io::ErrorKind::WriteZero,
                                "write returned 0",
                            )));
                        }
                        Ok(n) => {
                            self.state = ConnState::Writing {
                                written: written + n,
                            };
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return Ok(Wants::Write);
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            self.state = ConnState::Closed;
                            return Err(ConnectionError::Write(e));
                        }
                    }
                }
                ConnState::Closed => return Ok(Wants::Close),
            }
        }
    }
}

/// Registry of active connections using slab allocation.
///
/// The slab key doubles as the poll token, so a readiness event maps to its
/// connection in O(1). Removing an entry drops the connection and closes
/// its socket.
pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
    max_connections: usize,
}

impl<S> ConnectionRegistry<S> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns the connection back if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection<S>) -> Result<usize, Connection<S>> {
        if self.connections.len() >= self.max_connections {
            return Err(conn);
        }
        Ok(self.connections.insert(conn))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<Connection<S>> {
        self.connections.try_remove(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }
}
