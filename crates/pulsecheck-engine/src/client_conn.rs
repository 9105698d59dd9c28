// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The per-IPC-connection record. Lives in its own slab, disjoint from the
//! check slab, so dispatch can tell a client fd from a check fd by slab membership.

/// A connected client of the IPC listener.
pub struct ClientConn {
    pub stream: mio::net::UnixStream,
    /// Slab key of the check this client is currently waiting on, if any.
    /// Cleared when the check finishes (or when this client asked for no
    /// check yet).
    pub in_flight_check: Option<usize>,
}

impl ClientConn {
    pub fn new(stream: mio::net::UnixStream) -> Self {
        Self { stream, in_flight_check: None }
    }
}
