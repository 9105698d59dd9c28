//! Client library for the pulsecheckd IPC channel.
//!
//! A [`Connection`] is a single long-lived stream socket to the worker.
//! [`Connection::check`] frames one request, reads back a verdict, and
//! transparently re-issues once when the worker reports a stale pooled
//! connection (`Verdict::Retry`) — callers never see that value.

mod error;
mod unix_connect;

use std::io::{Read, Write};
use std::net::ToSocketAddrs;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;

use pulsecheck_wire::{RemoteAddress, RequestFrame, Verdict};
use tracing::{debug, warn};

pub use error::ClientError;

/// The default abstract-namespace name, matching
/// `pulsecheck_engine::config::DEFAULT_SOCKET_NAME`. Kept as a literal here
/// rather than a shared dependency: a client binary has no reason to link
/// the worker's reactor crate just for one constant.
pub const DEFAULT_SOCKET_NAME: &str = "pulsecheck";

/// The only two outcomes a caller of [`Connection::check`] ever sees.
/// `Verdict::Retry` is absorbed internally; `Verdict::ClientError` never
/// arrives over the wire (the worker never sends it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Ok,
    Fail,
}

/// A connection to the pulsecheckd worker.
///
/// Holding one of these across many [`Connection::check`] calls is the
/// intended usage (a plugin shim keeps one IPC connection per
/// agent thread across check calls"). After a call returns
/// `Ok(CheckOutcome::Fail)`, call [`Connection::is_poisoned`] to find out
/// whether the transport itself broke (as opposed to the remote simply
/// failing its check) — a poisoned connection should be dropped and
/// replaced with a fresh [`Connection::connect`].
pub struct Connection {
    stream: UnixStream,
    poisoned: bool,
}

impl Connection {
    /// Connects to the worker's abstract-namespace listener under the
    /// default name.
    pub fn connect() -> Result<Self, ClientError> {
        Self::connect_to(DEFAULT_SOCKET_NAME)
    }

    /// Connects to the worker's abstract-namespace listener under a
    /// specific name (useful for tests running several workers side by
    /// side).
    pub fn connect_to(socket_name: &str) -> Result<Self, ClientError> {
        let stream = unix_connect::connect_abstract(socket_name).map_err(ClientError::Connect)?;
        Ok(Self { stream, poisoned: false })
    }

    /// True once a transport-level failure has been observed on this
    /// connection. A poisoned connection will keep failing every check;
    /// the caller is expected to drop it and reconnect.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Zero-byte liveness probe. A `send()` of zero bytes is a
    /// no-op on a healthy socket but surfaces `ECONNRESET`/`EPIPE` on one
    /// the peer has already torn down, without risking `SIGPIPE` thanks to
    /// `MSG_NOSIGNAL`.
    fn probe_liveness(&self) -> bool {
        let fd = self.stream.as_raw_fd();
        let rc = unsafe { libc::send(fd, [].as_ptr(), 0, libc::MSG_NOSIGNAL) };
        rc >= 0
    }

    /// Resolves `(host, port)`, issues one HTTP HEAD check through the
    /// worker, and returns `ok`/`fail`. A worker-reported `retry` (the
    /// pooled connection it tried was stale) triggers exactly one
    /// re-issue, which is all the retry-idempotence rule requires.
    pub fn check(&mut self, host: &str, port: u16) -> Result<CheckOutcome, ClientError> {
        if !self.probe_liveness() {
            warn!(%host, port, "liveness probe found the connection already dead, marking poisoned");
            self.poisoned = true;
            return Ok(CheckOutcome::Fail);
        }

        let addr = resolve_first(host, port)?;
        let frame = RequestFrame::new(RemoteAddress::from_socket_addr(addr));

        match self.send_and_await(&frame) {
            Ok(Verdict::Retry) => {
                debug!(%host, port, "worker reported a stale pooled connection, retrying once");
                match self.send_and_await(&frame) {
                    Ok(Verdict::Ok) => Ok(CheckOutcome::Ok),
                    Ok(_) => Ok(CheckOutcome::Fail),
                    Err(e) => {
                        warn!(%host, port, error = %e, "retry attempt failed, marking connection poisoned");
                        self.poisoned = true;
                        Err(e)
                    }
                }
            }
            Ok(Verdict::Ok) => Ok(CheckOutcome::Ok),
            Ok(_) => Ok(CheckOutcome::Fail),
            Err(e) => {
                warn!(%host, port, error = %e, "transport error talking to the worker, marking connection poisoned");
                self.poisoned = true;
                Err(e)
            }
        }
    }

    fn send_and_await(&mut self, frame: &RequestFrame) -> Result<Verdict, ClientError> {
        self.stream.write_all(&frame.to_bytes())?;
        let mut verdict_bytes = [0u8; 2];
        self.stream.read_exact(&mut verdict_bytes)?;
        Verdict::from_bytes(verdict_bytes).ok_or(ClientError::UnknownVerdict)
    }
}

fn resolve_first(host: &str, port: u16) -> Result<std::net::SocketAddr, ClientError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|_| ClientError::Resolve { host: host.to_string(), port })?
        .next()
        .ok_or_else(|| ClientError::NoAddress { host: host.to_string(), port })
}
