// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The reactor itself: owns the listener, the two slabs, the keep-alive
//! pool and the shutdown signal source, and drives every state machine
//! transition from dial through keep-alive off one `mio::Poll`.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook_mio::v1_0::Signals;
use slab::Slab;
use tracing::{debug, info, warn};

use pulsecheck_wire::{RemoteAddress, RequestFrame, Verdict, REQUEST_FRAME_LEN};

use crate::client_conn::ClientConn;
use crate::config::{EngineConfig, REACTOR_POLL_TIMEOUT, TIMEOUT_FRESH_DIAL, TIMEOUT_KEEP_ALIVE, TIMEOUT_RECOVERY};
use crate::dial::{self, DialOutcome};
use crate::entry::{self, CheckEntry, CheckState, HTTP_REQUEST};
use crate::error::EngineError;
use crate::pool::KeepAlivePool;
use crate::tokens::{self, TokenKind};
use crate::unix_socket;

/// A flattened, owned copy of the readiness flags the dispatch loop cares about.
/// Collected up front each `poll()` cycle so dispatch can freely mutate
/// `self` without fighting the borrow checker over `self.events`.
#[derive(Clone, Copy)]
struct Readiness {
    token: mio::Token,
    readable: bool,
    writable: bool,
    /// `PEER_HUP`, `HUP` and `ERROR` collapse into one flag: every state
    /// every state in the check state machine treats the three identically ("peer is gone, or
    /// something broke").
    hup_or_error: bool,
}

impl Readiness {
    fn from_event(event: &mio::event::Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            hup_or_error: event.is_read_closed() || event.is_write_closed() || event.is_error(),
        }
    }
}

enum ReadChunk {
    Data(usize),
    Eof,
    WouldBlock,
}

fn read_chunk(stream: &mut mio::net::TcpStream, buf: &mut [u8]) -> io::Result<ReadChunk> {
    loop {
        match stream.read(buf) {
            Ok(0) => return Ok(ReadChunk::Eof),
            Ok(n) => return Ok(ReadChunk::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadChunk::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

enum WriteOutcome {
    Pending,
    Complete,
    Error(io::Error),
}

fn drive_write(stream: &mut mio::net::TcpStream, position: &mut usize) -> WriteOutcome {
    loop {
        if *position >= HTTP_REQUEST.len() {
            return WriteOutcome::Complete;
        }
        match stream.write(&HTTP_REQUEST[*position..]) {
            Ok(0) => return WriteOutcome::Error(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
            Ok(n) => *position += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return WriteOutcome::Pending,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return WriteOutcome::Error(e),
        }
    }
}

/// Verdict to use for a mid-check failure that isn't a protocol violation:
/// fail on a fresh connection, retry on a reused one.
fn fail_or_retry(first: bool) -> Verdict {
    if first {
        Verdict::Fail
    } else {
        Verdict::Retry
    }
}

pub struct Engine {
    poll: Poll,
    events: Events,
    listener: mio::net::UnixListener,
    signals: Signals,
    checks: Slab<CheckEntry>,
    clients: Slab<ClientConn>,
    pool: KeepAlivePool,
    running: bool,
    last_sweep: Instant,
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let mut listener = unix_socket::bind_abstract_listener(&config.socket_name)
            .map_err(|e| EngineError::Listener { path: config.socket_name.clone(), source: e })?;

        let mut poll = Poll::new().map_err(EngineError::PollCreation)?;
        let events = Events::with_capacity(config.max_events);

        let mut signals = Signals::new([SIGTERM, SIGINT, SIGHUP]).map_err(EngineError::SignalRegistration)?;

        poll.registry()
            .register(&mut listener, tokens::LISTENER_TOKEN, Interest::READABLE)
            .map_err(EngineError::ReactorRegistration)?;
        poll.registry()
            .register(&mut signals, tokens::SIGNAL_TOKEN, Interest::READABLE)
            .map_err(EngineError::SignalRegistration)?;

        Ok(Self {
            poll,
            events,
            listener,
            signals,
            checks: Slab::new(),
            clients: Slab::new(),
            pool: KeepAlivePool::new(),
            running: true,
            last_sweep: Instant::now(),
            config,
        })
    }

    pub fn run(&mut self) -> Result<(), EngineError> {
        info!(socket = %self.config.socket_name, "pulsecheckd starting");
        while self.running {
            match self.poll.poll(&mut self.events, Some(REACTOR_POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(EngineError::PollWait(e)),
            }

            let ready: Vec<Readiness> = self.events.iter().map(Readiness::from_event).collect();
            for r in ready {
                match tokens::decode(r.token) {
                    TokenKind::Listener => self.handle_listener_readable(),
                    TokenKind::Signal => self.handle_signal_readable(),
                    TokenKind::Check(key) => self.drive_check(key, r),
                    TokenKind::Client(key) => self.handle_client_event(key, r),
                }
            }

            if self.last_sweep.elapsed() >= Duration::from_secs(1) {
                self.sweep();
                self.last_sweep = Instant::now();
            }
        }
        self.shutdown();
        Ok(())
    }

    // ---- listener / signal -------------------------------------------------

    fn handle_listener_readable(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _peer)) => {
                    if let Err(e) = unix_socket::set_blocking(&stream) {
                        warn!(error = %e, "failed to set accepted client socket to blocking mode");
                        continue;
                    }
                    let key = self.clients.insert(ClientConn::new(stream));
                    let token = tokens::client_token(key);
                    let register_result = {
                        let client = &mut self.clients[key];
                        self.poll.registry().register(&mut client.stream, token, Interest::READABLE)
                    };
                    if register_result.is_err() {
                        warn!("failed to register accepted client socket with reactor");
                        self.clients.remove(key);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "accept() failed");
                    break;
                }
            }
        }
    }

    fn handle_signal_readable(&mut self) {
        for signal in self.signals.pending() {
            info!(signal, "received shutdown signal");
        }
        self.running = false;
    }

    // ---- client IPC fds -----------------------------------------------------

    fn handle_client_event(&mut self, key: usize, r: Readiness) {
        if r.hup_or_error {
            self.close_client(key);
            return;
        }
        if !r.readable {
            return;
        }
        let frame = {
            let client = match self.clients.get_mut(key) {
                Some(c) => c,
                None => return,
            };
            unix_socket::read_full_frame::<REQUEST_FRAME_LEN>(&mut client.stream)
        };
        match frame {
            None => self.close_client(key),
            Some(bytes) => {
                let request = RequestFrame::from_bytes(&bytes);
                self.begin_check(request.addr, key);
            }
        }
    }

    /// Pool lookup or fresh dial.
    fn begin_check(&mut self, addr: RemoteAddress, client_key: usize) {
        if let Some(pooled_key) = self.pool.take(&addr) {
            debug!(?addr, "reusing pooled connection");
            if !self.checks.contains(pooled_key) {
                // Pool pointed at a dead entry; treat as a fresh dial instead.
                self.dial_and_register(addr, client_key);
                return;
            }
            let token = tokens::check_token(pooled_key);
            let result = {
                let entry = &mut self.checks[pooled_key];
                entry.state = CheckState::Recovery;
                entry.first = false;
                entry.tfo = true;
                entry.client_key = Some(client_key);
                entry.expires_at = Instant::now() + TIMEOUT_RECOVERY;
                self.poll.registry().reregister(&mut entry.stream, token, Interest::WRITABLE)
            };
            if result.is_err() {
                warn!("failed to re-arm pooled socket for recovery probe");
                self.complete_check(pooled_key, Verdict::Retry);
                return;
            }
            if let Some(client) = self.clients.get_mut(client_key) {
                client.in_flight_check = Some(pooled_key);
            }
            return;
        }

        self.dial_and_register(addr, client_key);
    }

    fn dial_and_register(&mut self, addr: RemoteAddress, client_key: usize) {
        let socket_addr: SocketAddr = match addr.to_socket_addr() {
            Some(sa) => sa,
            None => {
                warn!("request frame carried an address family this worker cannot dial");
                self.close_client(client_key);
                return;
            }
        };

        match dial::dial_fresh(socket_addr, HTTP_REQUEST) {
            DialOutcome::Refused(e) => {
                debug!(error = %e, "fresh dial refused before an entry was ever created");
                self.close_client(client_key);
            }
            DialOutcome::Established { stream, state, tfo } => {
                let key = self.checks.insert(CheckEntry {
                    remote_addr: addr,
                    stream,
                    client_key: Some(client_key),
                    state,
                    expires_at: Instant::now() + TIMEOUT_FRESH_DIAL,
                    first: true,
                    tfo,
                });
                let interest = match state {
                    CheckState::Connecting => Interest::READABLE.add(Interest::WRITABLE),
                    CheckState::Writing { .. } => Interest::WRITABLE,
                    CheckState::ReadingStatus { .. } => Interest::READABLE,
                    _ => Interest::WRITABLE,
                };
                let token = tokens::check_token(key);
                let register_result = {
                    let entry = &mut self.checks[key];
                    self.poll.registry().register(&mut entry.stream, token, interest)
                };
                if register_result.is_err() {
                    warn!("failed to register freshly dialled socket with the reactor");
                    self.deliver_verdict(client_key, Verdict::Fail);
                    self.destroy_check(key);
                    return;
                }
                if let Some(client) = self.clients.get_mut(client_key) {
                    client.in_flight_check = Some(key);
                }
            }
        }
    }

    // ---- check state machine -------------------------------------------------

    fn drive_check(&mut self, key: usize, r: Readiness) {
        let state = match self.checks.get(key) {
            Some(e) => e.state,
            None => return,
        };
        match state {
            CheckState::Connecting => self.drive_connecting(key, r),
            CheckState::Writing { position } => self.drive_writing(key, r, position),
            CheckState::ReadingStatus { position } => self.drive_reading_status(key, r, position),
            CheckState::ReadingHeaders { streak } => self.drive_reading_headers(key, r, streak),
            CheckState::KeepAlive => self.drive_keep_alive(key, r),
            CheckState::Recovery => self.drive_recovery(key, r),
        }
    }

    fn drive_connecting(&mut self, key: usize, r: Readiness) {
        let (tfo, addr) = match self.checks.get(key) {
            Some(e) => (e.tfo, e.remote_addr),
            None => return,
        };

        if r.readable || r.writable {
            let token = tokens::check_token(key);
            let result = {
                let entry = match self.checks.get_mut(key) {
                    Some(e) => e,
                    None => return,
                };
                entry.state = CheckState::Writing { position: 0 };
                self.poll.registry().reregister(&mut entry.stream, token, Interest::WRITABLE)
            };
            if result.is_err() {
                warn!("failed to re-arm connecting socket for write");
                self.complete_check(key, Verdict::Fail);
            }
            return;
        }

        if !r.hup_or_error {
            return;
        }

        if !tfo {
            self.complete_check(key, Verdict::Fail);
            return;
        }

        let socket_addr = match addr.to_socket_addr() {
            Some(sa) => sa,
            None => {
                self.complete_check(key, Verdict::Fail);
                return;
            }
        };

        match dial::redial_plain(socket_addr) {
            Ok((new_stream, new_state)) => {
                let token = tokens::check_token(key);
                let interest = match new_state {
                    CheckState::Connecting => Interest::READABLE.add(Interest::WRITABLE),
                    _ => Interest::WRITABLE,
                };
                let result = {
                    let entry = match self.checks.get_mut(key) {
                        Some(e) => e,
                        None => return,
                    };
                    let _ = self.poll.registry().deregister(&mut entry.stream);
                    entry.stream = new_stream;
                    entry.tfo = false;
                    entry.state = new_state;
                    self.poll.registry().register(&mut entry.stream, token, interest)
                };
                if result.is_err() {
                    warn!("failed to register TFO-fallback redial with the reactor");
                    self.complete_check(key, Verdict::Fail);
                }
            }
            Err(e) => {
                debug!(error = %e, "non-TFO redial also failed");
                self.complete_check(key, Verdict::Fail);
            }
        }
    }

    fn drive_writing(&mut self, key: usize, r: Readiness, mut position: usize) {
        if !r.writable && !r.hup_or_error {
            return;
        }
        let first = match self.checks.get(key) {
            Some(e) => e.first,
            None => return,
        };

        let outcome = {
            let entry = match self.checks.get_mut(key) {
                Some(e) => e,
                None => return,
            };
            drive_write(&mut entry.stream, &mut position)
        };

        match outcome {
            WriteOutcome::Pending => {
                if let Some(entry) = self.checks.get_mut(key) {
                    entry.state = CheckState::Writing { position };
                }
            }
            WriteOutcome::Complete => {
                let token = tokens::check_token(key);
                let result = {
                    let entry = match self.checks.get_mut(key) {
                        Some(e) => e,
                        None => return,
                    };
                    entry.state = CheckState::ReadingStatus { position: 0 };
                    self.poll.registry().reregister(&mut entry.stream, token, Interest::READABLE)
                };
                if result.is_err() {
                    warn!("failed to re-arm writing socket for read");
                    self.complete_check(key, fail_or_retry(first));
                }
            }
            WriteOutcome::Error(e) => {
                debug!(error = %e, "write failed on check socket");
                self.complete_check(key, fail_or_retry(first));
            }
        }
    }

    fn drive_reading_status(&mut self, key: usize, r: Readiness, mut position: usize) {
        if !r.readable && !r.hup_or_error {
            return;
        }
        let first = match self.checks.get(key) {
            Some(e) => e.first,
            None => return,
        };
        let mut buf = [0u8; 512];
        loop {
            let chunk = {
                let entry = match self.checks.get_mut(key) {
                    Some(e) => e,
                    None => return,
                };
                read_chunk(&mut entry.stream, &mut buf)
            };
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    debug!(error = %e, "read failed in reading_status");
                    self.complete_check(key, fail_or_retry(first));
                    return;
                }
            };
            match chunk {
                ReadChunk::WouldBlock => {
                    if let Some(entry) = self.checks.get_mut(key) {
                        entry.state = CheckState::ReadingStatus { position };
                    }
                    return;
                }
                ReadChunk::Eof => {
                    self.complete_check(key, fail_or_retry(first));
                    return;
                }
                ReadChunk::Data(n) => match entry::advance_status(&buf[..n], &mut position) {
                    entry::StatusProgress::NeedMore => continue,
                    entry::StatusProgress::Invalid => {
                        debug!("status line first digit outside '1'..'4'");
                        self.complete_check(key, Verdict::Fail);
                        return;
                    }
                    entry::StatusProgress::Ready { rest_offset } => {
                        let mut streak = 0u8;
                        if entry::scan_for_blank_line(&buf[rest_offset..n], &mut streak) {
                            self.complete_check(key, Verdict::Ok);
                        } else if let Some(entry) = self.checks.get_mut(key) {
                            entry.state = CheckState::ReadingHeaders { streak };
                        }
                        return;
                    }
                },
            }
        }
    }

    fn drive_reading_headers(&mut self, key: usize, r: Readiness, mut streak: u8) {
        if !r.readable && !r.hup_or_error {
            return;
        }
        let first = match self.checks.get(key) {
            Some(e) => e.first,
            None => return,
        };
        let mut buf = [0u8; 512];
        loop {
            let chunk = {
                let entry = match self.checks.get_mut(key) {
                    Some(e) => e,
                    None => return,
                };
                read_chunk(&mut entry.stream, &mut buf)
            };
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    debug!(error = %e, "read failed in reading_headers");
                    self.complete_check(key, fail_or_retry(first));
                    return;
                }
            };
            match chunk {
                ReadChunk::WouldBlock => {
                    if let Some(entry) = self.checks.get_mut(key) {
                        entry.state = CheckState::ReadingHeaders { streak };
                    }
                    return;
                }
                ReadChunk::Eof => {
                    self.complete_check(key, fail_or_retry(first));
                    return;
                }
                ReadChunk::Data(n) => {
                    if entry::scan_for_blank_line(&buf[..n], &mut streak) {
                        self.complete_check(key, Verdict::Ok);
                        return;
                    }
                }
            }
        }
    }

    fn drive_keep_alive(&mut self, key: usize, r: Readiness) {
        if r.readable || r.hup_or_error {
            debug!("keep-alive connection closed by peer, evicting");
            self.destroy_check(key);
        }
    }

    fn drive_recovery(&mut self, key: usize, r: Readiness) {
        if r.hup_or_error {
            debug!("pooled connection was stale on reuse, returning retry");
            self.complete_check(key, Verdict::Retry);
            return;
        }
        if r.writable {
            if let Some(entry) = self.checks.get_mut(key) {
                entry.state = CheckState::Writing { position: 0 };
            }
        }
    }

    // ---- completion / teardown ---------------------------------------------

    fn complete_check(&mut self, key: usize, verdict: Verdict) {
        let client_key = self.checks.get(key).and_then(|e| e.client_key);
        if let Some(ck) = client_key {
            self.deliver_verdict(ck, verdict);
        }
        match verdict {
            Verdict::Ok => self.pool_or_destroy(key),
            _ => self.destroy_check(key),
        }
    }

    fn pool_or_destroy(&mut self, key: usize) {
        let addr = match self.checks.get_mut(key) {
            Some(entry) => {
                entry.state = CheckState::KeepAlive;
                entry.client_key = None;
                entry.expires_at = Instant::now() + TIMEOUT_KEEP_ALIVE;
                entry.remote_addr
            }
            None => return,
        };
        let token = tokens::check_token(key);
        let result = {
            let entry = &mut self.checks[key];
            self.poll.registry().reregister(&mut entry.stream, token, Interest::READABLE)
        };
        if result.is_err() {
            warn!("failed to re-arm pooled socket for read-only watch");
            self.destroy_check(key);
            return;
        }
        if self.pool.try_insert(addr, key) {
            info!(?addr, "pooled connection after successful check");
        } else {
            info!(?addr, "discarding redundant connection, an equivalent one is already pooled");
            self.destroy_check(key);
        }
    }

    fn deliver_verdict(&mut self, client_key: usize, verdict: Verdict) {
        if let Some(client) = self.clients.get_mut(client_key) {
            let _ = client.stream.write_all(&verdict.to_bytes());
            client.in_flight_check = None;
        }
        if verdict != Verdict::Ok {
            self.close_client(client_key);
        }
    }

    fn destroy_check(&mut self, key: usize) {
        if let Some(mut entry) = self.checks.try_remove(key) {
            let _ = self.poll.registry().deregister(&mut entry.stream);
            self.pool.remove_if(&entry.remote_addr, key);
        }
    }

    fn close_client(&mut self, client_key: usize) {
        if let Some(mut client) = self.clients.try_remove(client_key) {
            let _ = self.poll.registry().deregister(&mut client.stream);
            if let Some(check_key) = client.in_flight_check {
                if let Some(entry) = self.checks.get_mut(check_key) {
                    entry.client_key = None;
                }
            }
        }
    }

    // ---- expiry sweeper -------------------------------------------------------

    fn sweep(&mut self) {
        let now = Instant::now();
        let expired: Vec<usize> = self
            .checks
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k)
            .collect();

        if expired.is_empty() {
            return;
        }
        let mut evicted = 0usize;
        let mut failed = 0usize;
        for key in expired {
            let (state, client_key) = match self.checks.get(key) {
                Some(e) => (e.state, e.client_key),
                None => continue,
            };
            if state == CheckState::KeepAlive {
                evicted += 1;
            } else {
                failed += 1;
                if let Some(ck) = client_key {
                    self.deliver_verdict(ck, Verdict::Fail);
                }
            }
            self.destroy_check(key);
        }
        info!(evicted, failed, "expiry sweep");
    }

    // ---- shutdown --------------------------------------------------------------

    fn shutdown(&mut self) {
        let keys: Vec<usize> = self.checks.iter().map(|(k, _)| k).collect();
        let mut torn_down = 0usize;
        for key in keys {
            let (state, client_key) = match self.checks.get(key) {
                Some(e) => (e.state, e.client_key),
                None => continue,
            };
            if state != CheckState::KeepAlive {
                if let Some(ck) = client_key {
                    self.deliver_verdict(ck, Verdict::Fail);
                }
            }
            self.destroy_check(key);
            torn_down += 1;
        }
        let client_keys: Vec<usize> = self.clients.iter().map(|(k, _)| k).collect();
        for key in client_keys {
            self.close_client(key);
        }
        info!(torn_down, "pulsecheckd shut down");
    }
}
