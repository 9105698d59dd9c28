// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Outbound TCP dialling, including the TCP Fast Open fast path and its
//! fallback to a classical non-blocking `connect()`.
//!
//! `tfo_supported()` is a build-time capability check: only Linux exposes
//! `MSG_FASTOPEN`. On every other platform dialling always takes the
//! classical path and every fresh entry starts in [`CheckState::Connecting`].

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, SockAddr, Socket, Type};

use crate::entry::CheckState;

pub fn tfo_supported() -> bool {
    cfg!(target_os = "linux")
}

/// A freshly dialled outbound socket and the state the check should start
/// in, or a hard refusal meaning no [`crate::entry::CheckEntry`] should be
/// created at all — a "dial failure before registration" case,
/// which the coordinator surfaces only as a dropped client connection
/// (never a `fail` verdict, since no entry ever existed to send one from).
pub enum DialOutcome {
    Established {
        stream: mio::net::TcpStream,
        state: CheckState,
        tfo: bool,
    },
    Refused(io::Error),
}

fn new_nonblocking_socket(addr: &SocketAddr) -> io::Result<Socket> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Classical non-blocking `connect()`, used whenever TFO is unavailable or
/// as the one-shot fallback after a synchronous TFO refusal.
fn plain_connect(addr: &SocketAddr) -> io::Result<(Socket, CheckState)> {
    let socket = new_nonblocking_socket(addr)?;
    let sock_addr = SockAddr::from(*addr);
    match socket.connect(&sock_addr) {
        Ok(()) => Ok((socket, CheckState::Writing { position: 0 })),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok((socket, CheckState::Connecting)),
        Err(e) => Err(e),
    }
}

#[cfg(target_os = "linux")]
fn tfo_connect(addr: &SocketAddr, request: &[u8]) -> io::Result<(Socket, CheckState)> {
    use std::os::unix::io::AsRawFd;

    let socket = new_nonblocking_socket(addr)?;
    let sock_addr = SockAddr::from(*addr);
    let rc = unsafe {
        libc::sendto(
            socket.as_raw_fd(),
            request.as_ptr() as *const libc::c_void,
            request.len(),
            libc::MSG_FASTOPEN,
            sock_addr.as_ptr(),
            sock_addr.len(),
        )
    };
    if rc >= 0 {
        let sent = rc as usize;
        let state = if sent >= request.len() {
            CheckState::ReadingStatus { position: 0 }
        } else {
            CheckState::Writing { position: sent }
        };
        return Ok((socket, state));
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EAGAIN) | Some(libc::EINPROGRESS) => Ok((socket, CheckState::Writing { position: 0 })),
        _ => Err(err),
    }
}

/// Dials a fresh connection to `addr`, using TFO where the build supports
/// it and transparently falling back to a classical connect if the
/// platform synchronously refuses TFO (a TFO-induced dial failure).
pub fn dial_fresh(addr: SocketAddr, request: &[u8]) -> DialOutcome {
    if tfo_supported() {
        #[cfg(target_os = "linux")]
        {
            match tfo_connect(&addr, request) {
                Ok((socket, state)) => {
                    return DialOutcome::Established {
                        stream: to_mio_stream(socket),
                        state,
                        tfo: true,
                    };
                }
                Err(_tfo_err) => match plain_connect(&addr) {
                    Ok((socket, state)) => {
                        return DialOutcome::Established {
                            stream: to_mio_stream(socket),
                            state,
                            tfo: false,
                        };
                    }
                    Err(e) => return DialOutcome::Refused(e),
                },
            }
        }
        #[cfg(not(target_os = "linux"))]
        unreachable!("tfo_supported() is only true on linux");
    }

    match plain_connect(&addr) {
        Ok((socket, state)) => DialOutcome::Established {
            stream: to_mio_stream(socket),
            state,
            tfo: false,
        },
        Err(e) => DialOutcome::Refused(e),
    }
}

/// Redials `addr` without TFO after a `Connecting` socket reported failure
/// while `tfo == true`. The caller swaps the returned stream
/// into the existing entry under its current slab key rather than creating
/// a new one — see DESIGN.md's note on handle identity.
pub fn redial_plain(addr: SocketAddr) -> io::Result<(mio::net::TcpStream, CheckState)> {
    plain_connect(&addr).map(|(socket, state)| (to_mio_stream(socket), state))
}

fn to_mio_stream(socket: Socket) -> mio::net::TcpStream {
    let std_stream: std::net::TcpStream = socket.into();
    mio::net::TcpStream::from_std(std_stream)
}
