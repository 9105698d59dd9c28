// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Abstract-namespace Unix listener setup and the small raw-syscall
//! helpers the IPC transport needs that neither `std` nor `mio` expose
//! directly: binding a leading-NUL path, and putting an accepted socket
//! back into blocking mode for the one-shot full-frame read.

use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd};

/// Binds a `SOCK_STREAM` listener at the abstract path `\0name`. Neither
/// `std::os::unix::net::UnixListener::bind` nor `mio`'s wrapper can express
/// a leading-NUL path, so the socket/bind/listen calls are made directly
/// and the resulting fd handed to `std` (for safe ownership) and then to
/// `mio` (for reactor registration).
pub fn bind_abstract_listener(name: &str) -> io::Result<mio::net::UnixListener> {
    let name_bytes = name.as_bytes();
    unsafe {
        let fd = libc::socket(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut addr: libc::sockaddr_un = mem::zeroed();
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        let path_slice = std::slice::from_raw_parts_mut(addr.sun_path.as_mut_ptr() as *mut u8, addr.sun_path.len());
        // path_slice[0] stays 0: that leading NUL is what makes this an
        // abstract-namespace address rather than a filesystem path.
        path_slice[1..1 + name_bytes.len()].copy_from_slice(name_bytes);
        let addr_len = (mem::size_of::<libc::sa_family_t>() + 1 + name_bytes.len()) as libc::socklen_t;

        if libc::bind(fd, &addr as *const _ as *const libc::sockaddr, addr_len) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }
        if libc::listen(fd, 128) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        let std_listener = std::os::unix::net::UnixListener::from_raw_fd(fd);
        Ok(mio::net::UnixListener::from_std(std_listener))
    }
}

/// Clears `O_NONBLOCK` on an accepted client socket so its request frame
/// can be read with a small number of plain blocking reads rather than
/// juggling `WouldBlock` across reactor wakeups.
pub fn set_blocking(stream: &mio::net::UnixStream) -> io::Result<()> {
    let fd = stream.as_raw_fd();
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Reads exactly `N` bytes from a blocking-mode stream, or `None` if the
/// peer closes (or errors) before the frame completes. A short or
/// interrupted frame is treated as a dropped connection, not something
/// reassembled across later reactor wakeups.
pub fn read_full_frame<const N: usize>(stream: &mut mio::net::UnixStream) -> Option<[u8; N]> {
    use std::io::Read;
    let mut buf = [0u8; N];
    let mut filled = 0;
    while filled < N {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return None,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return None,
        }
    }
    Some(buf)
}
