// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Shared test support for `end_to_end.rs`. Lives under `tests/support/` (a
//! directory with a `mod.rs`, not a bare `tests/support.rs`) so cargo treats
//! it as a module rather than a second test binary.

pub mod stub_server;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pulsecheck_engine::{Engine, EngineConfig};

static NEXT_SOCKET_ID: AtomicUsize = AtomicUsize::new(0);

/// Starts an `Engine` on a background thread with a socket name unique to
/// this process run, and returns that name. The thread is intentionally
/// never joined: this worker only stops on a shutdown signal, and
/// raising one from within a test would tear down the whole test binary,
/// so every test gets its own engine that simply outlives the test.
pub fn spawn_engine() -> String {
    let id = NEXT_SOCKET_ID.fetch_add(1, Ordering::SeqCst);
    let socket_name = format!("pulsecheck-test-{}-{}", std::process::id(), id);
    let config = EngineConfig { socket_name: socket_name.clone(), ..EngineConfig::default() };

    std::thread::spawn(move || {
        let mut engine = Engine::new(config).expect("engine startup");
        engine.run().expect("engine run");
    });

    // Give the listener a moment to bind before the test tries to connect.
    std::thread::sleep(Duration::from_millis(50));
    socket_name
}

/// Connects a raw abstract-namespace stream, bypassing `pulsecheck-client`,
/// so tests can simulate a client that writes a request frame and
/// disconnects without ever reading the verdict.
pub fn raw_connect_abstract(socket_name: &str) -> std::os::unix::net::UnixStream {
    use std::io;
    use std::mem;
    use std::os::unix::io::FromRawFd;

    let name_bytes = socket_name.as_bytes();
    unsafe {
        let fd = libc::socket(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0);
        assert!(fd >= 0, "socket() failed: {}", io::Error::last_os_error());

        let mut addr: libc::sockaddr_un = mem::zeroed();
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        let path_slice = std::slice::from_raw_parts_mut(addr.sun_path.as_mut_ptr() as *mut u8, addr.sun_path.len());
        path_slice[1..1 + name_bytes.len()].copy_from_slice(name_bytes);
        let addr_len = (mem::size_of::<libc::sa_family_t>() + 1 + name_bytes.len()) as libc::socklen_t;

        let rc = libc::connect(fd, &addr as *const _ as *const libc::sockaddr, addr_len);
        assert!(rc == 0, "connect() failed: {}", io::Error::last_os_error());

        std::os::unix::net::UnixStream::from_raw_fd(fd)
    }
}
