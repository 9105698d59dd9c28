// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A minimal HTTP/1.0 stub server for `end_to_end.rs`'s "remote at
//! 127.0.0.1:NNNN" scenarios. Not a production HTTP server:
//! it only understands "read until the blank line, write back a fixed
//! response", which is all a `HEAD /` check ever needs.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What the stub does with each accepted connection.
pub enum StubBehavior {
    /// Respond with `response` to every request read on the connection,
    /// keeping it open across requests (the pool-reuse scenario's remote).
    RepeatResponse { response: &'static [u8] },
    /// Respond once, then close the connection (a peer-initiated idle close).
    RespondThenClose { response: &'static [u8] },
    /// Accept and never read or write anything (an unresponsive remote).
    AcceptAndStall,
}

pub struct StubServer {
    pub addr: std::net::SocketAddr,
    pub accept_count: Arc<AtomicUsize>,
}

impl StubServer {
    pub fn spawn(behavior: StubBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub listener");
        let addr = listener.local_addr().expect("stub local_addr");
        let accept_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accept_count);

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                match &behavior {
                    StubBehavior::RepeatResponse { response } => {
                        serve_repeatedly(stream, *response);
                    }
                    StubBehavior::RespondThenClose { response } => {
                        let mut stream = stream;
                        if read_one_request(&mut stream) {
                            let _ = stream.write_all(*response);
                            let _ = stream.flush();
                        }
                        // Dropping `stream` here closes the socket, which
                        // is the peer-initiated idle close this behavior exercises.
                    }
                    StubBehavior::AcceptAndStall => {
                        // Hold the connection open without reading or
                        // writing; leaked on purpose for the lifetime of
                        // the test process so the worker's own 4s dial
                        // deadline is what ends the check.
                        std::mem::forget(stream);
                    }
                }
            }
        });

        Self { addr, accept_count }
    }

    pub fn accepts(&self) -> usize {
        self.accept_count.load(Ordering::SeqCst)
    }
}

fn serve_repeatedly(mut stream: TcpStream, response: &'static [u8]) {
    loop {
        if !read_one_request(&mut stream) {
            return;
        }
        if stream.write_all(response).is_err() {
            return;
        }
        if stream.flush().is_err() {
            return;
        }
    }
}

/// Reads bytes until the `\r\n\r\n` header terminator (or the peer closes
/// first). Returns `false` on EOF/error before a full request arrived.
fn read_one_request(stream: &mut TcpStream) -> bool {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            return true;
        }
        match stream.read(&mut chunk) {
            Ok(0) => return false,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => return false,
        }
    }
}
