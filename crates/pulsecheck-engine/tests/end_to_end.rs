// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! End-to-end scenarios run against a real `Engine` on a
//! background thread, a real stub HTTP/1.0 remote, and the real
//! `pulsecheck-client` connection the (out-of-scope) plugin shim would use.

mod support;

use std::io::Write;
use std::time::{Duration, Instant};

use pulsecheck_client::{CheckOutcome, Connection};
use pulsecheck_wire::{RemoteAddress, RequestFrame};
use support::stub_server::{StubBehavior, StubServer};

const OK_RESPONSE: &[u8] = b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n";

/// Scenario 1: two back-to-back checks against the same endpoint on one
/// IPC connection perform exactly one TCP dial, per the pool-reuse law.
#[test]
fn repeated_checks_reuse_the_pooled_connection() {
    let stub = StubServer::spawn(StubBehavior::RepeatResponse { response: OK_RESPONSE });
    let socket_name = support::spawn_engine();
    let mut conn = Connection::connect_to(&socket_name).expect("connect to worker");

    let first = conn.check("127.0.0.1", stub.addr.port()).expect("first check");
    let second = conn.check("127.0.0.1", stub.addr.port()).expect("second check");

    assert_eq!(first, CheckOutcome::Ok);
    assert_eq!(second, CheckOutcome::Ok);
    assert_eq!(stub.accepts(), 1, "second check must reuse the pooled connection, not redial");
}

/// Scenario 2: a 5xx status line is a protocol-level fail.
#[test]
fn server_error_status_is_a_fail() {
    let stub = StubServer::spawn(StubBehavior::RepeatResponse {
        response: b"HTTP/1.0 500 Internal Server Error\r\n\r\n",
    });
    let socket_name = support::spawn_engine();
    let mut conn = Connection::connect_to(&socket_name).expect("connect to worker");

    let outcome = conn.check("127.0.0.1", stub.addr.port()).expect("check");
    assert_eq!(outcome, CheckOutcome::Fail);
}

/// Scenario 3: a malformed status digit outside '1'..'4' is also a fail.
#[test]
fn malformed_status_digit_is_a_fail() {
    let stub = StubServer::spawn(StubBehavior::RepeatResponse { response: b"HTTP/1.0 6xx ...\r\n\r\n" });
    let socket_name = support::spawn_engine();
    let mut conn = Connection::connect_to(&socket_name).expect("connect to worker");

    let outcome = conn.check("127.0.0.1", stub.addr.port()).expect("check");
    assert_eq!(outcome, CheckOutcome::Fail);
}

/// Scenario 4: the remote closes the idle pooled connection between two
/// checks on the same IPC connection. The client library absorbs any
/// internal `retry` transparently; what's externally observable (and what
/// this test asserts) is the pool-reuse law's outcome: one `ok` surfaces to
/// the caller and exactly two TCP connects happen in total, whether the
/// worker notices the stale close before or after the second request
/// arrives.
#[test]
fn stale_pooled_connection_recovers_via_retry() {
    let stub = StubServer::spawn(StubBehavior::RespondThenClose { response: OK_RESPONSE });
    let socket_name = support::spawn_engine();
    let mut conn = Connection::connect_to(&socket_name).expect("connect to worker");

    let first = conn.check("127.0.0.1", stub.addr.port()).expect("first check");
    assert_eq!(first, CheckOutcome::Ok);

    // No artificial delay: issue the second check immediately so the
    // worker is free to take either path (detect the
    // stale close during a dedicated sweep, or discover it when the
    // reactor re-arms the pooled socket for reuse).
    let second = conn.check("127.0.0.1", stub.addr.port()).expect("second check");
    assert_eq!(second, CheckOutcome::Ok);
    assert_eq!(stub.accepts(), 2, "a stale pooled connection costs exactly one extra dial");
}

/// Scenario 5: a remote that accepts but never replies fails once the
/// fresh-dial deadline (4s) elapses.
#[test]
fn unresponsive_remote_fails_after_the_dial_deadline() {
    let stub = StubServer::spawn(StubBehavior::AcceptAndStall);
    let socket_name = support::spawn_engine();
    let mut conn = Connection::connect_to(&socket_name).expect("connect to worker");

    let started = Instant::now();
    let outcome = conn.check("127.0.0.1", stub.addr.port()).expect("check");
    let elapsed = started.elapsed();

    assert_eq!(outcome, CheckOutcome::Fail);
    assert!(elapsed >= Duration::from_secs(3), "fired too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "sweeper did not fire within a reasonable bound: {elapsed:?}");
}

/// Scenario 6: a client that disconnects before reading the verdict does
/// not stop the check from completing and pooling the connection — the
/// next real client to check the same endpoint reuses it with no extra
/// dial.
#[test]
fn disconnecting_client_does_not_prevent_pool_insertion() {
    let stub = StubServer::spawn(StubBehavior::RepeatResponse { response: OK_RESPONSE });
    let socket_name = support::spawn_engine();

    let addr = RemoteAddress::from_socket_addr(stub.addr);
    let frame = RequestFrame::new(addr);
    {
        let mut cancelling = support::raw_connect_abstract(&socket_name);
        cancelling.write_all(&frame.to_bytes()).expect("write request frame");
        // Dropped here without ever reading a verdict back.
    }

    // Give the worker time to finish the check and pool the connection
    // before a real client arrives.
    std::thread::sleep(Duration::from_millis(200));

    let mut conn = Connection::connect_to(&socket_name).expect("connect to worker");
    let outcome = conn.check("127.0.0.1", stub.addr.port()).expect("check after cancellation");

    assert_eq!(outcome, CheckOutcome::Ok);
    assert_eq!(stub.accepts(), 1, "the cancelled check's connection must still have been pooled");
}
