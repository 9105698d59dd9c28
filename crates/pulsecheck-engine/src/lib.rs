// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Library surface of the `pulsecheckd` worker: a single-threaded reactor
//! that accepts local IPC connections, pipelines HTTP HEAD checks over
//! pooled TCP connections, and reports a [`pulsecheck_wire::Verdict`] back
//! to each caller.

pub mod client_conn;
pub mod config;
pub mod dial;
pub mod engine;
pub mod entry;
pub mod error;
pub mod logging;
pub mod pool;
pub mod tokens;
pub mod unix_socket;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
