// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Error types for engine setup and the per-check state machine. See
//! [`EngineError`] for the variants `Engine::new`/`Engine::run` can fail
//! with.

/// Errors that can abort starting or running the engine.
///
/// Each variant is a distinct failure mode a deployment would want to tell
/// apart in logs; there is no single catch-all `Other` bucket.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to bind abstract-namespace listener at {path:?}: {source}")]
    Listener {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create mio::Poll: {0}")]
    PollCreation(#[source] std::io::Error),

    #[error("failed to register shutdown signal handler: {0}")]
    SignalRegistration(#[source] std::io::Error),

    #[error("failed to register listener with the reactor: {0}")]
    ReactorRegistration(#[source] std::io::Error),

    #[error("reactor wait failed: {0}")]
    PollWait(#[source] std::io::Error),
}
