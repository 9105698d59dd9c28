// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Structured logging setup. One-shot: call [`init`] once from `main`
//! before the reactor starts.

use tracing_subscriber::EnvFilter;

use crate::config::{EngineConfig, LogFormat};

/// Installs a global `tracing` subscriber reading its filter from
/// [`EngineConfig::log_filter`]. Safe to call only once per process; a
/// second call would panic on the global-default-already-set error, which
/// is fine since nothing in this workspace calls it twice.
pub fn init(config: &EngineConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format {
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        }
    }
}
