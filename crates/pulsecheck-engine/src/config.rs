// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Process-wide configuration, read once from the environment at startup
//! and then treated as immutable for the life of the process, the same
//! shape a `TracingConfig`/`WriterConfig` pair uses for its own one-shot
//! setup.

use std::time::Duration;

/// Default abstract-namespace name (after the leading NUL byte).
pub const DEFAULT_SOCKET_NAME: &str = "pulsecheck";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_MAX_EVENTS: usize = 16;

/// `pretty` or `json` tracing-subscriber output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        match raw {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Engine tunables. Construct with [`EngineConfig::from_env`]; there is
/// deliberately no builder since every field has a sensible default and the
/// only caller is `pulsecheckd`'s `main`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Abstract-namespace name, without the leading NUL.
    pub socket_name: String,
    /// `tracing_subscriber::EnvFilter` directive string.
    pub log_filter: String,
    pub log_format: LogFormat,
    /// Capacity passed to `mio::Events::with_capacity`.
    pub max_events: usize,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            socket_name: std::env::var("PULSECHECK_SOCKET_NAME")
                .unwrap_or_else(|_| DEFAULT_SOCKET_NAME.to_string()),
            log_filter: std::env::var("PULSECHECK_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
            log_format: std::env::var("PULSECHECK_LOG_FORMAT")
                .map(|raw| LogFormat::parse(&raw))
                .unwrap_or(LogFormat::Pretty),
            max_events: std::env::var("PULSECHECK_MAX_EVENTS")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(DEFAULT_MAX_EVENTS),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket_name: DEFAULT_SOCKET_NAME.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_format: LogFormat::Pretty,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

/// Fixed deadlines for each check state, unlike `EngineConfig`'s deployment
/// knobs these are not read from the environment.
pub const TIMEOUT_FRESH_DIAL: Duration = Duration::from_secs(4);
pub const TIMEOUT_RECOVERY: Duration = Duration::from_secs(3);
pub const TIMEOUT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Bound on `Poll::poll`'s wait so the expiry sweeper gets to run once a
/// second even under zero I/O activity.
pub const REACTOR_POLL_TIMEOUT: Duration = Duration::from_secs(1);
