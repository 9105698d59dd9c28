// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Worker process entry point: read configuration from the environment,
//! install logging, build the reactor, and run it until a shutdown signal
//! arrives.

use pulsecheck_engine::{Engine, EngineConfig};

fn main() {
    let config = EngineConfig::from_env();
    pulsecheck_engine::logging::init(&config);

    let mut engine = match Engine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "failed to start pulsecheckd");
            std::process::exit(1);
        }
    };

    if let Err(e) = engine.run() {
        tracing::error!(error = %e, "pulsecheckd exited with an error");
        std::process::exit(1);
    }
}
