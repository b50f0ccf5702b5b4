// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Event-loop test suites: tick ordering, watcher lifecycle, io readiness
//! on both backends, and signal delivery.

mod io_tests;
mod loop_tests;

/// Opt-in tracing for debugging a failing suite:
/// `EDDY_TEST_LOG=trace cargo test -- --nocapture`.
pub(crate) fn init_tracing() {
    if std::env::var_os("EDDY_TEST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .try_init();
    }
}
