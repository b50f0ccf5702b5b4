// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Test suites for the awaitable state machine.
//!
//! Every test drives its continuations through the thread-default loop;
//! each test thread owns its own default loop, so the suites stay
//! independent without any global reset.

mod adapter_tests;
mod cancel_tests;

use crate::facade;

/// Runs the thread-default loop until it empties (all scheduled
/// continuations delivered).
pub(crate) fn pump() { facade::run().unwrap(); }
