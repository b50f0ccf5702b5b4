// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The awaitable state machine: a single-assignment promise cell with
//! composable continuations ([`then`] / [`catch`] / [`done`]), refcounted
//! cancellation that propagates upstream only when every downstream has
//! withdrawn, adoption (resolving with another awaitable), timer adapters
//! ([`delay`] / [`timeout`] / [`sleep`]), and collection combinators
//! ([`all`] / [`any`] / [`some`] / [`choose`] / [`settle`] / [`map`] /
//! [`fold`] / [`iterate`] / [`retry`]).
//!
//! [`all`]: Awaitable::all
//! [`any`]: Awaitable::any
//! [`catch`]: Awaitable::catch
//! [`choose`]: Awaitable::choose
//! [`delay`]: Awaitable::delay
//! [`done`]: Awaitable::done
//! [`fold`]: Awaitable::fold
//! [`iterate`]: Awaitable::iterate
//! [`map`]: Awaitable::map
//! [`retry`]: Awaitable::retry
//! [`settle`]: Awaitable::settle
//! [`some`]: Awaitable::some
//! [`then`]: Awaitable::then
//! [`timeout`]: Awaitable::timeout

// Attach sources.
pub mod adapters;
pub mod chain;
pub mod combinators;
pub mod state;

// Re-export.
pub use adapters::sleep;
pub use chain::ArmOutcome;
pub use combinators::Flow;
pub use state::{Awaitable, Resolution, Resolver};

#[cfg(test)]
mod tests;
