// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Continuation chaining: `then` / `catch` / `then_or` build derived
//! awaitables, the `done` family terminates a chain.
//!
//! A missing arm passes through: `then` forwards rejections unchanged,
//! `catch` forwards fulfilments unchanged. Arms return
//! `Result<Resolution<U>, Reason>`, so an arm can produce a plain value,
//! chain another awaitable, or reject.
//!
//! `then`-style children register interest in their upstream, which is
//! what routes their cancellation back up the chain. `done` observers do
//! not: with no downstream awaitable there is nothing to withdraw, and a
//! rejection nobody handles becomes an uncaught-error report on the
//! current loop.

use crate::{Reason, facade};

use super::state::{Awaitable, Resolution, Resolver};

/// What a continuation arm produces.
pub type ArmOutcome<T> = Result<Resolution<T>, Reason>;

fn apply_arm<U: Clone + 'static>(outcome: ArmOutcome<U>, resolver: &Resolver<U>) {
    match outcome {
        Ok(resolution) => resolver.resolve(resolution),
        Err(reason) => resolver.reject(reason),
    }
}

impl<T: Clone + 'static> Awaitable<T> {
    /// Derives a new awaitable from the fulfilment value. Rejection passes
    /// through untouched.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Awaitable<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> ArmOutcome<U> + 'static,
    {
        self.inc_dependents();
        let upstream = self.clone();
        let (child, resolver) = Awaitable::pending_with_canceller(move |_, reason| {
            upstream.cancel_with(reason);
        });
        self.subscribe(Box::new(move |settled| match settled {
            Ok(value) => apply_arm(on_fulfilled(value), &resolver),
            Err(reason) => resolver.reject(reason),
        }));
        child
    }

    /// Derives a new awaitable from the rejection reason. Fulfilment
    /// passes through untouched.
    pub fn catch<G>(&self, on_rejected: G) -> Awaitable<T>
    where
        G: FnOnce(Reason) -> ArmOutcome<T> + 'static,
    {
        self.inc_dependents();
        let upstream = self.clone();
        let (child, resolver) = Awaitable::pending_with_canceller(move |_, reason| {
            upstream.cancel_with(reason);
        });
        self.subscribe(Box::new(move |settled| match settled {
            Ok(value) => resolver.fulfill(value),
            Err(reason) => apply_arm(on_rejected(reason), &resolver),
        }));
        child
    }

    /// [`then()`](Self::then) and [`catch()`](Self::catch) in one
    /// registration: both outcomes map into the same derived awaitable.
    pub fn then_or<U, F, G>(&self, on_fulfilled: F, on_rejected: G) -> Awaitable<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> ArmOutcome<U> + 'static,
        G: FnOnce(Reason) -> ArmOutcome<U> + 'static,
    {
        self.inc_dependents();
        let upstream = self.clone();
        let (child, resolver) = Awaitable::pending_with_canceller(move |_, reason| {
            upstream.cancel_with(reason);
        });
        self.subscribe(Box::new(move |settled| match settled {
            Ok(value) => apply_arm(on_fulfilled(value), &resolver),
            Err(reason) => apply_arm(on_rejected(reason), &resolver),
        }));
        child
    }

    /// Terminal observation of the fulfilment value. A rejection reaching
    /// this point is reported to the loop as an uncaught error.
    pub fn done<F>(&self, on_fulfilled: F)
    where
        F: FnOnce(T) + 'static,
    {
        self.subscribe(Box::new(move |settled| match settled {
            Ok(value) => on_fulfilled(value),
            Err(reason) => facade::report_uncaught(reason),
        }));
    }

    /// Terminal observation of both outcomes.
    pub fn done_or<F, G>(&self, on_fulfilled: F, on_rejected: G)
    where
        F: FnOnce(T) + 'static,
        G: FnOnce(Reason) + 'static,
    {
        self.subscribe(Box::new(move |settled| match settled {
            Ok(value) => on_fulfilled(value),
            Err(reason) => on_rejected(reason),
        }));
    }

    /// Terminal observation of the rejection only.
    pub fn done_err<G>(&self, on_rejected: G)
    where
        G: FnOnce(Reason) + 'static,
    {
        self.subscribe(Box::new(move |settled| {
            if let Err(reason) = settled {
                on_rejected(reason);
            }
        }));
    }

    /// Unwraps a [`Resolution`] into an awaitable.
    pub(crate) fn from_resolution(resolution: Resolution<T>) -> Awaitable<T> {
        match resolution {
            Resolution::Value(value) => Awaitable::resolved(value),
            Resolution::Chain(awaitable) => awaitable,
        }
    }
}
