// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The single-assignment cell behind [`Awaitable`]: state, continuation
//! list, cancellation bookkeeping, and adoption (resolving with another
//! awaitable).
//!
//! # Invariants
//!
//! - The state transition is monotonic and happens once: the first
//!   `settle` wins, later ones are no-ops.
//! - Continuations run exactly once, in registration order, through the
//!   default loop's deferred queue. They never run inside the `resolve` /
//!   `reject` call that settled the cell, and registration after
//!   settlement is still deferred.
//! - Settlement tears down the cell: continuation list, cancel handler,
//!   observation hook, and adoption slot are all cleared, which is what
//!   collapses the reference cycles a chain builds up
//!   (parent continuations hold children, child cancel handlers hold
//!   parents).

use crate::{Fault, LoopError, Reason, Settled, facade};
use smallvec::SmallVec;
use std::{cell::RefCell, rc::Rc};

/// What a resolution produces: a plain value, or another awaitable whose
/// eventual outcome is adopted.
pub enum Resolution<T: Clone + 'static> {
    Value(T),
    Chain(Awaitable<T>),
}

impl<T: Clone + 'static> From<T> for Resolution<T> {
    fn from(value: T) -> Self { Resolution::Value(value) }
}

impl<T: Clone + 'static> From<Awaitable<T>> for Resolution<T> {
    fn from(awaitable: Awaitable<T>) -> Self { Resolution::Chain(awaitable) }
}

enum State<T> {
    Pending,
    Fulfilled(T),
    Rejected(Reason),
}

pub(crate) type ContinuationFn<T> = Box<dyn FnOnce(Settled<T>)>;
type CancelFn<T> = Box<dyn FnOnce(Resolver<T>, Reason)>;
type ObserveFn<T> = Box<dyn FnOnce(Resolver<T>)>;

struct Inner<T: Clone + 'static> {
    state: State<T>,
    continuations: SmallVec<[ContinuationFn<T>; 2]>,
    on_cancel: Option<CancelFn<T>>,
    /// Downstream awaitables still interested in this one. Cancellation
    /// only reaches this cell once the count drains to zero.
    dependents: usize,
    /// Set while this cell mirrors another awaitable's outcome.
    adopted: Option<Awaitable<T>>,
    /// Deferred-start hook, run at first observation (see
    /// [`Awaitable::lazy`]).
    on_observe: Option<ObserveFn<T>>,
}

/// A single-assignment value cell with composable continuations and
/// refcounted cancellation. Cloning the handle is cheap and refers to the
/// same cell.
pub struct Awaitable<T: Clone + 'static> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T: Clone + 'static> Clone for Awaitable<T> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

/// The settle-side handle of an [`Awaitable`], handed to executors and
/// cancel handlers. Both operations are idempotent: only the first
/// settlement of the cell takes effect.
pub struct Resolver<T: Clone + 'static> {
    target: Awaitable<T>,
}

impl<T: Clone + 'static> Clone for Resolver<T> {
    fn clone(&self) -> Self { Self { target: self.target.clone() } }
}

impl<T: Clone + 'static> Resolver<T> {
    /// Fulfils with a value, or adopts another awaitable's outcome.
    pub fn resolve(&self, resolution: impl Into<Resolution<T>>) {
        self.target.apply_resolution(resolution.into());
    }

    pub fn fulfill(&self, value: T) { self.target.transition(Ok(value)); }

    pub fn reject(&self, reason: Reason) { self.target.transition(Err(reason)); }
}

impl<T: Clone + 'static> std::fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

impl<T: Clone + 'static> Awaitable<T> {
    fn bare() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                continuations: SmallVec::new(),
                on_cancel: None,
                dependents: 0,
                adopted: None,
                on_observe: None,
            })),
        }
    }

    /// A pending awaitable and its resolver, as a pair.
    #[must_use]
    pub fn pending() -> (Self, Resolver<T>) {
        let awaitable = Self::bare();
        let resolver = awaitable.resolver();
        (awaitable, resolver)
    }

    /// Like [`pending()`](Self::pending), with a cancellation handler that
    /// runs when cancellation reaches this cell (all downstream interest
    /// gone). If the handler leaves the cell pending, the cell is rejected
    /// with the cancellation reason afterwards.
    #[must_use]
    pub fn pending_with_canceller(
        on_cancel: impl FnOnce(Resolver<T>, Reason) + 'static,
    ) -> (Self, Resolver<T>) {
        let (awaitable, resolver) = Self::pending();
        awaitable.inner.borrow_mut().on_cancel = Some(Box::new(on_cancel));
        (awaitable, resolver)
    }

    /// Runs `executor` synchronously with the resolver. An `Err` from the
    /// executor rejects immediately.
    pub fn new(executor: impl FnOnce(Resolver<T>) -> Result<(), Reason>) -> Self {
        let (awaitable, resolver) = Self::pending();
        if let Err(reason) = executor(resolver.clone()) {
            resolver.reject(reason);
        }
        awaitable
    }

    /// [`new()`](Self::new) with a cancellation handler.
    pub fn with_canceller(
        executor: impl FnOnce(Resolver<T>) -> Result<(), Reason>,
        on_cancel: impl FnOnce(Resolver<T>, Reason) + 'static,
    ) -> Self {
        let (awaitable, resolver) = Self::pending_with_canceller(on_cancel);
        if let Err(reason) = executor(resolver.clone()) {
            resolver.reject(reason);
        }
        awaitable
    }

    /// An already-fulfilled awaitable.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        let (awaitable, resolver) = Self::pending();
        resolver.fulfill(value);
        awaitable
    }

    /// An already-rejected awaitable.
    #[must_use]
    pub fn rejected(reason: Reason) -> Self {
        let (awaitable, resolver) = Self::pending();
        resolver.reject(reason);
        awaitable
    }

    /// An awaitable whose `promisor` only runs once somebody observes the
    /// outcome (attaches a continuation).
    pub fn lazy(promisor: impl FnOnce() -> Result<Resolution<T>, Reason> + 'static) -> Self {
        let awaitable = Self::bare();
        awaitable.inner.borrow_mut().on_observe = Some(Box::new(move |resolver| {
            match promisor() {
                Ok(resolution) => resolver.resolve(resolution),
                Err(reason) => resolver.reject(reason),
            }
        }));
        awaitable
    }

    pub(crate) fn resolver(&self) -> Resolver<T> { Resolver { target: self.clone() } }

    // ─── Settlement ───

    pub(crate) fn apply_resolution(&self, resolution: Resolution<T>) {
        match resolution {
            Resolution::Value(value) => self.transition(Ok(value)),
            Resolution::Chain(source) => self.adopt(source),
        }
    }

    /// Mirrors `source`'s eventual outcome into this cell.
    fn adopt(&self, source: Awaitable<T>) {
        if Rc::ptr_eq(&self.inner, &source.inner) {
            self.transition(Err(Fault::logic("awaitable resolved with itself")));
            return;
        }
        {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) || inner.adopted.is_some() {
                return;
            }
            inner.adopted = Some(source.clone());
        }
        source.inc_dependents();
        let target = self.clone();
        source.subscribe(Box::new(move |settled| target.transition(settled)));
    }

    /// The happens-once transition. No-op when already settled. Clears
    /// every slot that could hold a closure, breaking ownership cycles.
    pub(crate) fn transition(&self, result: Settled<T>) {
        let continuations = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                return;
            }
            inner.state = match &result {
                Ok(value) => State::Fulfilled(value.clone()),
                Err(reason) => State::Rejected(reason.clone()),
            };
            inner.on_cancel = None;
            inner.adopted = None;
            inner.on_observe = None;
            std::mem::take(&mut inner.continuations)
        };
        for continuation in continuations {
            let result = result.clone();
            facade::schedule(Box::new(move || continuation(result)));
        }
    }

    /// Registers a continuation. Runs it through the deferred queue, even
    /// when the cell has already settled.
    pub(crate) fn subscribe(&self, continuation: ContinuationFn<T>) {
        let hook = self.inner.borrow_mut().on_observe.take();
        if let Some(hook) = hook {
            hook(self.resolver());
        }
        let already_settled = {
            let mut inner = self.inner.borrow_mut();
            match &inner.state {
                State::Pending => {
                    inner.continuations.push(continuation);
                    None
                }
                State::Fulfilled(value) => Some((Ok(value.clone()), continuation)),
                State::Rejected(reason) => Some((Err(reason.clone()), continuation)),
            }
        };
        if let Some((result, continuation)) = already_settled {
            facade::schedule(Box::new(move || continuation(result)));
        }
    }

    pub(crate) fn inc_dependents(&self) {
        let mut inner = self.inner.borrow_mut();
        if matches!(inner.state, State::Pending) {
            inner.dependents += 1;
        }
    }

    // ─── Cancellation ───

    /// [`cancel_with()`](Self::cancel_with) using the default cancellation
    /// reason.
    pub fn cancel(&self) { self.cancel_with(Fault::cancelled()); }

    /// Withdraws this caller's interest. When the last interested party
    /// has cancelled, the cell's cancel handler runs (and the cancellation
    /// propagates into an adopted source); if the cell is still pending
    /// afterwards it rejects with `reason`. Settled cells ignore
    /// cancellation entirely.
    pub fn cancel_with(&self, reason: Reason) {
        let proceed = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                return;
            }
            if inner.dependents > 0 {
                inner.dependents -= 1;
                inner.dependents == 0
            } else {
                true
            }
        };
        if !proceed {
            return;
        }
        let (handler, adopted) = {
            let mut inner = self.inner.borrow_mut();
            (inner.on_cancel.take(), inner.adopted.take())
        };
        if let Some(adopted) = adopted {
            adopted.cancel_with(reason.clone());
        }
        if let Some(handler) = handler {
            handler(self.resolver(), reason.clone());
        }
        self.transition(Err(reason));
    }

    // ─── Introspection ───

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.inner.borrow().state, State::Pending)
    }

    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        matches!(self.inner.borrow().state, State::Fulfilled(_))
    }

    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self.inner.borrow().state, State::Rejected(_))
    }

    /// Non-blocking introspection of the outcome.
    ///
    /// # Errors
    ///
    /// [`LoopError::StillPending`] while the cell has not settled.
    pub fn result(&self) -> Result<Settled<T>, LoopError> {
        match &self.inner.borrow().state {
            State::Pending => Err(LoopError::StillPending),
            State::Fulfilled(value) => Ok(Ok(value.clone())),
            State::Rejected(reason) => Ok(Err(reason.clone())),
        }
    }
}

impl<T: Clone + 'static> std::fmt::Debug for Awaitable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        let state = match inner.state {
            State::Pending => "pending",
            State::Fulfilled(_) => "fulfilled",
            State::Rejected(_) => "rejected",
        };
        f.debug_struct("Awaitable")
            .field("state", &state)
            .field("continuations", &inner.continuations.len())
            .field("dependents", &inner.dependents)
            .finish()
    }
}

impl<T: Clone + 'static> std::fmt::Debug for Resolution<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Value(_) => f.write_str("Resolution::Value"),
            Resolution::Chain(_) => f.write_str("Resolution::Chain"),
        }
    }
}
