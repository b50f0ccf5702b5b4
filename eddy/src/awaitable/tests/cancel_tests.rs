// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Refcounted cancellation: upstream propagation, handler invocation, and
//! the settled-is-immune rule.

use super::pump;
use crate::{Awaitable, Fault};
use pretty_assertions::assert_eq;
use std::{cell::Cell, rc::Rc};

#[test]
fn cancel_without_handler_rejects_with_the_reason() {
    let (awaitable, _resolver) = Awaitable::<i32>::pending();
    awaitable.cancel();
    let reason = awaitable.result().unwrap().unwrap_err();
    assert!(reason.is_cancellation());
}

#[test]
fn cancel_of_settled_awaitable_is_a_no_op() {
    let awaitable = Awaitable::resolved(5);
    awaitable.cancel();
    assert_eq!(awaitable.result().unwrap().unwrap(), 5);
}

#[test]
fn cancel_handler_runs_once_with_the_reason() {
    let seen = Rc::new(Cell::new(0));
    let seen_in_handler = seen.clone();
    let (awaitable, _resolver) =
        Awaitable::<i32>::pending_with_canceller(move |_, reason| {
            assert_eq!(reason.to_string(), "cancelled: goodbye");
            seen_in_handler.set(seen_in_handler.get() + 1);
        });
    awaitable.cancel_with(Fault::cancelled_because("goodbye"));
    awaitable.cancel_with(Fault::cancelled_because("again"));
    assert_eq!(seen.get(), 1);
    assert!(awaitable.is_rejected());
}

#[test]
fn cancel_handler_may_settle_instead() {
    let (awaitable, _resolver) =
        Awaitable::<i32>::pending_with_canceller(|resolver, _| resolver.fulfill(13));
    awaitable.cancel();
    assert_eq!(awaitable.result().unwrap().unwrap(), 13);
}

#[test]
fn upstream_cancels_only_after_every_downstream_cancelled() {
    let handler_runs = Rc::new(Cell::new(0));
    let handler_runs_inner = handler_runs.clone();
    let (parent, _resolver) = Awaitable::<i32>::pending_with_canceller(move |_, _| {
        handler_runs_inner.set(handler_runs_inner.get() + 1);
    });

    let child_a = parent.then(|v| Ok(crate::Resolution::Value(v)));
    let child_b = parent.then(|v| Ok(crate::Resolution::Value(v)));

    child_a.cancel();
    assert_eq!(handler_runs.get(), 0);
    assert!(parent.is_pending());

    child_b.cancel();
    assert_eq!(handler_runs.get(), 1);
    assert!(parent.is_rejected());
}

#[test]
fn done_observer_does_not_block_cancellation() {
    // A terminal observer registers no downstream awaitable, so a direct
    // cancel still reaches the cell.
    let (awaitable, _resolver) = Awaitable::<i32>::pending();
    let rejected = Rc::new(Cell::new(false));
    let rejected_in_cb = rejected.clone();
    awaitable.done_or(|_| {}, move |_| rejected_in_cb.set(true));
    awaitable.cancel();
    assert!(awaitable.is_rejected());
    pump();
    assert!(rejected.get());
}

#[test]
fn cancelling_one_of_two_children_keeps_the_chain_alive() {
    let (parent, resolver) = Awaitable::<i32>::pending();
    let doomed = parent.then(|v| Ok(crate::Resolution::Value(v + 1)));
    let survivor = parent.then(|v| Ok(crate::Resolution::Value(v + 2)));

    doomed.cancel();
    resolver.fulfill(10);
    pump();

    assert!(doomed.is_rejected());
    assert_eq!(survivor.result().unwrap().unwrap(), 12);
}

#[test]
fn cancellation_propagates_through_adoption() {
    let cancelled = Rc::new(Cell::new(false));
    let cancelled_inner = cancelled.clone();
    let (source, _source_resolver) =
        Awaitable::<i32>::pending_with_canceller(move |_, _| cancelled_inner.set(true));

    let (outer, outer_resolver) = Awaitable::<i32>::pending();
    outer_resolver.resolve(crate::Resolution::Chain(source));

    outer.cancel();
    assert!(cancelled.get());
}

#[test]
fn cancellation_delivery_is_asynchronous_for_continuations() {
    let (awaitable, _resolver) = Awaitable::<i32>::pending();
    let observed = Rc::new(Cell::new(false));
    let observed_in_cb = observed.clone();
    awaitable.done_or(|_| {}, move |_| observed_in_cb.set(true));

    awaitable.cancel();
    // The cell is rejected synchronously, but its continuations still go
    // through the deferred queue.
    assert!(awaitable.is_rejected());
    assert!(!observed.get());
    pump();
    assert!(observed.get());
}
