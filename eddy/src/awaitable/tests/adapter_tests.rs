// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Timer-backed adapters: `delay`, `timeout`, `sleep`.

use super::pump;
use crate::{Awaitable, Fault, Resolution, sleep};
use pretty_assertions::assert_eq;
use std::{cell::Cell,
          rc::Rc,
          time::{Duration, Instant}};

#[test]
fn sleep_fulfils_after_the_interval() {
    let started = Instant::now();
    let slept = sleep(Duration::from_millis(20));
    pump();
    assert!(slept.is_fulfilled());
    assert!(started.elapsed() >= Duration::from_millis(20));
}

#[test]
fn delay_postpones_the_fulfilment_value() {
    let started = Instant::now();
    let delayed = Awaitable::resolved("payload").delay(Duration::from_millis(20));
    pump();
    assert_eq!(delayed.result().unwrap().unwrap(), "payload");
    assert!(started.elapsed() >= Duration::from_millis(20));
}

#[test]
fn delay_forwards_rejection_immediately() {
    let delayed =
        Awaitable::<i32>::rejected(Fault::other("now")).delay(Duration::from_secs(3600));
    pump();
    assert_eq!(delayed.result().unwrap().unwrap_err().to_string(), "now");
}

#[test]
fn cancelling_a_delay_frees_its_timer() {
    let delayed = Awaitable::resolved(1).delay(Duration::from_secs(3600));
    // Let the upstream fulfilment arm the timer first.
    crate::facade::tick(crate::TickMode::NonBlocking).unwrap();
    delayed.cancel();
    // With the hour-long timer freed, the loop has nothing left to wait
    // for; a run would otherwise block here.
    pump();
    assert!(delayed.is_rejected());
}

#[test]
fn timeout_forwards_a_fast_upstream() {
    let timed = sleep(Duration::from_millis(1))
        .then(|()| Ok(Resolution::Value(5)))
        .timeout(Duration::from_secs(3600));
    pump();
    assert_eq!(timed.result().unwrap().unwrap(), 5);
}

#[test]
fn timeout_rejects_and_cancels_a_slow_upstream() {
    let upstream_cancelled_with = Rc::new(Cell::new(false));
    let flag = upstream_cancelled_with.clone();
    let (never, _resolver) = Awaitable::<i32>::pending_with_canceller(move |_, reason| {
        assert!(matches!(&*reason, Fault::Timeout { .. }));
        flag.set(true);
    });

    let timed = never.timeout(Duration::from_millis(10));
    pump();

    let reason = timed.result().unwrap().unwrap_err();
    assert!(matches!(&*reason, Fault::Timeout { .. }));
    assert!(upstream_cancelled_with.get());
}

#[test]
fn timeout_with_carries_a_custom_reason() {
    let (never, _resolver) = Awaitable::<i32>::pending();
    let timed = never.timeout_with(
        Duration::from_millis(5),
        Fault::other("deadline blown"),
    );
    pump();
    assert_eq!(timed.result().unwrap().unwrap_err().to_string(), "deadline blown");
}

#[test]
fn cancelling_a_sleep_frees_its_timer() {
    let slept = sleep(Duration::from_secs(3600));
    slept.cancel();
    pump();
    assert!(slept.is_rejected());
}
