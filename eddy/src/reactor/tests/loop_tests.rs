// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Loop lifecycle, timers, immediates, and the deferred queue.

use crate::{Loop, LoopError, LoopExit, QueueDepth, TickMode};
use pretty_assertions::assert_eq;
use std::{cell::{Cell, RefCell},
          rc::Rc,
          time::{Duration, Instant}};

#[test]
fn one_shot_timer_fires_once_and_the_loop_empties() {
    super::init_tracing();
    let event_loop = Loop::new();
    let fired = Rc::new(Cell::new(0));
    let fired_in_cb = fired.clone();
    let started = Instant::now();
    let _timer = event_loop.timer(Duration::from_millis(50), move || {
        fired_in_cb.set(fired_in_cb.get() + 1);
    });

    let exit = event_loop.run().unwrap();

    assert_eq!(exit, LoopExit::Emptied);
    assert_eq!(fired.get(), 1);
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[test]
fn periodic_timer_fires_until_stopped_with_full_intervals() {
    let event_loop = Loop::new();
    let firings: Rc<RefCell<Vec<Instant>>> = Rc::new(RefCell::new(Vec::new()));
    let firings_in_cb = firings.clone();
    let loop_in_cb = event_loop.clone();
    let _timer = event_loop.periodic(Duration::from_millis(10), move || {
        firings_in_cb.borrow_mut().push(Instant::now());
        if firings_in_cb.borrow().len() == 5 {
            loop_in_cb.stop();
        }
    });

    let exit = event_loop.run().unwrap();

    assert_eq!(exit, LoopExit::Stopped);
    let firings = firings.borrow();
    assert_eq!(firings.len(), 5);
    for pair in firings.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(10));
    }
}

#[test]
fn stopping_a_timer_prevents_its_firing() {
    let event_loop = Loop::new();
    let fired = Rc::new(Cell::new(false));
    let fired_in_cb = fired.clone();
    let timer = event_loop.timer(Duration::from_millis(1), move || fired_in_cb.set(true));
    timer.stop().unwrap();
    assert_eq!(event_loop.run().unwrap(), LoopExit::Emptied);
    assert!(!fired.get());
}

#[test]
fn freed_timer_reports_freed_on_every_operation() {
    let event_loop = Loop::new();
    let timer = event_loop.timer(Duration::from_secs(1), || {});
    timer.free();
    timer.free(); // idempotent
    assert!(matches!(timer.start(), Err(LoopError::Freed { .. })));
    assert!(matches!(timer.stop(), Err(LoopError::Freed { .. })));
    assert!(matches!(timer.reference(), Err(LoopError::Freed { .. })));
}

#[test]
fn unreferenced_timer_does_not_keep_the_loop_alive() {
    let event_loop = Loop::new();
    let fired = Rc::new(Cell::new(false));
    let fired_in_cb = fired.clone();
    let timer = event_loop.timer(Duration::from_millis(5), move || fired_in_cb.set(true));
    timer.unreference().unwrap();

    assert!(event_loop.is_empty());
    assert_eq!(event_loop.run().unwrap(), LoopExit::Emptied);
    assert!(!fired.get());
}

#[test]
fn deferred_callbacks_run_fifo() {
    let event_loop = Loop::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    for label in ["a", "b", "c"] {
        let order = order.clone();
        event_loop.queue(move || order.borrow_mut().push(label));
    }
    event_loop.run().unwrap();
    assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
}

#[test]
fn queue_depth_bounds_one_drain() {
    let event_loop = Loop::new();
    event_loop.set_queue_depth(QueueDepth::Bounded(2));
    let ran = Rc::new(Cell::new(0));
    for _ in 0..4 {
        let ran = ran.clone();
        event_loop.queue(move || ran.set(ran.get() + 1));
    }

    event_loop.tick(TickMode::NonBlocking).unwrap();
    assert_eq!(ran.get(), 2);
    event_loop.tick(TickMode::NonBlocking).unwrap();
    assert_eq!(ran.get(), 4);
}

#[test]
fn callbacks_queued_during_a_drain_run_within_the_budget() {
    let event_loop = Loop::new();
    let ran = Rc::new(Cell::new(0));
    let ran_in_cb = ran.clone();
    let loop_in_cb = event_loop.clone();
    event_loop.queue(move || {
        ran_in_cb.set(ran_in_cb.get() + 1);
        let ran_inner = ran_in_cb.clone();
        loop_in_cb.queue(move || ran_inner.set(ran_inner.get() + 1));
    });

    event_loop.tick(TickMode::NonBlocking).unwrap();
    // Both the original and the freshly queued callback fit the default
    // budget, so they share a tick.
    assert_eq!(ran.get(), 2);
}

#[test]
fn queued_callbacks_survive_stop() {
    let event_loop = Loop::new();
    event_loop.set_queue_depth(QueueDepth::Bounded(1));
    let ran = Rc::new(Cell::new(false));
    let loop_in_cb = event_loop.clone();
    event_loop.queue(move || loop_in_cb.stop());
    {
        let ran = ran.clone();
        event_loop.queue(move || ran.set(true));
    }

    assert_eq!(event_loop.run().unwrap(), LoopExit::Stopped);
    assert!(!ran.get());

    // The callback left behind drains on the next run.
    assert_eq!(event_loop.run().unwrap(), LoopExit::Emptied);
    assert!(ran.get());
}

#[test]
fn immediate_runs_when_the_loop_is_idle() {
    let event_loop = Loop::new();
    let ran = Rc::new(Cell::new(false));
    let ran_in_cb = ran.clone();
    let _immediate = event_loop.immediate(move || ran_in_cb.set(true));
    assert_eq!(event_loop.run().unwrap(), LoopExit::Emptied);
    assert!(ran.get());
}

#[test]
fn immediates_wait_for_a_tick_with_no_other_activity() {
    let event_loop = Loop::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    {
        let order = order.clone();
        let _immediate = event_loop.immediate(move || order.borrow_mut().push("immediate"));
    }
    {
        let order = order.clone();
        let _timer = event_loop.timer(Duration::ZERO, move || order.borrow_mut().push("timer"));
    }
    event_loop.run().unwrap();
    // The timer made its tick active, so the immediate ran a tick later.
    assert_eq!(*order.borrow(), vec!["timer", "immediate"]);
}

#[test]
fn freed_immediate_never_runs() {
    let event_loop = Loop::new();
    let ran = Rc::new(Cell::new(false));
    let ran_in_cb = ran.clone();
    let immediate = event_loop.immediate(move || ran_in_cb.set(true));
    immediate.free();
    assert!(event_loop.is_empty());
    event_loop.run().unwrap();
    assert!(!ran.get());
}

#[test]
fn non_blocking_tick_on_an_empty_loop_returns_promptly() {
    let event_loop = Loop::new();
    let started = Instant::now();
    event_loop.tick(TickMode::NonBlocking).unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(event_loop.is_empty());
}

#[test]
fn run_inside_a_callback_reports_already_running() {
    let event_loop = Loop::new();
    let observed = Rc::new(RefCell::new(None));
    let observed_in_cb = observed.clone();
    let loop_in_cb = event_loop.clone();
    event_loop.queue(move || {
        *observed_in_cb.borrow_mut() = Some(loop_in_cb.run());
    });
    event_loop.run().unwrap();
    assert!(matches!(
        observed.borrow_mut().take(),
        Some(Err(LoopError::AlreadyRunning))
    ));
}

#[test]
fn stop_from_a_callback_exits_as_stopped() {
    let event_loop = Loop::new();
    let loop_in_cb = event_loop.clone();
    let _timer = event_loop.periodic(Duration::from_millis(1), move || loop_in_cb.stop());
    assert_eq!(event_loop.run().unwrap(), LoopExit::Stopped);
    assert!(!event_loop.is_running());
}

#[test]
fn clear_removes_every_watcher() {
    let event_loop = Loop::new();
    let _timer = event_loop.timer(Duration::from_secs(3600), || {});
    let _immediate = event_loop.immediate(|| {});
    assert!(!event_loop.is_empty());
    event_loop.clear();
    assert!(event_loop.is_empty());
}

#[test]
fn timer_callback_can_restart_its_own_timer() {
    let event_loop = Loop::new();
    let fired = Rc::new(Cell::new(0));
    let timer_slot: Rc<RefCell<Option<crate::Timer>>> = Rc::new(RefCell::new(None));
    let fired_in_cb = fired.clone();
    let slot_in_cb = timer_slot.clone();
    let timer = event_loop.timer(Duration::from_millis(1), move || {
        let count = fired_in_cb.get() + 1;
        fired_in_cb.set(count);
        if count < 3 {
            if let Some(timer) = slot_in_cb.borrow().as_ref() {
                timer.start().unwrap();
            }
        }
    });
    *timer_slot.borrow_mut() = Some(timer);
    event_loop.run().unwrap();
    assert_eq!(fired.get(), 3);
}
