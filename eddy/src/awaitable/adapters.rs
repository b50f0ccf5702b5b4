// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Timer-backed adapters: [`delay`], [`timeout`], and the free-standing
//! [`sleep`]. All of them arm a one-shot timer on the thread-default loop
//! and free it again when the derived awaitable settles or is cancelled.
//!
//! [`delay`]: Awaitable::delay
//! [`timeout`]: Awaitable::timeout

use crate::{Fault, Reason, facade, reactor::timer::Timer};
use std::{cell::RefCell, rc::Rc, time::Duration};

use super::state::Awaitable;

type TimerSlot = Rc<RefCell<Option<Timer>>>;

fn free_slot(slot: &TimerSlot) {
    if let Some(timer) = slot.borrow_mut().take() {
        timer.free();
    }
}

impl<T: Clone + 'static> Awaitable<T> {
    /// Passes the fulfilment value along after `duration`. Rejection is
    /// forwarded immediately. Cancelling the result stops the timer and
    /// withdraws interest upstream.
    pub fn delay(&self, duration: Duration) -> Awaitable<T> {
        self.inc_dependents();
        let upstream = self.clone();
        let slot: TimerSlot = Rc::new(RefCell::new(None));

        let cancel_slot = slot.clone();
        let (child, resolver) = Awaitable::pending_with_canceller(move |_, reason| {
            free_slot(&cancel_slot);
            upstream.cancel_with(reason);
        });

        self.subscribe(Box::new(move |settled| match settled {
            Ok(value) => {
                let mut payload = Some(value);
                let timer_resolver = resolver.clone();
                let timer = facade::timer(duration, move || {
                    if let Some(value) = payload.take() {
                        timer_resolver.fulfill(value);
                    }
                });
                *slot.borrow_mut() = Some(timer);
            }
            Err(reason) => resolver.reject(reason),
        }));
        child
    }

    /// Races the upstream against a timer started now. If the timer wins,
    /// the result rejects with [`Fault::Timeout`] and the upstream is
    /// cancelled with the same reason.
    pub fn timeout(&self, duration: Duration) -> Awaitable<T> {
        self.timeout_with(duration, Fault::timeout(duration))
    }

    /// [`timeout()`](Self::timeout) with a caller-supplied reason.
    pub fn timeout_with(&self, duration: Duration, reason: Reason) -> Awaitable<T> {
        self.inc_dependents();
        let slot: TimerSlot = Rc::new(RefCell::new(None));

        let cancel_upstream = self.clone();
        let cancel_slot = slot.clone();
        let (child, resolver) = Awaitable::pending_with_canceller(move |_, cancel_reason| {
            free_slot(&cancel_slot);
            cancel_upstream.cancel_with(cancel_reason);
        });

        let timer = facade::timer(duration, {
            let resolver = resolver.clone();
            let upstream = self.clone();
            move || {
                resolver.reject(reason.clone());
                upstream.cancel_with(reason.clone());
            }
        });
        *slot.borrow_mut() = Some(timer);

        self.subscribe(Box::new(move |settled| {
            free_slot(&slot);
            match settled {
                Ok(value) => resolver.fulfill(value),
                Err(reason) => resolver.reject(reason),
            }
        }));
        child
    }
}

/// Fulfils with `()` after `duration` on the thread-default loop.
/// Cancelling it frees the timer.
#[must_use]
pub fn sleep(duration: Duration) -> Awaitable<()> {
    let slot: TimerSlot = Rc::new(RefCell::new(None));
    let cancel_slot = slot.clone();
    Awaitable::with_canceller(
        move |resolver| {
            let timer = facade::timer(duration, {
                let mut resolver = Some(resolver);
                move || {
                    if let Some(resolver) = resolver.take() {
                        resolver.fulfill(());
                    }
                }
            });
            *slot.borrow_mut() = Some(timer);
            Ok(())
        },
        move |_, _| free_slot(&cancel_slot),
    )
}
