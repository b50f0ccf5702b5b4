// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The coroutine driver: adapts a [`Generator`] into an [`Awaitable`]
//! task.
//!
//! # State machine
//!
//! ```text
//! new ──► ready ──► (advancing ◄──► awaiting) ──► done
//! ```
//!
//! Construction schedules the first advance on the deferred queue. Each
//! advance resumes the generator once (`current` initially, then `send`
//! with an awaited value or `throw` with an awaited rejection) and
//! dispatches on what it yielded:
//!
//! - a plain value goes straight back in on the next deferred-queue turn
//!   (a zero-cost yield to the loop),
//! - an awaitable suspends the task until it settles,
//! - a nested generator is spawned as a child task and awaited,
//! - `Done` resolves the owning awaitable with the explicit return value,
//!   or with the last value sent into the generator.
//!
//! Cancelling the owning awaitable throws the reason into the generator
//! at every remaining suspension point (cleanup code at each one runs),
//! cancels whatever sub-awaitable is in flight, then rejects.
//!
//! Settling a task clears its generator, resolver, and awaited slot.
//! Those closures otherwise form a cycle (task to awaitable to cancel
//! handler to task), and dropping them on settlement is what lets the
//! whole structure be reclaimed.

use crate::{Awaitable, Fault, Reason, Resolver, Settled, facade};
use std::{cell::RefCell, rc::Rc};

use super::generator::{Generator, Step, Yielded};

enum Advance<T> {
    Initial,
    Send(T),
    Throw(Reason),
}

struct TaskCore<T: Clone + 'static> {
    generator: Option<Box<dyn Generator<T>>>,
    resolver: Option<Resolver<T>>,
    /// The sub-awaitable the task is currently suspended on.
    awaiting: Option<Awaitable<T>>,
    last_sent: Option<T>,
    paused: bool,
    /// An advance that arrived while paused; replayed on resume.
    stashed: Option<Advance<T>>,
    finished: bool,
}

/// A running coroutine. The task itself is a handle: clone it, pause and
/// resume it, or take its [`awaitable()`] to chain on the outcome.
///
/// [`awaitable()`]: Self::awaitable
pub struct Task<T: Clone + 'static> {
    core: Rc<RefCell<TaskCore<T>>>,
    awaitable: Awaitable<T>,
}

impl<T: Clone + 'static> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self { core: self.core.clone(), awaitable: self.awaitable.clone() }
    }
}

impl<T: Clone + 'static> Task<T> {
    /// Starts driving `generator`. The first advance happens on the next
    /// deferred-queue drain, not inside this call.
    pub fn spawn(generator: impl Generator<T> + 'static) -> Self {
        let core = Rc::new(RefCell::new(TaskCore {
            generator: Some(Box::new(generator)),
            resolver: None,
            awaiting: None,
            last_sent: None,
            paused: false,
            stashed: None,
            finished: false,
        }));
        let cancel_core = core.clone();
        let (awaitable, resolver) = Awaitable::pending_with_canceller(move |_, reason| {
            cancel_task(&cancel_core, reason);
        });
        core.borrow_mut().resolver = Some(resolver);
        schedule_advance(&core, Advance::Initial);
        Task { core, awaitable }
    }

    /// The awaitable that settles with the generator's outcome.
    #[must_use]
    pub fn awaitable(&self) -> Awaitable<T> { self.awaitable.clone() }

    /// Stops advancing. An advance that arrives while paused is stashed
    /// and replayed on [`resume()`](Self::resume).
    pub fn pause(&self) { self.core.borrow_mut().paused = true; }

    /// Resumes advancing, replaying the stashed advance if one arrived
    /// while paused.
    pub fn resume(&self) {
        let stashed = {
            let mut core = self.core.borrow_mut();
            if !core.paused {
                return;
            }
            core.paused = false;
            core.stashed.take()
        };
        if let Some(advance) = stashed {
            schedule_advance(&self.core, advance);
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool { self.core.borrow().paused }

    #[must_use]
    pub fn is_done(&self) -> bool { self.core.borrow().finished }

    /// Cancels the task (and the generator's remaining suspension points)
    /// with the default cancellation reason.
    pub fn cancel(&self) { self.awaitable.cancel(); }

    /// Cancels with a caller-supplied reason.
    pub fn cancel_with(&self, reason: Reason) { self.awaitable.cancel_with(reason); }
}

impl<T: Clone + 'static> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.borrow();
        f.debug_struct("Task")
            .field("paused", &core.paused)
            .field("awaiting", &core.awaiting.is_some())
            .field("finished", &core.finished)
            .finish()
    }
}

fn schedule_advance<T: Clone + 'static>(core: &Rc<RefCell<TaskCore<T>>>, advance: Advance<T>) {
    let core = core.clone();
    facade::schedule(Box::new(move || advance_task(&core, advance)));
}

/// One turn of the driver: resume the generator, dispatch on the step.
fn advance_task<T: Clone + 'static>(core: &Rc<RefCell<TaskCore<T>>>, advance: Advance<T>) {
    {
        let mut c = core.borrow_mut();
        if c.finished {
            return;
        }
        if c.paused {
            c.stashed = Some(advance);
            return;
        }
    }
    let Some(mut generator) = core.borrow_mut().generator.take() else {
        return;
    };
    let step = match advance {
        Advance::Initial => generator.current(),
        Advance::Send(value) => {
            core.borrow_mut().last_sent = Some(value.clone());
            generator.send(value)
        }
        Advance::Throw(reason) => generator.throw(reason),
    };
    {
        let mut c = core.borrow_mut();
        if c.finished {
            // The generator body cancelled its own task.
            return;
        }
        c.generator = Some(generator);
    }

    match step {
        Err(reason) => finalize(core, Err(reason)),
        Ok(Step::Done(Some(value))) => finalize(core, Ok(value)),
        Ok(Step::Done(None)) => {
            let last = core.borrow_mut().last_sent.take();
            match last {
                Some(value) => finalize(core, Ok(value)),
                None => finalize(
                    core,
                    Err(Fault::logic("generator finished without producing a value")),
                ),
            }
        }
        Ok(Step::Yield(Yielded::Value(value))) => {
            schedule_advance(core, Advance::Send(value));
        }
        Ok(Step::Yield(Yielded::Awaitable(awaitable))) => await_on(core, awaitable),
        Ok(Step::Yield(Yielded::Nested(nested))) => {
            let child = Task::spawn(nested);
            await_on(core, child.awaitable());
        }
    }
}

/// Suspends the task on `awaitable`: its value is sent back into the
/// generator, its rejection is thrown back in.
fn await_on<T: Clone + 'static>(core: &Rc<RefCell<TaskCore<T>>>, awaitable: Awaitable<T>) {
    core.borrow_mut().awaiting = Some(awaitable.clone());
    let worker = core.clone();
    let pitch = core.clone();
    awaitable.done_or(
        move |value| {
            worker.borrow_mut().awaiting = None;
            advance_task(&worker, Advance::Send(value));
        },
        move |reason| {
            pitch.borrow_mut().awaiting = None;
            advance_task(&pitch, Advance::Throw(reason));
        },
    );
}

/// Throws `reason` at every remaining suspension point, cancels the
/// in-flight sub-awaitable, then finalizes as rejected.
fn cancel_task<T: Clone + 'static>(core: &Rc<RefCell<TaskCore<T>>>, reason: Reason) {
    let (awaiting, generator) = {
        let mut c = core.borrow_mut();
        if c.finished {
            return;
        }
        (c.awaiting.take(), c.generator.take())
    };
    if let Some(awaiting) = awaiting {
        awaiting.cancel_with(reason.clone());
    }
    if let Some(mut generator) = generator {
        while generator.valid() {
            match generator.throw(reason.clone()) {
                Ok(Step::Yield(_)) => {}
                Ok(Step::Done(_)) | Err(_) => break,
            }
        }
    }
    finalize(core, Err(reason));
}

/// Resolves or rejects the owning awaitable and clears every slot that
/// holds a closure or the generator.
fn finalize<T: Clone + 'static>(core: &Rc<RefCell<TaskCore<T>>>, outcome: Settled<T>) {
    let resolver = {
        let mut c = core.borrow_mut();
        if c.finished {
            return;
        }
        c.finished = true;
        c.generator = None;
        c.awaiting = None;
        c.stashed = None;
        c.last_sent = None;
        c.resolver.take()
    };
    if let Some(resolver) = resolver {
        match outcome {
            Ok(value) => resolver.fulfill(value),
            Err(reason) => resolver.reject(reason),
        }
    }
}
