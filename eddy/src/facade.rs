// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words signo reinit

//! Free-function accessors that forward to the thread-default [`Loop`].
//!
//! This is the surface collaborators (stream and socket layers, awaitable
//! internals) consume: they never hold a loop, they ask for "the" loop.
//! Exactly one default loop exists per thread; [`replace()`] swaps it (not
//! while running) and [`with_loop()`] scopes a temporary default for the
//! duration of a closure, restoring the previous one on every exit path.
//!
//! The write-readiness accessor is named [`wait()`] because `await` is a
//! reserved word in Rust.

use crate::{Loop, LoopError, LoopExit, QueueDepth, Reason, TickMode,
            reactor::{immediate::Immediate,
                      io::{IoWatcher, Readiness},
                      signal::Signal,
                      timer::Timer}};
use std::{cell::RefCell, os::fd::RawFd, time::Duration};

thread_local! {
    static DEFAULT_LOOP: RefCell<Option<Loop>> = const { RefCell::new(None) };
}

/// The thread-default loop, created lazily on first access.
#[must_use]
pub fn current() -> Loop {
    DEFAULT_LOOP.with(|slot| {
        let mut slot = slot.borrow_mut();
        slot.get_or_insert_with(Loop::new).clone()
    })
}

/// Replaces the thread-default loop, returning the previous one (if any
/// had been created).
///
/// # Errors
///
/// [`LoopError::ReplaceWhileRunning`] when the current default is running.
pub fn replace(new_loop: Loop) -> Result<Option<Loop>, LoopError> {
    DEFAULT_LOOP.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.as_ref().is_some_and(Loop::is_running) {
            return Err(LoopError::ReplaceWhileRunning);
        }
        Ok(slot.replace(new_loop))
    })
}

/// Runs `worker` with `alt` (or a fresh loop) installed as the
/// thread-default, restoring the previous default afterwards, panics
/// included.
///
/// # Errors
///
/// [`LoopError::ReplaceWhileRunning`] when the current default is running.
pub fn with_loop<R>(
    alt: Option<Loop>,
    worker: impl FnOnce(&Loop) -> R,
) -> Result<R, LoopError> {
    struct RestoreGuard {
        previous: Option<Loop>,
    }
    impl Drop for RestoreGuard {
        fn drop(&mut self) {
            let previous = self.previous.take();
            DEFAULT_LOOP.with(|slot| *slot.borrow_mut() = previous);
        }
    }

    let scoped = alt.unwrap_or_default();
    let previous = replace(scoped.clone())?;
    let _guard = RestoreGuard { previous };
    Ok(worker(&scoped))
}

// ─── Watcher constructors on the default loop ───

/// Creates a readable-readiness watcher on the default loop.
///
/// # Errors
///
/// See [`Loop::poll()`].
pub fn poll(
    fd: RawFd,
    callback: impl FnMut(RawFd, Readiness) + 'static,
) -> Result<IoWatcher, LoopError> {
    current().poll(fd, callback)
}

/// Creates a writable-readiness watcher on the default loop.
///
/// # Errors
///
/// See [`Loop::wait()`].
pub fn wait(
    fd: RawFd,
    callback: impl FnMut(RawFd, Readiness) + 'static,
) -> Result<IoWatcher, LoopError> {
    current().wait(fd, callback)
}

/// One-shot timer on the default loop.
pub fn timer(interval: Duration, callback: impl FnMut() + 'static) -> Timer {
    current().timer(interval, callback)
}

/// Periodic timer on the default loop.
pub fn periodic(interval: Duration, callback: impl FnMut() + 'static) -> Timer {
    current().periodic(interval, callback)
}

/// Immediate callback on the default loop.
pub fn immediate(callback: impl FnOnce() + 'static) -> Immediate {
    current().immediate(callback)
}

/// Signal watcher on the default loop.
///
/// # Errors
///
/// See [`Loop::signal()`].
pub fn signal(signo: i32, callback: impl FnMut(i32) + 'static) -> Result<Signal, LoopError> {
    current().signal(signo, callback)
}

// ─── Deferred queue ───

/// Enqueues a deferred callback on the default loop.
pub fn queue(callback: impl FnOnce() + 'static) { current().queue(callback); }

/// Replaces the default loop's per-tick drain budget, returning the
/// previous one.
pub fn set_queue_depth(depth: QueueDepth) -> QueueDepth { current().set_queue_depth(depth) }

// ─── Lifecycle ───

/// # Errors
///
/// See [`Loop::tick()`].
pub fn tick(mode: TickMode) -> Result<(), LoopError> { current().tick(mode) }

/// # Errors
///
/// See [`Loop::run()`].
pub fn run() -> Result<LoopExit, LoopError> { current().run() }

/// # Errors
///
/// See [`Loop::run_with()`].
pub fn run_with(init: impl FnOnce() + 'static) -> Result<LoopExit, LoopError> {
    current().run_with(init)
}

pub fn stop() { current().stop(); }

#[must_use]
pub fn is_running() -> bool { current().is_running() }

#[must_use]
pub fn is_empty() -> bool { current().is_empty() }

pub fn clear() { current().clear(); }

/// # Errors
///
/// See [`Loop::re_init()`].
pub fn re_init() -> Result<(), LoopError> { current().re_init() }

#[must_use]
pub fn signals_enabled() -> bool { current().signals_enabled() }

// ─── Crate-internal scheduling glue ───

/// Schedules a callback through the default loop's deferred queue. This is
/// how awaitable continuations and coroutine advances stay off the caller's
/// stack.
pub(crate) fn schedule(callback: Box<dyn FnOnce()>) {
    current().queue(callback);
}

/// Reports a rejection that reached a `done` chain with no handler.
pub(crate) fn report_uncaught(reason: Reason) {
    current().report_uncaught(reason);
}
