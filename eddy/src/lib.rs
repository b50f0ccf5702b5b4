// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll kqueue signo

//! # Single-threaded cooperative async runtime
//!
//! `r3bl_eddy` multiplexes long-running I/O, timer, signal, and
//! cross-task coordination flows over one OS thread. Three subsystems
//! cooperate:
//!
//! 1. **[`Awaitable`]**: a single-assignment promise cell with `then` /
//!    `catch` / `done` chaining, refcounted cancellation, timer adapters
//!    (`delay`, `timeout`), and collection combinators (`all`, `any`,
//!    `choose`, `settle`, ...). Continuations always run through the
//!    loop's deferred queue, never re-entrantly.
//! 2. **[`Task`]**: the coroutine driver. It consumes a [`Generator`]
//!    (a suspendable computation that yields awaitables and receives
//!    their results) and drives it to completion, producing an awaitable
//!    for the final value.
//! 3. **[`Loop`]**: a watcher-based reactor. I/O readiness (epoll/kqueue
//!    via [`mio`], with a `poll(2)` fallback), one-shot and periodic
//!    timers, idle immediates, UNIX signal delivery, and a bounded
//!    deferred-callback queue, all with deterministic tick ordering.
//!    Referenced watchers keep [`Loop::run()`] alive; unreferenced ones
//!    still fire but let the loop exit.
//!
//! The [`facade`] module exposes free functions against a thread-default
//! loop, which is the surface stream and socket layers build on.
//!
//! # Example
//!
//! ```
//! use r3bl_eddy::{LoopExit, facade};
//! use std::{cell::Cell, rc::Rc, time::Duration};
//!
//! let fired = Rc::new(Cell::new(false));
//! let fired_in_cb = fired.clone();
//! let _timer = facade::timer(Duration::from_millis(5), move || {
//!     fired_in_cb.set(true);
//! });
//! let exit = facade::run().unwrap();
//! assert_eq!(exit, LoopExit::Emptied);
//! assert!(fired.get());
//! # facade::clear();
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]

// Attach.
pub mod awaitable;
pub mod coroutine;
pub mod error;
pub mod facade;
pub mod reactor;

// Re-export.
pub use awaitable::{ArmOutcome, Awaitable, Flow, Resolution, Resolver, sleep};
pub use coroutine::{Generator, Step, Task, Yielded};
pub use error::{Fault, LoopError, Reason, Settled, WatcherKind};
pub use reactor::{BackendChoice, Immediate, IoInterest, IoWatcher, Loop, LoopBuilder,
                  LoopExit, QueueDepth, Readiness, Signal, TickMode, Timer};
