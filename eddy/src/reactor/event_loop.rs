// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words signo reinit

//! The event loop: a single-threaded reactor driving four watcher kinds
//! plus a deferred-callback queue.
//!
//! # Tick anatomy
//!
//! One [`tick()`] runs the phases below, in this order, every time:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ 1. deferred queue   drain up to the configured depth        │
//! │ 2. signals          dispatch signos delivered since last    │
//! │                     tick (coalesced, registration order)    │
//! │ 3. timers           fire everything with expiry <= now      │
//! │                     (expiry order, insertion order on ties) │
//! │ 4. io poll          block until readiness / next deadline,  │
//! │                     fire ready + timed-out watchers         │
//! │ 5. immediates       only when phases 2..4 saw no activity   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`run()`] repeats ticks until the loop [`is_empty()`] (no referenced
//! armed watcher, no queued deferred callback) or [`stop()`] is called.
//! Unreferenced watchers still fire when ready; they just do not keep the
//! loop alive.
//!
//! Callbacks run with no loop internals borrowed, so they are free to
//! create watchers, queue callbacks, or stop the loop.
//!
//! [`is_empty()`]: Loop::is_empty
//! [`run()`]: Loop::run
//! [`stop()`]: Loop::stop
//! [`tick()`]: Loop::tick

use crate::{LoopError, Reason};
use smallvec::SmallVec;
use std::{cell::RefCell,
          os::fd::RawFd,
          rc::Rc,
          time::{Duration, Instant}};

use super::{backend::{self, BackendChoice, PollBackend, ReadyTokens, WAKE_TOKEN},
            deferred::{DeferredQueue, QueueDepth},
            immediate::{Immediate, ImmediateManager},
            io::{IoInterest, IoManager, IoState, IoWatcher, Readiness},
            signal::{Signal, SignalManager, SignalState},
            timer::{Timer, TimerManager}};

/// Whether a tick may block in the poll phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    Blocking,
    NonBlocking,
}

/// Why [`Loop::run()`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// No referenced watcher pending and no deferred callback queued.
    Emptied,
    /// [`Loop::stop()`] was called.
    Stopped,
}

/// Whether this loop installs process signal handlers.
pub(crate) enum SignalsSlot {
    Disabled,
    /// Enabled, wake pipe not created yet (first `signal()` call does it).
    Uninitialized,
    Ready(SignalManager),
}

type UncaughtHandler = Box<dyn FnMut(Reason)>;

#[allow(missing_debug_implementations)]
pub(crate) struct LoopCore {
    pub deferred: DeferredQueue,
    pub io: IoManager,
    pub timers: TimerManager,
    pub immediates: ImmediateManager,
    pub signals: SignalsSlot,
    pub backend: Box<dyn PollBackend>,
    pub running: bool,
    pub stopped: bool,
    /// First unhandled rejection of this run; surfaced at the tick
    /// boundary.
    pub uncaught: Option<Reason>,
    pub uncaught_handler: Option<UncaughtHandler>,
}

impl LoopCore {
    pub fn listen_io(
        &mut self,
        state: &Rc<RefCell<IoState>>,
        timeout: Option<Duration>,
    ) -> Result<(), LoopError> {
        let (fd, interest, already_armed) = {
            let s = state.borrow();
            (s.fd, s.interest, s.pending)
        };
        if !already_armed {
            self.backend
                .register(fd, interest, token_for(fd))
                .map_err(LoopError::Backend)?;
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        self.io.arm(state, deadline);
        tracing::trace!("armed fd {fd} ({interest:?}, timeout {timeout:?})");
        Ok(())
    }

    pub fn cancel_io(&mut self, state: &Rc<RefCell<IoState>>) {
        if self.io.disarm(state) {
            let fd = state.borrow().fd;
            let _ = self.backend.deregister(fd);
        }
    }

    pub fn free_io(&mut self, state: &Rc<RefCell<IoState>>) {
        let (fd, was_armed) = {
            let s = state.borrow();
            (s.fd, s.pending)
        };
        if was_armed {
            let _ = self.backend.deregister(fd);
        }
        self.io.remove(state);
        tracing::debug!("io watcher for fd {fd} freed");
    }

    pub fn free_signal(&mut self, state: &Rc<RefCell<SignalState>>) {
        if let SignalsSlot::Ready(manager) = &mut self.signals {
            manager.remove(state);
        }
    }

    fn ensure_signals(&mut self) -> Result<&mut SignalManager, LoopError> {
        match self.signals {
            SignalsSlot::Disabled => return Err(LoopError::SignalsUnsupported),
            SignalsSlot::Ready(_) => {}
            SignalsSlot::Uninitialized => {
                let manager = SignalManager::new().map_err(LoopError::Backend)?;
                self.backend
                    .register(manager.wake_read_fd(), IoInterest::Readable, WAKE_TOKEN)
                    .map_err(LoopError::Backend)?;
                self.signals = SignalsSlot::Ready(manager);
            }
        }
        match &mut self.signals {
            SignalsSlot::Ready(manager) => Ok(manager),
            // Unreachable: the match above either returned or installed.
            SignalsSlot::Disabled | SignalsSlot::Uninitialized => {
                Err(LoopError::SignalsUnsupported)
            }
        }
    }
}

fn token_for(fd: RawFd) -> u64 {
    // Fds are non-negative, so the cast round-trips.
    u64::try_from(fd).unwrap_or(0)
}

/// Configuration for a [`Loop`] before it is built.
#[derive(Debug, Clone, Copy)]
pub struct LoopBuilder {
    backend: BackendChoice,
    signals_enabled: bool,
    queue_depth: QueueDepth,
}

impl Default for LoopBuilder {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            signals_enabled: true,
            queue_depth: QueueDepth::default(),
        }
    }
}

impl LoopBuilder {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn backend(mut self, choice: BackendChoice) -> Self {
        self.backend = choice;
        self
    }

    /// Loops with signals disabled reject [`Loop::signal()`] with
    /// [`LoopError::SignalsUnsupported`].
    #[must_use]
    pub fn enable_signals(mut self, enabled: bool) -> Self {
        self.signals_enabled = enabled;
        self
    }

    #[must_use]
    pub fn queue_depth(mut self, depth: QueueDepth) -> Self {
        self.queue_depth = depth;
        self
    }

    /// # Errors
    ///
    /// [`LoopError::Backend`] when an explicitly requested accelerated
    /// backend cannot be created ([`BackendChoice::Auto`] never fails, it
    /// falls back to `poll(2)`).
    pub fn build(self) -> Result<Loop, LoopError> {
        let backend = backend::select(self.backend).map_err(LoopError::Backend)?;
        Ok(Loop::from_parts(backend, self.signals_enabled, self.queue_depth))
    }
}

/// Handle to an event loop. Cloning is cheap and refers to the same loop.
#[derive(Clone)]
pub struct Loop {
    pub(crate) core: Rc<RefCell<LoopCore>>,
}

impl Default for Loop {
    fn default() -> Self { Self::new() }
}

impl Loop {
    /// A loop with the preferred backend, signals enabled, and the default
    /// deferred-queue depth.
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(backend::select_auto(), true, QueueDepth::default())
    }

    #[must_use]
    pub fn builder() -> LoopBuilder { LoopBuilder::new() }

    fn from_parts(
        backend: Box<dyn PollBackend>,
        signals_enabled: bool,
        queue_depth: QueueDepth,
    ) -> Self {
        let mut deferred = DeferredQueue::default();
        deferred.set_depth(queue_depth);
        let signals = if signals_enabled {
            SignalsSlot::Uninitialized
        } else {
            SignalsSlot::Disabled
        };
        tracing::debug!("event loop created ({} backend)", backend.name());
        Self {
            core: Rc::new(RefCell::new(LoopCore {
                deferred,
                io: IoManager::default(),
                timers: TimerManager::default(),
                immediates: ImmediateManager::default(),
                signals,
                backend,
                running: false,
                stopped: false,
                uncaught: None,
                uncaught_handler: None,
            })),
        }
    }

    // ─── Watcher constructors ───

    /// A readable-readiness watcher for `fd`. Armed on creation with no
    /// timeout.
    ///
    /// # Errors
    ///
    /// [`LoopError::ResourceBusy`] when `fd` already backs a watcher on
    /// this loop; [`LoopError::Backend`] if the backend rejects the fd.
    pub fn poll(
        &self,
        fd: RawFd,
        callback: impl FnMut(RawFd, Readiness) + 'static,
    ) -> Result<IoWatcher, LoopError> {
        self.io_watcher(fd, IoInterest::Readable, callback)
    }

    /// A writable-readiness watcher for `fd`. Armed on creation with no
    /// timeout.
    ///
    /// # Errors
    ///
    /// Same as [`poll()`](Self::poll).
    pub fn wait(
        &self,
        fd: RawFd,
        callback: impl FnMut(RawFd, Readiness) + 'static,
    ) -> Result<IoWatcher, LoopError> {
        self.io_watcher(fd, IoInterest::Writable, callback)
    }

    /// # Errors
    ///
    /// Same as [`poll()`](Self::poll).
    pub fn io_watcher(
        &self,
        fd: RawFd,
        interest: IoInterest,
        callback: impl FnMut(RawFd, Readiness) + 'static,
    ) -> Result<IoWatcher, LoopError> {
        let mut core = self.core.borrow_mut();
        let state = core.io.create(fd, interest, Box::new(callback))?;
        if let Err(error) = core.listen_io(&state, None) {
            core.io.remove(&state);
            return Err(error);
        }
        Ok(IoWatcher { state, owner: Rc::downgrade(&self.core) })
    }

    /// A one-shot timer, armed on creation.
    pub fn timer(&self, interval: Duration, callback: impl FnMut() + 'static) -> Timer {
        let state = self.core.borrow_mut().timers.create(interval, false, Box::new(callback));
        Timer { state, owner: Rc::downgrade(&self.core) }
    }

    /// A periodic timer, armed on creation. Consecutive firings are at
    /// least `interval` apart (no catch-up after a blocked tick).
    pub fn periodic(&self, interval: Duration, callback: impl FnMut() + 'static) -> Timer {
        let state = self.core.borrow_mut().timers.create(interval, true, Box::new(callback));
        Timer { state, owner: Rc::downgrade(&self.core) }
    }

    /// A callback that runs once the loop has nothing else to do.
    pub fn immediate(&self, callback: impl FnOnce() + 'static) -> Immediate {
        let state = self.core.borrow_mut().immediates.create(Box::new(callback));
        Immediate { state, owner: Rc::downgrade(&self.core) }
    }

    /// A watcher for one UNIX signal.
    ///
    /// # Errors
    ///
    /// [`LoopError::SignalsUnsupported`] when the loop was built with
    /// signals disabled; [`LoopError::Backend`] when the process handler
    /// cannot be installed (e.g. `SIGKILL`).
    pub fn signal(
        &self,
        signo: i32,
        callback: impl FnMut(i32) + 'static,
    ) -> Result<Signal, LoopError> {
        let mut core = self.core.borrow_mut();
        let manager = core.ensure_signals()?;
        let state = manager.create(signo, Box::new(callback))?;
        Ok(Signal { state, owner: Rc::downgrade(&self.core) })
    }

    // ─── Deferred queue ───

    /// Enqueues a callback for the start of the next tick (or later in the
    /// current drain, budget permitting).
    pub fn queue(&self, callback: impl FnOnce() + 'static) {
        self.core.borrow_mut().deferred.push(Box::new(callback));
    }

    /// Replaces the per-tick deferred drain budget, returning the previous
    /// one.
    pub fn set_queue_depth(&self, depth: QueueDepth) -> QueueDepth {
        self.core.borrow_mut().deferred.set_depth(depth)
    }

    #[must_use]
    pub fn queue_depth(&self) -> QueueDepth { self.core.borrow().deferred.depth() }

    // ─── Lifecycle ───

    /// Runs ticks until the loop is empty or stopped.
    ///
    /// # Errors
    ///
    /// [`LoopError::AlreadyRunning`] on re-entrant `run`;
    /// [`LoopError::Uncaught`] when a rejection reached a `done` chain with
    /// no handler; [`LoopError::Backend`] on poll failure.
    pub fn run(&self) -> Result<LoopExit, LoopError> { self.run_impl(None) }

    /// Like [`run()`](Self::run), but invokes `init` before the first
    /// tick (watchers it creates keep the loop alive from the start).
    ///
    /// # Errors
    ///
    /// Same as [`run()`](Self::run).
    pub fn run_with(&self, init: impl FnOnce() + 'static) -> Result<LoopExit, LoopError> {
        self.run_impl(Some(Box::new(init)))
    }

    fn run_impl(&self, init: Option<Box<dyn FnOnce()>>) -> Result<LoopExit, LoopError> {
        {
            let mut core = self.core.borrow_mut();
            if core.running {
                return Err(LoopError::AlreadyRunning);
            }
            core.running = true;
            core.stopped = false;
        }
        let result = self.run_ticks(init);
        self.core.borrow_mut().running = false;
        result
    }

    fn run_ticks(&self, init: Option<Box<dyn FnOnce()>>) -> Result<LoopExit, LoopError> {
        if let Some(init) = init {
            init();
        }
        loop {
            if self.is_empty() {
                return Ok(LoopExit::Emptied);
            }
            if self.core.borrow().stopped {
                return Ok(LoopExit::Stopped);
            }
            self.tick(TickMode::Blocking)?;
        }
    }

    /// Performs exactly one tick.
    ///
    /// # Errors
    ///
    /// [`LoopError::Uncaught`] / [`LoopError::Backend`], as for
    /// [`run()`](Self::run).
    pub fn tick(&self, mode: TickMode) -> Result<(), LoopError> {
        self.tick_phases(mode)?;
        if let Some(reason) = self.core.borrow_mut().uncaught.take() {
            return Err(LoopError::Uncaught(reason));
        }
        Ok(())
    }

    /// Stops [`run()`](Self::run) after the current tick. Queued deferred
    /// callbacks survive and drain on the next tick.
    pub fn stop(&self) {
        let mut core = self.core.borrow_mut();
        if core.running {
            core.stopped = true;
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool { self.core.borrow().running }

    /// True iff no referenced watcher is armed and no deferred callback is
    /// queued. Signal watchers never count.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let core = self.core.borrow();
        core.deferred.is_empty()
            && core.io.referenced_pending() == 0
            && core.timers.referenced_pending() == 0
            && core.immediates.referenced_pending() == 0
    }

    #[must_use]
    pub fn signals_enabled(&self) -> bool {
        !matches!(self.core.borrow().signals, SignalsSlot::Disabled)
    }

    /// Forcibly removes every watcher from every manager.
    pub fn clear(&self) {
        let mut core = self.core.borrow_mut();
        for fd in core.io.armed_fds() {
            let _ = core.backend.deregister(fd);
        }
        core.io.drain_all();
        core.timers.drain_all();
        core.immediates.drain_all();
        if let SignalsSlot::Ready(manager) = &mut core.signals {
            manager.drain_all();
        }
        tracing::debug!("event loop cleared");
    }

    /// Recreates backend state after a `fork()`. Watchers stay registered;
    /// the kernel-side poll set is rebuilt in the child.
    ///
    /// # Errors
    ///
    /// [`LoopError::Backend`] when the backend cannot be recreated.
    pub fn re_init(&self) -> Result<(), LoopError> {
        self.core.borrow_mut().backend.reinit().map_err(LoopError::Backend)
    }

    /// Installs a sink for unhandled rejections. Without one, the first
    /// unhandled rejection makes `run`/`tick` return
    /// [`LoopError::Uncaught`].
    pub fn on_uncaught(&self, handler: impl FnMut(Reason) + 'static) {
        self.core.borrow_mut().uncaught_handler = Some(Box::new(handler));
    }

    pub(crate) fn report_uncaught(&self, reason: Reason) {
        tracing::error!("uncaught error in done chain: {reason}");
        let handler = self.core.borrow_mut().uncaught_handler.take();
        if let Some(mut handler) = handler {
            handler(reason);
            let mut core = self.core.borrow_mut();
            if core.uncaught_handler.is_none() {
                core.uncaught_handler = Some(handler);
            }
        } else {
            let mut core = self.core.borrow_mut();
            if core.uncaught.is_none() {
                core.uncaught = Some(reason);
            }
        }
    }

    // ─── Tick phases ───

    fn tick_phases(&self, mode: TickMode) -> Result<(), LoopError> {
        let mut activity = false;
        self.drain_deferred();
        activity |= self.dispatch_signals();
        activity |= self.run_due_timers();
        activity |= self.poll_io(mode, activity)?;
        if !activity {
            self.run_immediates();
        }
        Ok(())
    }

    /// Phase 1: deferred queue, up to the configured depth.
    fn drain_deferred(&self) {
        let mut ran = 0;
        loop {
            if self.core.borrow().deferred.depth().is_exhausted_by(ran) {
                break;
            }
            let Some(callback) = self.core.borrow_mut().deferred.pop() else {
                break;
            };
            callback();
            ran += 1;
        }
    }

    /// Phase 2: signals delivered since the previous tick, coalesced.
    fn dispatch_signals(&self) -> bool {
        let fired = match &self.core.borrow().signals {
            SignalsSlot::Ready(manager) => manager.take_pending(),
            SignalsSlot::Disabled | SignalsSlot::Uninitialized => Vec::new(),
        };
        let mut activity = false;
        for (signo, watchers) in fired {
            tracing::debug!("dispatching signal {signo} to {} watcher(s)", watchers.len());
            for state in watchers {
                let callback = state.borrow_mut().callback.take();
                if let Some(mut callback) = callback {
                    callback(signo);
                    let mut s = state.borrow_mut();
                    if !s.freed && s.callback.is_none() {
                        s.callback = Some(callback);
                    }
                }
                activity = true;
            }
        }
        activity
    }

    /// Phase 3: timers with expiry <= now, in expiry order.
    fn run_due_timers(&self) -> bool {
        let now = Instant::now();
        let due = self.core.borrow_mut().timers.take_due(now);
        let mut activity = false;
        for state in due {
            activity = true;
            let callback = state.borrow_mut().callback.take();
            let Some(mut callback) = callback else { continue };
            callback();
            let rearm = {
                let mut s = state.borrow_mut();
                if s.freed {
                    false
                } else {
                    if s.callback.is_none() {
                        s.callback = Some(callback);
                    }
                    // Periodic timers re-arm from "now", not from the old
                    // expiry, unless the callback already stopped or
                    // restarted this timer.
                    s.periodic && !s.pending
                }
            };
            if rearm {
                self.core.borrow_mut().timers.arm(&state, Instant::now());
            }
        }
        activity
    }

    /// Phase 4: one poll call, then ready and timed-out io watchers.
    fn poll_io(&self, mode: TickMode, earlier_activity: bool) -> Result<bool, LoopError> {
        let timeout = self.poll_timeout(mode, earlier_activity);
        let mut ready: ReadyTokens = SmallVec::new();
        self.core
            .borrow_mut()
            .backend
            .poll(timeout, &mut ready)
            .map_err(LoopError::Backend)?;

        let mut activity = false;
        for token in ready {
            if token == WAKE_TOKEN {
                if let SignalsSlot::Ready(manager) = &self.core.borrow().signals {
                    manager.drain_wake_pipe();
                }
                // Signos are dispatched by phase 2 of the next tick.
                continue;
            }
            let state = {
                let mut core = self.core.borrow_mut();
                let fd = fd_for(token);
                let Some(state) = core.io.lookup(fd) else { continue };
                if !core.io.disarm(&state) {
                    continue;
                }
                let _ = core.backend.deregister(fd);
                state
            };
            self.fire_io(&state, Readiness::Ready);
            activity = true;
        }

        let now = Instant::now();
        let expired = {
            let mut core = self.core.borrow_mut();
            let expired = core.io.take_timed_out(now);
            for state in &expired {
                let fd = state.borrow().fd;
                let _ = core.backend.deregister(fd);
            }
            expired
        };
        for state in expired {
            self.fire_io(&state, Readiness::TimedOut);
            activity = true;
        }
        Ok(activity)
    }

    fn fire_io(&self, state: &Rc<RefCell<IoState>>, readiness: Readiness) {
        let (fd, callback) = {
            let mut s = state.borrow_mut();
            (s.fd, s.callback.take())
        };
        if let Some(mut callback) = callback {
            tracing::trace!("fd {fd} fired ({readiness:?})");
            callback(fd, readiness);
            let mut s = state.borrow_mut();
            if !s.freed && s.callback.is_none() {
                s.callback = Some(callback);
            }
        }
    }

    fn poll_timeout(&self, mode: TickMode, earlier_activity: bool) -> Option<Duration> {
        if mode == TickMode::NonBlocking || earlier_activity {
            return Some(Duration::ZERO);
        }
        let mut core = self.core.borrow_mut();
        // A stop request or queued work must not sit behind a blocking
        // poll.
        if core.stopped || !core.deferred.is_empty() || core.immediates.has_pending() {
            return Some(Duration::ZERO);
        }
        let timer_deadline = core.timers.earliest_expiry();
        let io_deadline = core.io.earliest_deadline();
        let deadline = match (timer_deadline, io_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (deadline @ Some(_), None) | (None, deadline @ Some(_)) => deadline,
            (None, None) => None,
        };
        if let Some(deadline) = deadline {
            return Some(deadline.saturating_duration_since(Instant::now()));
        }
        let can_wake = core.io.any_armed()
            || matches!(&core.signals, SignalsSlot::Ready(manager) if manager.has_watchers());
        if can_wake {
            None
        } else {
            Some(Duration::ZERO)
        }
    }

    /// Phase 5: immediates queued at phase entry, FIFO. New ones wait for
    /// the next tick.
    fn run_immediates(&self) {
        let budget = self.core.borrow().immediates.len();
        for _ in 0..budget {
            let Some(state) = self.core.borrow_mut().immediates.pop_live() else {
                break;
            };
            let callback = state.borrow_mut().callback.take();
            if let Some(callback) = callback {
                callback();
            }
        }
    }
}

impl std::fmt::Debug for Loop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.borrow();
        f.debug_struct("Loop")
            .field("backend", &core.backend.name())
            .field("running", &core.running)
            .field("stopped", &core.stopped)
            .finish()
    }
}

fn fd_for(token: u64) -> RawFd {
    RawFd::try_from(token).unwrap_or(-1)
}
