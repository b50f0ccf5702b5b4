// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words disarm disarms

//! I/O readiness watchers and their manager.
//!
//! An [`IoWatcher`] is a one-shot registration of interest in a borrowed,
//! non-blocking file descriptor. Arming ([`IoWatcher::listen()`]) hands the
//! fd to the poll backend; the first readiness (or the optional per-arming
//! timeout) fires the callback once and disarms. Re-arming requires another
//! `listen` call.
//!
//! The manager hashes watchers by raw fd value, so each fd can back at most
//! one watcher per loop ([`LoopError::ResourceBusy`] otherwise).

use crate::{LoopError, WatcherKind};
use std::{cell::RefCell,
          collections::HashMap,
          os::fd::RawFd,
          rc::{Rc, Weak},
          time::{Duration, Instant}};

use super::event_loop::LoopCore;

/// Which readiness an [`IoWatcher`] waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoInterest {
    Readable,
    Writable,
}

/// How an armed [`IoWatcher`] fired: the fd became ready, or the per-arming
/// timeout elapsed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
}

pub(crate) type IoCallback = Box<dyn FnMut(RawFd, Readiness)>;

#[allow(missing_debug_implementations)]
pub(crate) struct IoState {
    pub fd: RawFd,
    pub interest: IoInterest,
    /// Taken out while the callback runs, then restored.
    pub callback: Option<IoCallback>,
    pub pending: bool,
    pub referenced: bool,
    pub freed: bool,
    /// Deadline of the current arming, when `listen` was given a timeout.
    pub deadline: Option<Instant>,
}

/// A one-shot readiness watcher for a borrowed file descriptor.
///
/// Jointly owned by user code and the loop's I/O manager. Dropping the
/// handle does not disarm the watcher; call [`free()`] to deregister.
///
/// [`free()`]: Self::free
#[derive(Clone)]
pub struct IoWatcher {
    pub(crate) state: Rc<RefCell<IoState>>,
    pub(crate) owner: Weak<RefCell<LoopCore>>,
}

impl IoWatcher {
    fn owner(&self) -> Result<Rc<RefCell<LoopCore>>, LoopError> {
        self.owner.upgrade().ok_or(LoopError::Freed { kind: WatcherKind::Io })
    }

    fn guard_alive(&self) -> Result<(), LoopError> {
        if self.state.borrow().freed {
            return Err(LoopError::Freed { kind: WatcherKind::Io });
        }
        Ok(())
    }

    /// Arms the watcher with the poll backend. Fires once (ready or timed
    /// out), then must be re-armed. Re-listening while armed just replaces
    /// the timeout.
    ///
    /// # Errors
    ///
    /// [`LoopError::Freed`] after [`free()`](Self::free);
    /// [`LoopError::Backend`] if the backend rejects the fd.
    pub fn listen(&self, timeout: Option<Duration>) -> Result<(), LoopError> {
        self.guard_alive()?;
        let owner = self.owner()?;
        owner.borrow_mut().listen_io(&self.state, timeout)
    }

    /// Disarms without firing. No-op when not armed.
    ///
    /// # Errors
    ///
    /// [`LoopError::Freed`] after [`free()`](Self::free).
    pub fn cancel(&self) -> Result<(), LoopError> {
        self.guard_alive()?;
        let owner = self.owner()?;
        owner.borrow_mut().cancel_io(&self.state);
        Ok(())
    }

    /// Deregisters the watcher from the loop. Idempotent; every later
    /// operation on this handle reports [`LoopError::Freed`].
    pub fn free(&self) {
        if self.state.borrow().freed {
            return;
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.borrow_mut().free_io(&self.state);
        }
    }

    /// Whether the watcher currently counts towards keeping the loop alive.
    ///
    /// # Errors
    ///
    /// [`LoopError::Freed`] after [`free()`](Self::free).
    pub fn reference(&self) -> Result<(), LoopError> {
        self.guard_alive()?;
        let owner = self.owner()?;
        owner.borrow_mut().io.set_referenced(&self.state, true);
        Ok(())
    }

    /// Keeps the watcher armed but lets the loop exit while it waits.
    ///
    /// # Errors
    ///
    /// [`LoopError::Freed`] after [`free()`](Self::free).
    pub fn unreference(&self) -> Result<(), LoopError> {
        self.guard_alive()?;
        let owner = self.owner()?;
        owner.borrow_mut().io.set_referenced(&self.state, false);
        Ok(())
    }

    #[must_use]
    pub fn is_pending(&self) -> bool { self.state.borrow().pending }

    #[must_use]
    pub fn fd(&self) -> RawFd { self.state.borrow().fd }

    #[must_use]
    pub fn interest(&self) -> IoInterest { self.state.borrow().interest }
}

impl std::fmt::Debug for IoWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("IoWatcher")
            .field("fd", &state.fd)
            .field("interest", &state.interest)
            .field("pending", &state.pending)
            .field("referenced", &state.referenced)
            .field("freed", &state.freed)
            .finish()
    }
}

/// Per-loop bookkeeping for I/O watchers, keyed by raw fd.
#[allow(missing_debug_implementations)]
#[derive(Default)]
pub(crate) struct IoManager {
    by_fd: HashMap<RawFd, Rc<RefCell<IoState>>>,
    /// Count of armed watchers that keep the loop alive.
    armed_referenced: usize,
    /// Count of armed watchers in total (referenced or not).
    armed: usize,
}

impl IoManager {
    pub fn create(
        &mut self,
        fd: RawFd,
        interest: IoInterest,
        callback: IoCallback,
    ) -> Result<Rc<RefCell<IoState>>, LoopError> {
        if self.by_fd.contains_key(&fd) {
            return Err(LoopError::ResourceBusy { fd });
        }
        let state = Rc::new(RefCell::new(IoState {
            fd,
            interest,
            callback: Some(callback),
            pending: false,
            referenced: true,
            freed: false,
            deadline: None,
        }));
        self.by_fd.insert(fd, state.clone());
        tracing::debug!("io watcher created for fd {fd} ({interest:?})");
        Ok(state)
    }

    /// Marks the watcher armed. Backend registration is the loop's job.
    pub fn arm(&mut self, state: &Rc<RefCell<IoState>>, deadline: Option<Instant>) {
        let mut s = state.borrow_mut();
        s.deadline = deadline;
        if !s.pending {
            s.pending = true;
            self.armed += 1;
            if s.referenced {
                self.armed_referenced += 1;
            }
        }
    }

    /// Marks the watcher disarmed. Returns whether it was armed.
    pub fn disarm(&mut self, state: &Rc<RefCell<IoState>>) -> bool {
        let mut s = state.borrow_mut();
        if !s.pending {
            return false;
        }
        s.pending = false;
        s.deadline = None;
        self.armed -= 1;
        if s.referenced {
            self.armed_referenced -= 1;
        }
        true
    }

    pub fn remove(&mut self, state: &Rc<RefCell<IoState>>) {
        self.disarm(state);
        let mut s = state.borrow_mut();
        s.freed = true;
        s.callback = None;
        self.by_fd.remove(&s.fd);
    }

    pub fn set_referenced(&mut self, state: &Rc<RefCell<IoState>>, referenced: bool) {
        let mut s = state.borrow_mut();
        if s.referenced == referenced {
            return;
        }
        s.referenced = referenced;
        if s.pending {
            if referenced {
                self.armed_referenced += 1;
            } else {
                self.armed_referenced -= 1;
            }
        }
    }

    pub fn lookup(&self, fd: RawFd) -> Option<Rc<RefCell<IoState>>> {
        self.by_fd.get(&fd).cloned()
    }

    /// Earliest per-arming deadline among armed watchers.
    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.by_fd
            .values()
            .filter_map(|state| {
                let s = state.borrow();
                if s.pending { s.deadline } else { None }
            })
            .min()
    }

    /// Armed watchers whose deadline has passed.
    pub fn take_timed_out(&mut self, now: Instant) -> Vec<Rc<RefCell<IoState>>> {
        let expired: Vec<_> = self
            .by_fd
            .values()
            .filter(|state| {
                let s = state.borrow();
                s.pending && s.deadline.is_some_and(|deadline| deadline <= now)
            })
            .cloned()
            .collect();
        for state in &expired {
            self.disarm(state);
        }
        expired
    }

    pub fn drain_all(&mut self) -> Vec<Rc<RefCell<IoState>>> {
        let all: Vec<_> = self.by_fd.values().cloned().collect();
        for state in &all {
            self.disarm(state);
            let mut s = state.borrow_mut();
            s.freed = true;
            s.callback = None;
        }
        self.by_fd.clear();
        all
    }

    pub fn armed_fds(&self) -> Vec<RawFd> {
        self.by_fd
            .values()
            .filter(|state| state.borrow().pending)
            .map(|state| state.borrow().fd)
            .collect()
    }

    pub fn referenced_pending(&self) -> usize { self.armed_referenced }

    pub fn any_armed(&self) -> bool { self.armed > 0 }
}
