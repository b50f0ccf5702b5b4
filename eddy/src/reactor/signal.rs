// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words signo signos sigaction SIGUSR SIGKILL SIGSTOP

//! UNIX signal watchers.
//!
//! Delivery is a two-stage affair. A process-wide handler (installed
//! lazily, one per signo, via [`signal_hook`]) only does async-signal-safe
//! work: it marks the signo pending in an atomic table and writes one byte
//! to the loop's wake pipe so a blocking poll returns. The loop then drains
//! the table at the start of the next tick and runs watcher callbacks in
//! registration order. Multiple deliveries between ticks coalesce into one
//! callback invocation per watcher per tick.
//!
//! Signal watchers never keep the loop alive on their own.

use crate::{LoopError, WatcherKind};
use std::{cell::RefCell,
          collections::HashMap,
          io,
          os::fd::{AsRawFd, OwnedFd, RawFd},
          rc::{Rc, Weak},
          sync::atomic::{AtomicBool, AtomicI32, Ordering}};

use super::event_loop::LoopCore;

/// Highest signo the pending table tracks (classic UNIX range).
const SIGNAL_TABLE_SIZE: usize = 64;

/// Process-global pending marks, one slot per signo. Written by signal
/// handlers, drained by the loop tick.
static SIGNAL_PENDING: [AtomicBool; SIGNAL_TABLE_SIZE] =
    [const { AtomicBool::new(false) }; SIGNAL_TABLE_SIZE];

/// Write end of the active loop's wake pipe, or -1. Signal handlers write
/// one byte here to interrupt a blocking poll.
static SIGNAL_WAKE_FD: AtomicI32 = AtomicI32::new(-1);

pub(crate) type SignalCallback = Box<dyn FnMut(i32)>;

#[allow(missing_debug_implementations)]
pub(crate) struct SignalState {
    pub signo: i32,
    pub callback: Option<SignalCallback>,
    pub freed: bool,
}

/// A watcher for one UNIX signal. Several watchers may share a signo; they
/// fire in registration order.
#[derive(Clone)]
pub struct Signal {
    pub(crate) state: Rc<RefCell<SignalState>>,
    pub(crate) owner: Weak<RefCell<LoopCore>>,
}

impl Signal {
    /// Deregisters this watcher. The process handler for the signo is
    /// removed once the last watcher for it is freed. Idempotent.
    pub fn free(&self) {
        if self.state.borrow().freed {
            return;
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.borrow_mut().free_signal(&self.state);
        }
    }

    #[must_use]
    pub fn signo(&self) -> i32 { self.state.borrow().signo }

    #[must_use]
    pub fn is_enabled(&self) -> bool { !self.state.borrow().freed }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Signal")
            .field("signo", &state.signo)
            .field("freed", &state.freed)
            .finish()
    }
}

/// Per-loop signal bookkeeping plus the wake pipe shared with the poll
/// phase.
#[allow(missing_debug_implementations)]
pub(crate) struct SignalManager {
    watchers: HashMap<i32, Vec<Rc<RefCell<SignalState>>>>,
    handles: HashMap<i32, signal_hook::SigId>,
    wake_read: OwnedFd,
    wake_write: OwnedFd,
}

impl SignalManager {
    /// Creates the wake pipe and publishes its write end to the handler
    /// table. The read end must be registered with the poll backend by the
    /// caller (under [`WAKE_TOKEN`]).
    ///
    /// [`WAKE_TOKEN`]: super::backend::WAKE_TOKEN
    pub fn new() -> io::Result<Self> {
        let (wake_read, wake_write) =
            rustix::pipe::pipe_with(rustix::pipe::PipeFlags::CLOEXEC | rustix::pipe::PipeFlags::NONBLOCK)
                .map_err(io::Error::from)?;
        SIGNAL_WAKE_FD.store(wake_write.as_raw_fd(), Ordering::SeqCst);
        Ok(Self {
            watchers: HashMap::new(),
            handles: HashMap::new(),
            wake_read,
            wake_write,
        })
    }

    pub fn wake_read_fd(&self) -> RawFd { self.wake_read.as_raw_fd() }

    pub fn has_watchers(&self) -> bool { !self.watchers.is_empty() }

    /// Registers a watcher, installing the process handler for `signo` on
    /// first use.
    pub fn create(
        &mut self,
        signo: i32,
        callback: SignalCallback,
    ) -> Result<Rc<RefCell<SignalState>>, LoopError> {
        let slot = usize::try_from(signo).ok().filter(|s| (1..SIGNAL_TABLE_SIZE).contains(s));
        let Some(slot) = slot else {
            return Err(LoopError::Backend(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("signo {signo} out of range"),
            )));
        };

        if !self.handles.contains_key(&signo) {
            // SAFETY: the handler body is async-signal-safe: an atomic
            // store and a single write(2) on a pre-opened pipe fd.
            let sig_id = unsafe {
                signal_hook::low_level::register(signo, move || {
                    SIGNAL_PENDING[slot].store(true, Ordering::SeqCst);
                    let fd = SIGNAL_WAKE_FD.load(Ordering::SeqCst);
                    if fd >= 0 {
                        // SAFETY: the fd stays open for as long as it is
                        // published in SIGNAL_WAKE_FD.
                        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
                        let _ = rustix::io::write(borrowed, &[1u8]);
                    }
                })
            }
            .map_err(LoopError::Backend)?;
            self.handles.insert(signo, sig_id);
            tracing::debug!("installed process handler for signal {signo}");
        }

        let state = Rc::new(RefCell::new(SignalState { signo, callback: Some(callback), freed: false }));
        self.watchers.entry(signo).or_default().push(state.clone());
        Ok(state)
    }

    pub fn remove(&mut self, state: &Rc<RefCell<SignalState>>) {
        let signo = {
            let mut s = state.borrow_mut();
            s.freed = true;
            s.callback = None;
            s.signo
        };
        if let Some(list) = self.watchers.get_mut(&signo) {
            list.retain(|candidate| !Rc::ptr_eq(candidate, state));
            if list.is_empty() {
                self.watchers.remove(&signo);
                if let Some(sig_id) = self.handles.remove(&signo) {
                    signal_hook::low_level::unregister(sig_id);
                    tracing::debug!("removed process handler for signal {signo}");
                }
            }
        }
    }

    /// Signos delivered since the last drain, with their watcher lists in
    /// registration order. Clears the pending marks.
    pub fn take_pending(&self) -> Vec<(i32, Vec<Rc<RefCell<SignalState>>>)> {
        let mut fired = Vec::new();
        for (signo, list) in &self.watchers {
            let slot = usize::try_from(*signo).unwrap_or(0);
            if SIGNAL_PENDING[slot].swap(false, Ordering::SeqCst) {
                fired.push((*signo, list.clone()));
            }
        }
        fired
    }

    /// Empties the wake pipe after the poll phase woke up.
    pub fn drain_wake_pipe(&self) {
        let mut buffer = [0u8; 64];
        loop {
            match rustix::io::read(&self.wake_read, &mut buffer) {
                Ok(0) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }

    pub fn drain_all(&mut self) {
        for (_, sig_id) in self.handles.drain() {
            signal_hook::low_level::unregister(sig_id);
        }
        for (_, list) in self.watchers.drain() {
            for state in list {
                let mut s = state.borrow_mut();
                s.freed = true;
                s.callback = None;
            }
        }
    }
}

impl Drop for SignalManager {
    fn drop(&mut self) {
        self.drain_all();
        // Retire the wake fd so handlers stop writing into a dead pipe.
        let _ = SIGNAL_WAKE_FD.compare_exchange(
            self.wake_write.as_raw_fd(),
            -1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}
