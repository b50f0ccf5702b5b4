// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Immediate watchers: one-shot callbacks that run when the loop has
//! nothing else to do in a tick. FIFO among themselves.

use crate::{LoopError, WatcherKind};
use std::{cell::RefCell,
          collections::VecDeque,
          rc::{Rc, Weak}};

use super::event_loop::LoopCore;

pub(crate) type ImmediateCallback = Box<dyn FnOnce()>;

#[allow(missing_debug_implementations)]
pub(crate) struct ImmediateState {
    pub callback: Option<ImmediateCallback>,
    pub pending: bool,
    pub referenced: bool,
    pub freed: bool,
}

/// A one-shot callback that runs once the loop is otherwise idle.
#[derive(Clone)]
pub struct Immediate {
    pub(crate) state: Rc<RefCell<ImmediateState>>,
    pub(crate) owner: Weak<RefCell<LoopCore>>,
}

impl Immediate {
    fn guard_alive(&self) -> Result<(), LoopError> {
        if self.state.borrow().freed {
            return Err(LoopError::Freed { kind: WatcherKind::Immediate });
        }
        Ok(())
    }

    /// Removes the callback before it ran. Idempotent; every later
    /// operation on this handle reports [`LoopError::Freed`].
    pub fn free(&self) {
        if self.state.borrow().freed {
            return;
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.borrow_mut().immediates.remove(&self.state);
        }
    }

    /// # Errors
    ///
    /// [`LoopError::Freed`] after [`free()`](Self::free).
    pub fn reference(&self) -> Result<(), LoopError> {
        self.guard_alive()?;
        if let Some(owner) = self.owner.upgrade() {
            owner.borrow_mut().immediates.set_referenced(&self.state, true);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// [`LoopError::Freed`] after [`free()`](Self::free).
    pub fn unreference(&self) -> Result<(), LoopError> {
        self.guard_alive()?;
        if let Some(owner) = self.owner.upgrade() {
            owner.borrow_mut().immediates.set_referenced(&self.state, false);
        }
        Ok(())
    }

    #[must_use]
    pub fn is_pending(&self) -> bool { self.state.borrow().pending }
}

impl std::fmt::Debug for Immediate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Immediate")
            .field("pending", &state.pending)
            .field("referenced", &state.referenced)
            .field("freed", &state.freed)
            .finish()
    }
}

#[allow(missing_debug_implementations)]
#[derive(Default)]
pub(crate) struct ImmediateManager {
    queue: VecDeque<Rc<RefCell<ImmediateState>>>,
    armed_referenced: usize,
}

impl ImmediateManager {
    pub fn create(&mut self, callback: ImmediateCallback) -> Rc<RefCell<ImmediateState>> {
        let state = Rc::new(RefCell::new(ImmediateState {
            callback: Some(callback),
            pending: true,
            referenced: true,
            freed: false,
        }));
        self.queue.push_back(state.clone());
        self.armed_referenced += 1;
        state
    }

    pub fn remove(&mut self, state: &Rc<RefCell<ImmediateState>>) {
        let mut s = state.borrow_mut();
        if s.pending {
            s.pending = false;
            if s.referenced {
                self.armed_referenced -= 1;
            }
        }
        s.freed = true;
        s.callback = None;
        // The queue entry stays behind as a tombstone; pops skip it.
    }

    pub fn set_referenced(&mut self, state: &Rc<RefCell<ImmediateState>>, referenced: bool) {
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

    /// Pops the next live immediate, discarding tombstones.
    pub fn pop_live(&mut self) -> Option<Rc<RefCell<ImmediateState>>> {
        while let Some(state) = self.queue.pop_front() {
            let live = {
                let mut s = state.borrow_mut();
                if !s.pending {
                    continue;
                }
                s.pending = false;
                if s.referenced {
                    self.armed_referenced -= 1;
                }
                true
            };
            if live {
                return Some(state);
            }
        }
        None
    }

    pub fn len(&self) -> usize { self.queue.iter().filter(|s| s.borrow().pending).count() }

    pub fn has_pending(&self) -> bool { self.queue.iter().any(|s| s.borrow().pending) }

    pub fn drain_all(&mut self) {
        for state in self.queue.drain(..) {
            let mut s = state.borrow_mut();
            s.pending = false;
            s.freed = true;
            s.callback = None;
        }
        self.armed_referenced = 0;
    }

    pub fn referenced_pending(&self) -> usize { self.armed_referenced }
}
