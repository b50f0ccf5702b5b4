// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll kqueue reinit

//! Pluggable OS poll backends for the event loop.
//!
//! The loop talks to the OS through the [`PollBackend`] trait and never
//! directly through a poller crate. Two implementations exist:
//!
//! 1. [`MioBackend`]: epoll on Linux, kqueue on macOS, via [`mio::Poll`].
//! 2. [`PortableBackend`]: `poll(2)` via [`rustix::event::poll`], used when
//!    the accelerated poller cannot be created (or when forced).
//!
//! Both remember their registrations so [`PollBackend::reinit()`] can
//! rebuild kernel state after a `fork()` without the loop losing watchers.

use crate::IoInterest;
use smallvec::SmallVec;
use std::{io, os::fd::RawFd, time::Duration};

mod mio_backend;
mod portable_backend;

pub(crate) use mio_backend::MioBackend;
pub(crate) use portable_backend::PortableBackend;

/// Token reserved for the signal manager's wake pipe. `u64::MAX` itself
/// is off limits (mio reserves `Token(usize::MAX)` internally).
pub(crate) const WAKE_TOKEN: u64 = u64::MAX - 1;

/// Scratch buffer for tokens reported ready by one poll call.
pub(crate) type ReadyTokens = SmallVec<[u64; 16]>;

/// Which poll backend the loop should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendChoice {
    /// Prefer the accelerated backend, fall back to the portable one.
    #[default]
    Auto,
    /// epoll/kqueue-class polling. Construction can fail.
    Accelerated,
    /// `poll(2)`. Always available.
    Portable,
}

/// The readiness demultiplexer behind the event loop's I/O phase.
///
/// One-shot semantics live above this trait: the loop deregisters an fd
/// after delivering its readiness, so backends only track what is armed
/// right now.
pub(crate) trait PollBackend {
    /// Arms `fd` for `interest`. The loop guarantees at most one
    /// registration per fd.
    fn register(&mut self, fd: RawFd, interest: IoInterest, token: u64) -> io::Result<()>;

    /// Disarms `fd`. Unknown fds are a no-op (the fd may already be gone
    /// from the kernel set after `reinit`).
    fn deregister(&mut self, fd: RawFd) -> io::Result<()>;

    /// Blocks for up to `timeout` (`None` = forever) and appends the token
    /// of every ready registration to `out`. An interrupted poll (`EINTR`)
    /// returns `Ok` with no tokens; the loop picks up the signal on the
    /// next phase.
    fn poll(&mut self, timeout: Option<Duration>, out: &mut ReadyTokens) -> io::Result<()>;

    /// Recreates kernel-side state from the remembered registrations.
    /// Called after `fork()` in the child, where the inherited poller fd
    /// is unusable but the watched fds are still valid.
    fn reinit(&mut self) -> io::Result<()>;

    fn name(&self) -> &'static str;
}

/// Builds the backend for [`BackendChoice::Auto`]. Never fails: if the
/// accelerated poller cannot be created the portable one takes over.
pub(crate) fn select_auto() -> Box<dyn PollBackend> {
    match MioBackend::new() {
        Ok(backend) => Box::new(backend),
        Err(error) => {
            tracing::warn!("accelerated poll backend unavailable ({error}), using poll(2)");
            Box::new(PortableBackend::new())
        }
    }
}

/// Builds the backend for an explicit [`BackendChoice`].
pub(crate) fn select(choice: BackendChoice) -> io::Result<Box<dyn PollBackend>> {
    match choice {
        BackendChoice::Auto => Ok(select_auto()),
        BackendChoice::Accelerated => Ok(Box::new(MioBackend::new()?)),
        BackendChoice::Portable => Ok(Box::new(PortableBackend::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_selection_prefers_accelerated() {
        let backend = select_auto();
        // On any platform mio supports, auto lands on the accelerated path.
        assert_eq!(backend.name(), "mio");
    }

    #[test]
    fn explicit_portable_selection() {
        let backend = select(BackendChoice::Portable).unwrap();
        assert_eq!(backend.name(), "poll");
    }
}
