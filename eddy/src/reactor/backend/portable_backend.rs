// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words pollfd revents reinit

//! Portable poll backend: `poll(2)` via [`rustix::event::poll`].
//!
//! Registrations live entirely in user space here, so every poll call
//! rebuilds the `pollfd` array. That is O(armed watchers) per tick, which
//! is the classic `poll(2)` trade-off this backend accepts in exchange for
//! working everywhere.

use super::{PollBackend, ReadyTokens};
use crate::IoInterest;
use rustix::event::{PollFd, PollFlags, Timespec, poll};
use std::{collections::HashMap,
          io,
          os::fd::{BorrowedFd, RawFd},
          time::Duration};

#[derive(Debug, Default)]
pub(crate) struct PortableBackend {
    registrations: HashMap<RawFd, (IoInterest, u64)>,
}

impl PortableBackend {
    pub fn new() -> Self { Self::default() }

    fn poll_flags(interest: IoInterest) -> PollFlags {
        match interest {
            IoInterest::Readable => PollFlags::IN,
            IoInterest::Writable => PollFlags::OUT,
        }
    }

    fn timespec(timeout: Duration) -> Timespec {
        Timespec {
            tv_sec: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
            tv_nsec: i64::from(timeout.subsec_nanos()),
        }
    }
}

impl PollBackend for PortableBackend {
    fn register(&mut self, fd: RawFd, interest: IoInterest, token: u64) -> io::Result<()> {
        self.registrations.insert(fd, (interest, token));
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.registrations.remove(&fd);
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut ReadyTokens) -> io::Result<()> {
        if self.registrations.is_empty() {
            // Nothing to watch: emulate the wait without a syscall.
            if let Some(timeout) = timeout {
                if !timeout.is_zero() {
                    std::thread::sleep(timeout);
                }
            }
            return Ok(());
        }

        let entries: Vec<(RawFd, u64, PollFlags)> = self
            .registrations
            .iter()
            .map(|(fd, (interest, token))| (*fd, *token, Self::poll_flags(*interest)))
            .collect();

        // SAFETY: each fd was handed to the loop by its owner, who keeps it
        // open while the watcher is armed. That contract is what makes the
        // borrow for the duration of this call valid.
        let mut poll_fds: Vec<PollFd<'_>> = entries
            .iter()
            .map(|(fd, _, flags)| {
                PollFd::from_borrowed_fd(unsafe { BorrowedFd::borrow_raw(*fd) }, *flags)
            })
            .collect();

        let timespec = timeout.map(Self::timespec);
        match poll(&mut poll_fds, timespec.as_ref()) {
            Ok(_ready_count) => {}
            Err(rustix::io::Errno::INTR) => return Ok(()),
            Err(errno) => return Err(io::Error::from(errno)),
        }

        let interesting =
            PollFlags::IN | PollFlags::OUT | PollFlags::ERR | PollFlags::HUP | PollFlags::NVAL;
        for (slot, (_, token, _)) in poll_fds.iter().zip(entries.iter()) {
            if slot.revents().intersects(interesting) {
                out.push(*token);
            }
        }
        Ok(())
    }

    fn reinit(&mut self) -> io::Result<()> {
        // Registrations are user-space state only; nothing kernel-side to
        // rebuild.
        Ok(())
    }

    fn name(&self) -> &'static str { "poll" }
}
