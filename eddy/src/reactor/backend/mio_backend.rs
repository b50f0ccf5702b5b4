// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll kqueue reinit

//! Accelerated poll backend: [`mio::Poll`] over epoll (Linux) or kqueue
//! (macOS).

use super::{PollBackend, ReadyTokens};
use crate::IoInterest;
use mio::{Events, Poll, Token, unix::SourceFd};
use std::{collections::HashMap, io, os::fd::RawFd, time::Duration};

pub(crate) struct MioBackend {
    poll: Poll,
    events: Events,
    /// What is currently armed, so `reinit` can re-register after a fork.
    registrations: HashMap<RawFd, (IoInterest, u64)>,
}

impl MioBackend {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(256),
            registrations: HashMap::new(),
        })
    }

    fn mio_interest(interest: IoInterest) -> mio::Interest {
        match interest {
            IoInterest::Readable => mio::Interest::READABLE,
            IoInterest::Writable => mio::Interest::WRITABLE,
        }
    }
}

impl PollBackend for MioBackend {
    fn register(&mut self, fd: RawFd, interest: IoInterest, token: u64) -> io::Result<()> {
        self.poll.registry().register(
            &mut SourceFd(&fd),
            Token(usize::try_from(token).unwrap_or(usize::MAX)),
            Self::mio_interest(interest),
        )?;
        self.registrations.insert(fd, (interest, token));
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        if self.registrations.remove(&fd).is_some() {
            // The kernel may have dropped the fd from the set already
            // (e.g. the peer end closed). Deregistration failure is not
            // actionable for the caller.
            if let Err(error) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
                tracing::trace!("deregister fd {fd} from mio failed: {error}");
            }
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut ReadyTokens) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(error) => return Err(error),
        }
        for event in &self.events {
            out.push(event.token().0 as u64);
        }
        Ok(())
    }

    fn reinit(&mut self) -> io::Result<()> {
        self.poll = Poll::new()?;
        for (fd, (interest, token)) in &self.registrations {
            self.poll.registry().register(
                &mut SourceFd(fd),
                Token(usize::try_from(*token).unwrap_or(usize::MAX)),
                Self::mio_interest(*interest),
            )?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str { "mio" }
}

impl std::fmt::Debug for MioBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MioBackend")
            .field("registrations", &self.registrations.len())
            .finish()
    }
}
