// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words signo ulimit

//! Error taxonomy for the runtime. Two distinct surfaces:
//!
//! 1. [`Fault`] is the *rejection reason* type that flows through
//!    [`Awaitable`] chains. Reasons are shared behind an [`Rc`] (see
//!    [`Reason`]) so one rejection can fan out to any number of
//!    continuations without cloning the fault itself.
//! 2. [`LoopError`] is the *API surface* error returned by the event loop
//!    and watcher operations. It carries [`miette::Diagnostic`] codes and
//!    help text so callers get actionable reports.
//!
//! [`Awaitable`]: crate::Awaitable
//! [`Rc`]: std::rc::Rc

use std::{rc::Rc, time::Duration};

/// Shared rejection reason. Cloning is a pointer copy, which matters because
/// a single rejection is delivered to every registered continuation.
pub type Reason = Rc<Fault>;

/// The outcome of a settled [`Awaitable`]: the fulfilment value or the
/// rejection reason.
///
/// [`Awaitable`]: crate::Awaitable
pub type Settled<T> = Result<T, Reason>;

/// Rejection reasons carried by [`Awaitable`] chains.
///
/// [`Awaitable`]: crate::Awaitable
#[derive(Debug, thiserror::Error)]
pub enum Fault {
    /// Programmer mistake: invalid generator result, self-resolution,
    /// invalid combinator input.
    #[error("logic error: {0}")]
    Logic(String),

    /// The awaitable was cancelled before it settled.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A timeout adapter fired before the upstream settled.
    #[error("timed out after {after:?}")]
    Timeout {
        /// How long the adapter waited before giving up.
        after: Duration,
    },

    /// Every input to [`Awaitable::any`] (or [`Awaitable::some`]) rejected.
    /// Carries the sub-reasons in input order.
    ///
    /// [`Awaitable::any`]: crate::Awaitable::any
    /// [`Awaitable::some`]: crate::Awaitable::some
    #[error("every awaitable rejected ({} reasons)", .0.len())]
    AllRejected(Vec<Reason>),

    /// The poll backend reported a failure (fd gone, poll syscall error).
    #[error("backend failure: {0}")]
    Backend(String),

    /// Application-supplied rejection reason.
    #[error("{0}")]
    Other(String),
}

impl Fault {
    /// A [`Fault::Logic`] wrapped as a shareable [`Reason`].
    pub fn logic(message: impl Into<String>) -> Reason {
        Rc::new(Fault::Logic(message.into()))
    }

    /// The default cancellation reason.
    #[must_use]
    pub fn cancelled() -> Reason { Rc::new(Fault::Cancelled("cancelled".into())) }

    /// A cancellation reason with a caller-supplied message.
    pub fn cancelled_because(message: impl Into<String>) -> Reason {
        Rc::new(Fault::Cancelled(message.into()))
    }

    /// A [`Fault::Timeout`] wrapped as a shareable [`Reason`].
    #[must_use]
    pub fn timeout(after: Duration) -> Reason { Rc::new(Fault::Timeout { after }) }

    /// A [`Fault::Backend`] wrapped as a shareable [`Reason`].
    pub fn backend(message: impl Into<String>) -> Reason {
        Rc::new(Fault::Backend(message.into()))
    }

    /// An application-supplied reason wrapped as a shareable [`Reason`].
    pub fn other(message: impl Into<String>) -> Reason {
        Rc::new(Fault::Other(message.into()))
    }

    /// Whether this fault is a cancellation (including timeouts, which are
    /// delivered as cancellations upstream).
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Fault::Cancelled(_) | Fault::Timeout { .. })
    }
}

/// Which kind of watcher an operation was attempted on. Used in error
/// messages and log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherKind {
    Io,
    Timer,
    Immediate,
    Signal,
}

impl std::fmt::Display for WatcherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WatcherKind::Io => "io",
            WatcherKind::Timer => "timer",
            WatcherKind::Immediate => "immediate",
            WatcherKind::Signal => "signal",
        };
        write!(f, "{name}")
    }
}

/// Errors returned by the event loop and watcher API surface.
///
/// Each variant has a dedicated [diagnostic code] and, where the failure is
/// actionable, help text.
///
/// [diagnostic code]: miette::Diagnostic::code
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum LoopError {
    /// A watcher was used after [`free()`] removed it from its manager.
    ///
    /// [`free()`]: crate::IoWatcher::free
    #[error("{kind} watcher used after free")]
    #[diagnostic(
        code(r3bl_eddy::reactor::freed),
        help("Watcher handles are invalid once freed. Create a new watcher instead.")
    )]
    Freed {
        /// Which watcher kind the stale handle belonged to.
        kind: WatcherKind,
    },

    /// An fd was registered with the I/O manager while an earlier
    /// registration for the same fd is still live.
    #[error("fd {fd} is already registered with this event loop")]
    #[diagnostic(
        code(r3bl_eddy::reactor::resource_busy),
        help(
            "Each fd can back at most one io watcher per loop. \
             Free the existing watcher before creating another."
        )
    )]
    ResourceBusy {
        /// The contested file descriptor.
        fd: i32,
    },

    /// [`run()`] was invoked while the loop is already running.
    ///
    /// [`run()`]: crate::Loop::run
    #[error("event loop is already running")]
    #[diagnostic(code(r3bl_eddy::reactor::already_running))]
    AlreadyRunning,

    /// The thread-default loop was replaced while running.
    #[error("cannot replace the default event loop while it is running")]
    #[diagnostic(code(r3bl_eddy::reactor::replace_while_running))]
    ReplaceWhileRunning,

    /// A signal watcher was requested from a loop built with signal
    /// handling disabled.
    #[error("signal handling is disabled for this event loop")]
    #[diagnostic(
        code(r3bl_eddy::reactor::signals_unsupported),
        help("Build the loop with LoopBuilder::enable_signals(true) to use signal watchers.")
    )]
    SignalsUnsupported,

    /// A `done` chain terminated in a rejection nobody handled. The loop
    /// surfaces the first such fault at the tick boundary and stops.
    #[error("uncaught error: {0}")]
    #[diagnostic(code(r3bl_eddy::reactor::uncaught))]
    Uncaught(Reason),

    /// The OS poll backend failed to initialize or poll.
    #[error("poll backend failure")]
    #[diagnostic(
        code(r3bl_eddy::reactor::backend),
        help("Check OS resource limits, e.g. `ulimit -n` for file descriptors.")
    )]
    Backend(#[source] std::io::Error),

    /// Introspection of an awaitable that has not settled yet.
    #[error("awaitable is still pending")]
    #[diagnostic(code(r3bl_eddy::awaitable::still_pending))]
    StillPending,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fault_display_is_terse() {
        assert_eq!(
            Fault::logic("resolved with itself").to_string(),
            "logic error: resolved with itself"
        );
        assert_eq!(Fault::cancelled().to_string(), "cancelled: cancelled");
        let reason = Fault::timeout(Duration::from_millis(10));
        assert_eq!(reason.to_string(), "timed out after 10ms");
    }

    #[test]
    fn all_rejected_reports_count() {
        let fault = Fault::AllRejected(vec![Fault::other("a"), Fault::other("b")]);
        assert_eq!(fault.to_string(), "every awaitable rejected (2 reasons)");
    }

    #[test]
    fn cancellation_includes_timeouts() {
        assert!(Fault::cancelled().is_cancellation());
        assert!(Fault::timeout(Duration::from_secs(1)).is_cancellation());
        assert!(!Fault::other("nope").is_cancellation());
    }

    #[test]
    fn loop_error_freed_names_watcher_kind() {
        let err = LoopError::Freed { kind: WatcherKind::Timer };
        assert_eq!(err.to_string(), "timer watcher used after free");
    }
}
