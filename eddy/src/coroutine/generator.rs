// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The generator contract the coroutine driver consumes.
//!
//! A [`Generator`] is a suspendable computation: each advance returns
//! either a [`Step::Yield`] (the value the computation is suspended on)
//! or [`Step::Done`]. What a generator yields is a tagged
//! [`Yielded`] variant, so the driver can tell a plain value (a zero-cost
//! yield back to the loop) from an awaitable (a real suspension point)
//! from a nested generator (spawned as a child task).

use crate::{Awaitable, Reason};

/// One yielded value, as seen by the driver.
pub enum Yielded<T: Clone + 'static> {
    /// A plain value: fed straight back into the generator on the next
    /// tick.
    Value(T),
    /// Suspend until this awaitable settles; its value is sent back in,
    /// its rejection is thrown back in.
    Awaitable(Awaitable<T>),
    /// A nested generator, driven as a child task whose outcome is awaited.
    Nested(Box<dyn Generator<T>>),
}

/// The result of advancing a generator once.
pub enum Step<T: Clone + 'static> {
    Yield(Yielded<T>),
    /// The generator finished. `Some` carries an explicit return value;
    /// `None` means the task resolves with the last value sent in.
    Done(Option<T>),
}

/// A suspendable generator-style computation.
///
/// `current()` produces the first yielded value; `send(v)` resumes with
/// the result of the awaited suspension point; `throw(reason)` resumes by
/// raising at the suspension point (a generator that catches the reason
/// may keep yielding; one that does not returns `Err`). `valid()` is
/// false once the generator can no longer be advanced.
///
/// All three advance methods return `Err` when the generator body itself
/// fails; the driver rejects the owning awaitable with that reason.
pub trait Generator<T: Clone + 'static> {
    /// The value the generator is initially suspended on.
    ///
    /// # Errors
    ///
    /// The generator body failed before its first suspension point.
    fn current(&mut self) -> Result<Step<T>, Reason>;

    /// Resumes with the result of the awaited value.
    ///
    /// # Errors
    ///
    /// The generator body failed while advancing.
    fn send(&mut self, value: T) -> Result<Step<T>, Reason>;

    /// Resumes by raising `reason` at the suspension point.
    ///
    /// # Errors
    ///
    /// The reason was not caught, or the body failed during cleanup.
    fn throw(&mut self, reason: Reason) -> Result<Step<T>, Reason>;

    /// Whether the generator can still be advanced.
    fn valid(&self) -> bool;
}

impl<T: Clone + 'static> Generator<T> for Box<dyn Generator<T>> {
    fn current(&mut self) -> Result<Step<T>, Reason> { (**self).current() }

    fn send(&mut self, value: T) -> Result<Step<T>, Reason> { (**self).send(value) }

    fn throw(&mut self, reason: Reason) -> Result<Step<T>, Reason> { (**self).throw(reason) }

    fn valid(&self) -> bool { (**self).valid() }
}

impl<T: Clone + 'static> std::fmt::Debug for Yielded<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Yielded::Value(_) => f.write_str("Yielded::Value"),
            Yielded::Awaitable(_) => f.write_str("Yielded::Awaitable"),
            Yielded::Nested(_) => f.write_str("Yielded::Nested"),
        }
    }
}

impl<T: Clone + 'static> std::fmt::Debug for Step<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Yield(yielded) => write!(f, "Step::Yield({yielded:?})"),
            Step::Done(Some(_)) => f.write_str("Step::Done(Some)"),
            Step::Done(None) => f.write_str("Step::Done(None)"),
        }
    }
}
