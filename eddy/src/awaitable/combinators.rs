// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Combinators over ordered collections of awaitables: `all`, `any`,
//! `some`, `choose`, `settle`, `map`, `fold`, `iterate`, `retry`.
//!
//! Inputs are keyed by position; wherever a combinator produces a
//! collection, the output index matches the input index (except `some`,
//! which reports winners in fulfilment order). Every combinator registers
//! interest in its inputs, so cancelling the combined awaitable withdraws
//! interest from (and eventually cancels) each input.

use crate::{Fault, Reason, Settled};
use std::{cell::{Cell, RefCell},
          rc::Rc};

use super::state::{Awaitable, Resolution};

/// Loop control for [`Awaitable::iterate`].
#[derive(Debug, Clone)]
pub enum Flow<T> {
    /// Feed this value back into the step function.
    Continue(T),
    /// Stop iterating; the combined awaitable fulfils with this value.
    Break(T),
}

impl<T: Clone + 'static> Awaitable<T> {
    /// Fulfils with every input's value, in input order, once all inputs
    /// fulfil. The first rejection wins: it becomes the combined outcome
    /// and the remaining inputs are cancelled with the same reason.
    #[must_use]
    pub fn all(inputs: Vec<Awaitable<T>>) -> Awaitable<Vec<T>> {
        if inputs.is_empty() {
            return Awaitable::resolved(Vec::new());
        }
        for input in &inputs {
            input.inc_dependents();
        }

        let cancel_inputs = inputs.clone();
        let (combined, resolver) = Awaitable::pending_with_canceller(move |_, reason| {
            for input in &cancel_inputs {
                input.cancel_with(reason.clone());
            }
        });

        let slots: Rc<RefCell<Vec<Option<T>>>> =
            Rc::new(RefCell::new(vec![None; inputs.len()]));
        let remaining = Rc::new(Cell::new(inputs.len()));
        let rejected = Rc::new(Cell::new(false));

        for (index, input) in inputs.iter().enumerate() {
            let slots = slots.clone();
            let remaining = remaining.clone();
            let rejected = rejected.clone();
            let resolver = resolver.clone();
            let others: Vec<Awaitable<T>> = inputs
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != index)
                .map(|(_, other)| other.clone())
                .collect();
            input.subscribe(Box::new(move |settled| {
                if rejected.get() {
                    return;
                }
                match settled {
                    Ok(value) => {
                        slots.borrow_mut()[index] = Some(value);
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            let values: Vec<T> =
                                slots.borrow_mut().drain(..).flatten().collect();
                            resolver.fulfill(values);
                        }
                    }
                    Err(reason) => {
                        rejected.set(true);
                        resolver.reject(reason.clone());
                        for other in &others {
                            other.cancel_with(reason.clone());
                        }
                    }
                }
            }));
        }
        combined
    }

    /// Fulfils with the first input to fulfil, cancelling the rest. If
    /// every input rejects, rejects with [`Fault::AllRejected`] carrying
    /// the reasons in input order.
    #[must_use]
    pub fn any(inputs: Vec<Awaitable<T>>) -> Awaitable<T> {
        if inputs.is_empty() {
            return Awaitable::rejected(Fault::logic("any() over no awaitables"));
        }
        for input in &inputs {
            input.inc_dependents();
        }

        let cancel_inputs = inputs.clone();
        let (combined, resolver) = Awaitable::pending_with_canceller(move |_, reason| {
            for input in &cancel_inputs {
                input.cancel_with(reason.clone());
            }
        });

        let reasons: Rc<RefCell<Vec<Option<Reason>>>> =
            Rc::new(RefCell::new(vec![None; inputs.len()]));
        let remaining = Rc::new(Cell::new(inputs.len()));
        let won = Rc::new(Cell::new(false));

        for (index, input) in inputs.iter().enumerate() {
            let reasons = reasons.clone();
            let remaining = remaining.clone();
            let won = won.clone();
            let resolver = resolver.clone();
            let others: Vec<Awaitable<T>> = inputs
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != index)
                .map(|(_, other)| other.clone())
                .collect();
            input.subscribe(Box::new(move |settled| {
                if won.get() {
                    return;
                }
                match settled {
                    Ok(value) => {
                        won.set(true);
                        resolver.fulfill(value);
                        let reason = Fault::cancelled_because("another awaitable won");
                        for other in &others {
                            other.cancel_with(reason.clone());
                        }
                    }
                    Err(reason) => {
                        reasons.borrow_mut()[index] = Some(reason);
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            let collected: Vec<Reason> =
                                reasons.borrow_mut().drain(..).flatten().collect();
                            resolver.reject(Rc::new(Fault::AllRejected(collected)));
                        }
                    }
                }
            }));
        }
        combined
    }

    /// Fulfils with the first `count` fulfilment values, in fulfilment
    /// order, cancelling the rest. Rejects with [`Fault::AllRejected`] as
    /// soon as too many inputs have rejected for `count` fulfilments to
    /// remain possible.
    #[must_use]
    pub fn some(inputs: Vec<Awaitable<T>>, count: usize) -> Awaitable<Vec<T>> {
        if count == 0 {
            return Awaitable::resolved(Vec::new());
        }
        if inputs.len() < count {
            return Awaitable::rejected(Fault::logic(format!(
                "some() asked for {count} fulfilments from {} awaitables",
                inputs.len()
            )));
        }
        for input in &inputs {
            input.inc_dependents();
        }

        let cancel_inputs = inputs.clone();
        let (combined, resolver) = Awaitable::pending_with_canceller(move |_, reason| {
            for input in &cancel_inputs {
                input.cancel_with(reason.clone());
            }
        });

        let values: Rc<RefCell<Vec<T>>> = Rc::new(RefCell::new(Vec::new()));
        let reasons: Rc<RefCell<Vec<Option<Reason>>>> =
            Rc::new(RefCell::new(vec![None; inputs.len()]));
        let rejections_allowed = inputs.len() - count;
        let rejection_count = Rc::new(Cell::new(0usize));
        let settled_flag = Rc::new(Cell::new(false));

        for (index, input) in inputs.iter().enumerate() {
            let values = values.clone();
            let reasons = reasons.clone();
            let rejection_count = rejection_count.clone();
            let settled_flag = settled_flag.clone();
            let resolver = resolver.clone();
            let others: Vec<Awaitable<T>> = inputs
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != index)
                .map(|(_, other)| other.clone())
                .collect();
            input.subscribe(Box::new(move |settled| {
                if settled_flag.get() {
                    return;
                }
                match settled {
                    Ok(value) => {
                        values.borrow_mut().push(value);
                        if values.borrow().len() == count {
                            settled_flag.set(true);
                            resolver.fulfill(values.borrow_mut().drain(..).collect());
                            let reason = Fault::cancelled_because("enough awaitables won");
                            for other in &others {
                                other.cancel_with(reason.clone());
                            }
                        }
                    }
                    Err(reason) => {
                        reasons.borrow_mut()[index] = Some(reason);
                        rejection_count.set(rejection_count.get() + 1);
                        if rejection_count.get() > rejections_allowed {
                            settled_flag.set(true);
                            let collected: Vec<Reason> =
                                reasons.borrow_mut().drain(..).flatten().collect();
                            resolver.reject(Rc::new(Fault::AllRejected(collected)));
                            let cancel = Fault::cancelled_because("quorum became impossible");
                            for other in &others {
                                other.cancel_with(cancel.clone());
                            }
                        }
                    }
                }
            }));
        }
        combined
    }

    /// Settles with the first input to settle, either way, cancelling the
    /// rest.
    #[must_use]
    pub fn choose(inputs: Vec<Awaitable<T>>) -> Awaitable<T> {
        if inputs.is_empty() {
            return Awaitable::rejected(Fault::logic("choose() over no awaitables"));
        }
        for input in &inputs {
            input.inc_dependents();
        }

        let cancel_inputs = inputs.clone();
        let (combined, resolver) = Awaitable::pending_with_canceller(move |_, reason| {
            for input in &cancel_inputs {
                input.cancel_with(reason.clone());
            }
        });

        let decided = Rc::new(Cell::new(false));
        for (index, input) in inputs.iter().enumerate() {
            let decided = decided.clone();
            let resolver = resolver.clone();
            let others: Vec<Awaitable<T>> = inputs
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != index)
                .map(|(_, other)| other.clone())
                .collect();
            input.subscribe(Box::new(move |settled| {
                if decided.replace(true) {
                    return;
                }
                match settled {
                    Ok(value) => resolver.fulfill(value),
                    Err(reason) => resolver.reject(reason),
                }
                let reason = Fault::cancelled_because("another awaitable settled first");
                for other in &others {
                    other.cancel_with(reason.clone());
                }
            }));
        }
        combined
    }

    /// Waits for every input to settle and fulfils with the outcomes, in
    /// input order. Never rejects.
    #[must_use]
    pub fn settle(inputs: Vec<Awaitable<T>>) -> Awaitable<Vec<Settled<T>>> {
        if inputs.is_empty() {
            return Awaitable::resolved(Vec::new());
        }
        for input in &inputs {
            input.inc_dependents();
        }

        let cancel_inputs = inputs.clone();
        let (combined, resolver) = Awaitable::pending_with_canceller(move |_, reason| {
            for input in &cancel_inputs {
                input.cancel_with(reason.clone());
            }
        });

        let outcomes: Rc<RefCell<Vec<Option<Settled<T>>>>> =
            Rc::new(RefCell::new(vec![None; inputs.len()]));
        let remaining = Rc::new(Cell::new(inputs.len()));

        for (index, input) in inputs.iter().enumerate() {
            let outcomes = outcomes.clone();
            let remaining = remaining.clone();
            let resolver = resolver.clone();
            input.subscribe(Box::new(move |settled| {
                outcomes.borrow_mut()[index] = Some(settled);
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    let collected: Vec<Settled<T>> =
                        outcomes.borrow_mut().drain(..).flatten().collect();
                    resolver.fulfill(collected);
                }
            }));
        }
        combined
    }

    /// Transforms every input's value through `transform`, fulfilling with
    /// the transformed values in input order. An `Err` from the transform
    /// (or any input rejection) rejects the combination.
    pub fn map<U, F>(inputs: Vec<Awaitable<T>>, transform: F) -> Awaitable<Vec<U>>
    where
        U: Clone + 'static,
        F: FnMut(T) -> Result<U, Reason> + 'static,
    {
        let transform = Rc::new(RefCell::new(transform));
        let children: Vec<Awaitable<U>> = inputs
            .iter()
            .map(|input| {
                let transform = transform.clone();
                input.then(move |value| {
                    let transformed = (transform.borrow_mut())(value)?;
                    Ok(Resolution::Value(transformed))
                })
            })
            .collect();
        Awaitable::all(children)
    }

    /// Left-to-right fold: awaits each input in turn, feeding its value
    /// and the running accumulator through `combine`.
    pub fn fold<A, F>(inputs: Vec<Awaitable<T>>, init: A, combine: F) -> Awaitable<A>
    where
        A: Clone + 'static,
        F: FnMut(A, T) -> Result<A, Reason> + 'static,
    {
        fold_step(inputs.into_iter(), init, Rc::new(RefCell::new(combine)))
    }

    /// Repeatedly applies `step` to the previous result (starting from
    /// `seed`), awaiting whatever it returns, until it yields
    /// [`Flow::Break`].
    pub fn iterate<F>(seed: T, step: F) -> Awaitable<T>
    where
        F: FnMut(T) -> Result<Resolution<Flow<T>>, Reason> + 'static,
    {
        iterate_step(seed, Rc::new(RefCell::new(step)))
    }

    /// Invokes `factory` and, on rejection, asks `policy` (with the reason
    /// and the 1-based attempt number) whether to try again. Fulfils with
    /// the first success.
    pub fn retry<F, P>(factory: F, policy: P) -> Awaitable<T>
    where
        F: FnMut() -> Awaitable<T> + 'static,
        P: FnMut(&Reason, u32) -> bool + 'static,
    {
        retry_step(Rc::new(RefCell::new(factory)), Rc::new(RefCell::new(policy)), 1)
    }
}

fn fold_step<T, A, F>(
    mut inputs: std::vec::IntoIter<Awaitable<T>>,
    accumulator: A,
    combine: Rc<RefCell<F>>,
) -> Awaitable<A>
where
    T: Clone + 'static,
    A: Clone + 'static,
    F: FnMut(A, T) -> Result<A, Reason> + 'static,
{
    match inputs.next() {
        None => Awaitable::resolved(accumulator),
        Some(input) => input.then(move |value| {
            let next = { (combine.borrow_mut())(accumulator, value)? };
            Ok(Resolution::Chain(fold_step(inputs, next, combine)))
        }),
    }
}

fn iterate_step<T, F>(seed: T, step: Rc<RefCell<F>>) -> Awaitable<T>
where
    T: Clone + 'static,
    F: FnMut(T) -> Result<Resolution<Flow<T>>, Reason> + 'static,
{
    let produced = { (step.borrow_mut())(seed) };
    let flow = match produced {
        Ok(resolution) => Awaitable::from_resolution(resolution),
        Err(reason) => return Awaitable::rejected(reason),
    };
    flow.then(move |flow| match flow {
        Flow::Continue(next) => Ok(Resolution::Chain(iterate_step(next, step))),
        Flow::Break(value) => Ok(Resolution::Value(value)),
    })
}

fn retry_step<T, F, P>(
    factory: Rc<RefCell<F>>,
    policy: Rc<RefCell<P>>,
    attempt: u32,
) -> Awaitable<T>
where
    T: Clone + 'static,
    F: FnMut() -> Awaitable<T> + 'static,
    P: FnMut(&Reason, u32) -> bool + 'static,
{
    let current = { (factory.borrow_mut())() };
    current.catch(move |reason| {
        let try_again = { (policy.borrow_mut())(&reason, attempt) };
        if try_again {
            Ok(Resolution::Chain(retry_step(factory, policy, attempt + 1)))
        } else {
            Err(reason)
        }
    })
}
