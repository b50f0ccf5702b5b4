// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words pipefd

//! I/O readiness watchers, exercised over pipes on both poll backends.

use crate::{Awaitable, BackendChoice, Loop, LoopError, Readiness, facade};
use pretty_assertions::assert_eq;
use rustix::pipe::{PipeFlags, pipe_with};
use std::{cell::RefCell,
          os::fd::{AsRawFd, OwnedFd},
          rc::Rc,
          time::{Duration, Instant}};
use test_case::test_case;

fn pipe() -> (OwnedFd, OwnedFd) {
    pipe_with(PipeFlags::CLOEXEC | PipeFlags::NONBLOCK).unwrap()
}

fn loop_with(choice: BackendChoice) -> Loop {
    Loop::builder().backend(choice).build().unwrap()
}

#[test_case(BackendChoice::Accelerated; "accelerated backend")]
#[test_case(BackendChoice::Portable; "portable backend")]
fn readable_watcher_fires_when_data_arrives(choice: BackendChoice) {
    super::init_tracing();
    facade::with_loop(Some(loop_with(choice)), |event_loop| {
        let (read_end, write_end) = pipe();
        let received = Rc::new(RefCell::new(Vec::new()));
        let received_in_cb = received.clone();
        let read_fd_holder = Rc::new(read_end);
        let read_in_cb = read_fd_holder.clone();

        let watcher = event_loop
            .poll(read_fd_holder.as_raw_fd(), move |_, readiness| {
                assert_eq!(readiness, Readiness::Ready);
                let mut chunk = [0u8; 64];
                if let Ok(n) = rustix::io::read(&*read_in_cb, &mut chunk) {
                    received_in_cb.borrow_mut().extend_from_slice(&chunk[..n]);
                }
            })
            .unwrap();

        rustix::io::write(&write_end, b"ping").unwrap();
        event_loop.run().unwrap();

        assert_eq!(*received.borrow(), b"ping");
        // Readiness delivery is one-shot.
        assert!(!watcher.is_pending());
    })
    .unwrap();
}

#[test_case(BackendChoice::Accelerated; "accelerated backend")]
#[test_case(BackendChoice::Portable; "portable backend")]
fn writable_watcher_fires_on_an_empty_pipe(choice: BackendChoice) {
    facade::with_loop(Some(loop_with(choice)), |event_loop| {
        let (_read_end, write_end) = pipe();
        let fired = Rc::new(RefCell::new(false));
        let fired_in_cb = fired.clone();
        let _watcher = event_loop
            .wait(write_end.as_raw_fd(), move |_, readiness| {
                assert_eq!(readiness, Readiness::Ready);
                *fired_in_cb.borrow_mut() = true;
            })
            .unwrap();

        event_loop.run().unwrap();
        assert!(*fired.borrow());
    })
    .unwrap();
}

#[test_case(BackendChoice::Accelerated; "accelerated backend")]
#[test_case(BackendChoice::Portable; "portable backend")]
fn per_arming_timeout_fires_with_timed_out(choice: BackendChoice) {
    facade::with_loop(Some(loop_with(choice)), |event_loop| {
        let (read_end, _write_end) = pipe();
        let outcome = Rc::new(RefCell::new(None));
        let outcome_in_cb = outcome.clone();
        let watcher = event_loop
            .poll(read_end.as_raw_fd(), move |_, readiness| {
                *outcome_in_cb.borrow_mut() = Some(readiness);
            })
            .unwrap();

        // Re-arm with a deadline; no data ever arrives.
        watcher.cancel().unwrap();
        watcher.listen(Some(Duration::from_millis(20))).unwrap();

        let started = Instant::now();
        event_loop.run().unwrap();

        assert_eq!(*outcome.borrow(), Some(Readiness::TimedOut));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(!watcher.is_pending());
    })
    .unwrap();
}

#[test]
fn duplicate_fd_registration_is_resource_busy() {
    facade::with_loop(None, |event_loop| {
        let (read_end, _write_end) = pipe();
        let _first = event_loop.poll(read_end.as_raw_fd(), |_, _| {}).unwrap();
        let second = event_loop.poll(read_end.as_raw_fd(), |_, _| {});
        assert!(matches!(second, Err(LoopError::ResourceBusy { .. })));
    })
    .unwrap();
}

#[test]
fn freed_watcher_releases_its_fd_slot() {
    facade::with_loop(None, |event_loop| {
        let (read_end, _write_end) = pipe();
        let first = event_loop.poll(read_end.as_raw_fd(), |_, _| {}).unwrap();
        first.free();
        assert!(matches!(first.listen(None), Err(LoopError::Freed { .. })));
        // The fd can back a fresh watcher once the old one is gone.
        let _second = event_loop.poll(read_end.as_raw_fd(), |_, _| {}).unwrap();
    })
    .unwrap();
}

#[test_case(BackendChoice::Accelerated; "accelerated backend")]
#[test_case(BackendChoice::Portable; "portable backend")]
fn re_init_keeps_armed_watchers_working(choice: BackendChoice) {
    facade::with_loop(Some(loop_with(choice)), |event_loop| {
        let (read_end, write_end) = pipe();
        let fired = Rc::new(RefCell::new(false));
        let fired_in_cb = fired.clone();
        let _watcher = event_loop
            .poll(read_end.as_raw_fd(), move |_, _| *fired_in_cb.borrow_mut() = true)
            .unwrap();

        event_loop.re_init().unwrap();
        rustix::io::write(&write_end, b"x").unwrap();
        event_loop.run().unwrap();
        assert!(*fired.borrow());
    })
    .unwrap();
}

/// Reads from the pipe until a `\n` shows up, then fulfils a downstream
/// awaitable with the prefix before the delimiter.
#[test_case(BackendChoice::Accelerated; "accelerated backend")]
#[test_case(BackendChoice::Portable; "portable backend")]
fn read_until_delimiter_feeds_an_awaitable(choice: BackendChoice) {
    facade::with_loop(Some(loop_with(choice)), |event_loop| {
        let (read_end, write_end) = pipe();
        let read_end = Rc::new(read_end);
        let (line, resolver) = Awaitable::<String>::pending();

        let buffer: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let watcher_slot: Rc<RefCell<Option<crate::IoWatcher>>> =
            Rc::new(RefCell::new(None));

        let watcher = {
            let buffer = buffer.clone();
            let read_end = read_end.clone();
            let watcher_slot = watcher_slot.clone();
            event_loop
                .poll(read_end.as_raw_fd(), move |_, _| {
                    let mut chunk = [0u8; 64];
                    if let Ok(n) = rustix::io::read(&*read_end, &mut chunk) {
                        buffer.borrow_mut().extend_from_slice(&chunk[..n]);
                    }
                    let delimiter = buffer.borrow().iter().position(|byte| *byte == b'\n');
                    if let Some(position) = delimiter {
                        let prefix =
                            String::from_utf8_lossy(&buffer.borrow()[..position]).into_owned();
                        resolver.fulfill(prefix);
                        if let Some(watcher) = watcher_slot.borrow_mut().take() {
                            watcher.free();
                        }
                    } else if let Some(watcher) = watcher_slot.borrow().as_ref() {
                        // No delimiter yet: re-arm for the next chunk.
                        watcher.listen(None).unwrap();
                    }
                })
                .unwrap()
        };
        *watcher_slot.borrow_mut() = Some(watcher);

        // First half now, the rest (with the delimiter) a little later.
        rustix::io::write(&write_end, b"hel").unwrap();
        let _timer = event_loop.timer(Duration::from_millis(10), move || {
            rustix::io::write(&write_end, b"lo\nleftover").unwrap();
        });

        let observed = Rc::new(RefCell::new(None));
        let observed_in_cb = observed.clone();
        line.done(move |prefix| *observed_in_cb.borrow_mut() = Some(prefix));

        event_loop.run().unwrap();
        assert_eq!(observed.borrow_mut().take().unwrap(), "hello");
    })
    .unwrap();
}
