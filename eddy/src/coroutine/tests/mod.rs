// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Driver tests, built on hand-rolled generator state machines (the same
//! shape application code uses when it has no native generators to lean
//! on).


use crate::facade;

pub(crate) fn pump() { facade::run().unwrap(); }
