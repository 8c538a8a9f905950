// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Test tooling shared by the runtime's integration tests.

pub mod trace;
pub mod util;

pub use trace::{Event, Trace};
pub use util::wait::{wait_for, wait_for_async, wait_for_condition};
