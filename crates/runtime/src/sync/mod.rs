// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Locks for actors.
//!
//! Waiting suspends the actor, never the worker thread. Lock state sits
//! behind a short critical section that is never held across a suspension,
//! and ownership is handed directly to the next waiter on release.

mod mutex;
mod shared;
pub(crate) mod waiter;

pub use mutex::{ActorMutex, ActorMutexGuard, MutexLock};
pub use shared::{ActorSharedMutex, SharedMutexGuard, SharedMutexReadGuard, UpgradeGuard};
