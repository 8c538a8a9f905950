// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Outstanding-work accounting used by [`Engine::stop`](super::Engine::stop).

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

pub(crate) struct WorkCounter {
	outstanding: Mutex<usize>,
	idle: Condvar,
}

impl WorkCounter {
	pub(crate) fn new() -> Self {
		Self {
			outstanding: Mutex::new(0),
			idle: Condvar::new(),
		}
	}

	pub(crate) fn guard(self: &Arc<Self>) -> WorkGuard {
		*self.outstanding.lock() += 1;
		WorkGuard {
			counter: self.clone(),
		}
	}

	pub(crate) fn outstanding(&self) -> usize {
		*self.outstanding.lock()
	}

	/// Block until every guard has been dropped.
	pub(crate) fn wait_idle(&self) {
		let mut outstanding = self.outstanding.lock();
		while *outstanding > 0 {
			self.idle.wait(&mut outstanding);
		}
	}
}

/// Keeps its engine from becoming quiescent while alive.
///
/// Every posted job, queued strand continuation, live actor and armed timer
/// holds one of these. Hosts can take one with
/// [`Engine::hold_work`](super::Engine::hold_work) to keep `stop` waiting.
pub struct WorkGuard {
	counter: Arc<WorkCounter>,
}

impl Drop for WorkGuard {
	fn drop(&mut self) {
		let mut outstanding = self.counter.outstanding.lock();
		*outstanding -= 1;
		if *outstanding == 0 {
			self.counter.idle.notify_all();
		}
	}
}

impl std::fmt::Debug for WorkGuard {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WorkGuard").field("outstanding", &self.counter.outstanding()).finish()
	}
}
