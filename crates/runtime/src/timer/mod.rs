// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Timers bound to a strand.
//!
//! Deadlines are kept by the engine's coordinator thread. When one expires
//! its callback is posted into the owning strand, so it never races other
//! work of that strand.

pub(crate) mod scheduler;
mod sleep;

use std::{
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
	time::Duration,
};

use parking_lot::Mutex;
pub use scheduler::TimerHandle;
pub use sleep::Sleep;
use tracing::warn;

use crate::{error::Result, strand::Strand};

struct TimerState {
	generation: AtomicU64,
	pending: Mutex<Option<TimerHandle>>,
}

/// A single re-armable deadline on a strand. Dropping the timer cancels it.
pub struct Timer {
	strand: Strand,
	state: Arc<TimerState>,
}

impl Timer {
	pub(crate) fn new(strand: Strand) -> Self {
		Self {
			strand,
			state: Arc::new(TimerState {
				generation: AtomicU64::new(0),
				pending: Mutex::new(None),
			}),
		}
	}

	/// Arm the timer; `callback` runs on the strand once `delay` has elapsed.
	///
	/// Arming again before expiry replaces the previous deadline, whose
	/// callback will not run.
	pub fn timeout<F>(&self, delay: Duration, callback: F) -> Result<()>
	where
		F: FnOnce() + Send + 'static,
	{
		let engine = self.strand.inner().engine()?;
		let scheduler = engine.scheduler()?;

		let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
		let work = engine.work_guard();
		let strand = self.strand.clone();
		let state = self.state.clone();

		let handle = scheduler.schedule_once(delay, move || {
			let posted = strand.post(move || {
				let _work = work;
				if state.generation.load(Ordering::SeqCst) == generation {
					callback();
				}
			});
			if let Err(err) = posted {
				warn!(strand = strand.id(), %err, "expired timer could not be posted");
			}
		});

		if let Some(previous) = self.state.pending.lock().replace(handle) {
			previous.cancel();
		}
		Ok(())
	}

	/// Disarm the timer. Returns `true` if a deadline was pending.
	pub fn cancel(&self) -> bool {
		self.state.generation.fetch_add(1, Ordering::SeqCst);
		match self.state.pending.lock().take() {
			Some(handle) => handle.cancel(),
			None => false,
		}
	}

	/// Whether a deadline is armed and has not expired yet.
	pub fn is_pending(&self) -> bool {
		self.state.pending.lock().as_ref().is_some_and(|handle| !handle.is_cancelled())
	}

	pub fn strand(&self) -> &Strand {
		&self.strand
	}
}

impl Drop for Timer {
	fn drop(&mut self) {
		self.cancel();
	}
}
