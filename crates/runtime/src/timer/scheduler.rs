// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{
	cmp::Ordering as CmpOrdering,
	collections::BinaryHeap,
	io,
	sync::{
		Arc,
		atomic::{AtomicBool, AtomicU64, Ordering},
	},
	thread::{self, JoinHandle},
	time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use tracing::{debug, trace};

static TIMER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_timer_id() -> u64 {
	TIMER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct TimerEntry {
	id: u64,
	deadline: Instant,
	callback: Box<dyn FnOnce() + Send>,
	cancelled: Arc<AtomicBool>,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
	fn eq(&self, other: &Self) -> bool {
		self.deadline == other.deadline && self.id == other.id
	}
}

impl Ord for TimerEntry {
	// BinaryHeap is a max-heap, reverse to pop the earliest deadline first
	fn cmp(&self, other: &Self) -> CmpOrdering {
		other.deadline.cmp(&self.deadline).then_with(|| other.id.cmp(&self.id))
	}
}

impl PartialOrd for TimerEntry {
	fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
		Some(self.cmp(other))
	}
}

enum SchedulerCommand {
	Schedule {
		id: u64,
		delay: Duration,
		callback: Box<dyn FnOnce() + Send>,
		cancelled: Arc<AtomicBool>,
	},
	/// Drop a cancelled entry right away so whatever it captured is released.
	Cancel {
		id: u64,
	},
	Shutdown,
}

/// Handle to a scheduled deadline.
#[derive(Clone)]
pub struct TimerHandle {
	id: u64,
	cancelled: Arc<AtomicBool>,
	command_tx: Sender<SchedulerCommand>,
}

impl TimerHandle {
	/// Cancel the deadline. Returns `true` if this call did the cancelling.
	pub fn cancel(&self) -> bool {
		let cancelled = self.cancelled.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok();
		if cancelled {
			let _ = self.command_tx.send(SchedulerCommand::Cancel {
				id: self.id,
			});
		}
		cancelled
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}

	pub fn id(&self) -> u64 {
		self.id
	}
}

impl std::fmt::Debug for TimerHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TimerHandle").field("id", &self.id).field("cancelled", &self.is_cancelled()).finish()
	}
}

/// Cloneable access to a running coordinator.
#[derive(Clone)]
pub(crate) struct Scheduler {
	command_tx: Sender<SchedulerCommand>,
}

impl Scheduler {
	/// Run `callback` on the coordinator thread once `delay` has elapsed.
	///
	/// Callbacks must be short: they only hand work over to a strand or wake a
	/// waker, every other deadline waits behind them.
	pub(crate) fn schedule_once<F>(&self, delay: Duration, callback: F) -> TimerHandle
	where
		F: FnOnce() + Send + 'static,
	{
		let id = next_timer_id();
		let cancelled = Arc::new(AtomicBool::new(false));

		let _ = self.command_tx.send(SchedulerCommand::Schedule {
			id,
			delay,
			callback: Box::new(callback),
			cancelled: cancelled.clone(),
		});

		TimerHandle {
			id,
			cancelled,
			command_tx: self.command_tx.clone(),
		}
	}
}

/// Owner of the coordinator thread.
pub(crate) struct SchedulerHandle {
	scheduler: Scheduler,
	join_handle: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
	pub(crate) fn start(name: String) -> io::Result<Self> {
		let (command_tx, command_rx) = unbounded();

		let join_handle = thread::Builder::new().name(name).spawn(move || {
			scheduler_loop(command_rx);
		})?;

		Ok(Self {
			scheduler: Scheduler {
				command_tx,
			},
			join_handle: Some(join_handle),
		})
	}

	pub(crate) fn scheduler(&self) -> Scheduler {
		self.scheduler.clone()
	}

	/// Shutdown the coordinator and wait for it to exit. Pending deadlines are
	/// dropped without firing.
	pub(crate) fn shutdown(&mut self) {
		let _ = self.scheduler.command_tx.send(SchedulerCommand::Shutdown);

		if let Some(handle) = self.join_handle.take() {
			let _ = handle.join();
		}
	}
}

impl Drop for SchedulerHandle {
	fn drop(&mut self) {
		let _ = self.scheduler.command_tx.send(SchedulerCommand::Shutdown);
	}
}

fn scheduler_loop(command_rx: Receiver<SchedulerCommand>) {
	let mut heap: BinaryHeap<TimerEntry> = BinaryHeap::new();

	loop {
		let timeout = heap.peek().map(|entry| entry.deadline.saturating_duration_since(Instant::now()));

		let command = match timeout {
			Some(Duration::ZERO) => command_rx.try_recv().ok(),
			Some(dur) => match command_rx.recv_timeout(dur) {
				Ok(cmd) => Some(cmd),
				Err(RecvTimeoutError::Timeout) => None,
				Err(RecvTimeoutError::Disconnected) => return,
			},
			None => match command_rx.recv() {
				Ok(cmd) => Some(cmd),
				Err(_) => return,
			},
		};

		if let Some(cmd) = command {
			match cmd {
				SchedulerCommand::Schedule {
					id,
					delay,
					callback,
					cancelled,
				} => {
					if delay.is_zero() {
						if !cancelled.swap(true, Ordering::SeqCst) {
							callback();
						}
						continue;
					}

					heap.push(TimerEntry {
						id,
						deadline: Instant::now() + delay,
						callback,
						cancelled,
					});
				}
				SchedulerCommand::Cancel {
					id,
				} => {
					heap.retain(|entry| entry.id != id);
					trace!(timer = id, "timer cancelled");
				}
				SchedulerCommand::Shutdown => {
					debug!(pending = heap.len(), "timer scheduler shutting down");
					return;
				}
			}
		}

		let now = Instant::now();
		while heap.peek().is_some_and(|entry| entry.deadline <= now) {
			let Some(entry) = heap.pop() else {
				break;
			};

			if entry.cancelled.swap(true, Ordering::SeqCst) {
				continue;
			}

			trace!(timer = entry.id, "timer fired");
			(entry.callback)();
		}
	}
}
