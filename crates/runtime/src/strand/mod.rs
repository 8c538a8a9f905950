// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Strands: serialized task queues multiplexed over the engine's workers.
//!
//! At most one continuation of a strand runs at any instant. The queue is
//! drained by a single engine job at a time; the `running` flag decides who
//! schedules that job, so a strand is never present twice in the engine.

mod stack;

use std::{
	cell::Cell,
	collections::VecDeque,
	panic::{self, AssertUnwindSafe},
	sync::{
		Arc, Weak,
		atomic::{AtomicU64, AtomicUsize, Ordering},
	},
};

use parking_lot::Mutex;
pub use stack::{FiberStack, StackConfig, StackMode, StackPool, StackStats};
use tracing::{error, trace, warn};

use crate::{
	engine::{Engine, EngineInner, Job, WorkGuard},
	error::{Error, Result, panic_message},
	timer::Timer,
};

static STRAND_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

thread_local! {
	static CURRENT_STRAND: Cell<u64> = const { Cell::new(0) };
}

/// Marks the current thread as executing inside a strand until dropped.
struct StrandScope {
	previous: u64,
}

impl StrandScope {
	fn enter(id: u64) -> Self {
		Self {
			previous: CURRENT_STRAND.with(|current| current.replace(id)),
		}
	}
}

impl Drop for StrandScope {
	fn drop(&mut self) {
		CURRENT_STRAND.with(|current| current.set(self.previous));
	}
}

struct StrandQueue {
	ready: VecDeque<(Job, WorkGuard)>,
	running: bool,
}

pub(crate) struct StrandInner {
	id: u64,
	engine: Weak<EngineInner>,
	engine_id: u64,
	batch: usize,
	queue: Mutex<StrandQueue>,
	suspended: AtomicUsize,
	stacks: StackPool,
}

impl StrandInner {
	pub(crate) fn engine(&self) -> Result<Arc<EngineInner>> {
		self.engine.upgrade().ok_or(Error::EngineStopped)
	}

	pub(crate) fn engine_id(&self) -> u64 {
		self.engine_id
	}

	pub(crate) fn stacks(&self) -> &StackPool {
		&self.stacks
	}

	pub(crate) fn suspended(&self) {
		self.suspended.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn resumed(&self) {
		self.suspended.fetch_sub(1, Ordering::Relaxed);
	}

	pub(crate) fn post(self: &Arc<Self>, job: Job) -> Result<()> {
		let engine = self.engine()?;
		let work = engine.work_guard();

		let schedule = {
			let mut queue = self.queue.lock();
			queue.ready.push_back((job, work));
			!std::mem::replace(&mut queue.running, true)
		};

		if schedule {
			if let Err(err) = self.schedule(&engine) {
				self.abandon();
				return Err(err);
			}
		}
		Ok(())
	}

	fn schedule(self: &Arc<Self>, engine: &EngineInner) -> Result<()> {
		let strand = self.clone();
		engine.post(Box::new(move || strand.drain()))
	}

	/// Drop everything queued once the engine can no longer run it.
	fn abandon(&self) {
		let dropped: Vec<_> = {
			let mut queue = self.queue.lock();
			queue.running = false;
			queue.ready.drain(..).collect()
		};
		warn!(strand = self.id, dropped = dropped.len(), "engine unavailable, dropping strand work");
	}

	fn drain(self: &Arc<Self>) {
		{
			let _scope = StrandScope::enter(self.id);
			for _ in 0..self.batch {
				let (job, work) = {
					let mut queue = self.queue.lock();
					match queue.ready.pop_front() {
						Some(entry) => entry,
						None => {
							queue.running = false;
							return;
						}
					}
				};

				if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
					error!(strand = self.id, panic = %panic_message(payload.as_ref()), "strand continuation panicked");
				}
				drop(work);
			}
		}

		let more = {
			let mut queue = self.queue.lock();
			if queue.ready.is_empty() {
				queue.running = false;
			}
			queue.running
		};
		if !more {
			return;
		}

		trace!(strand = self.id, "strand batch exhausted, yielding worker");
		let rescheduled = self.engine().and_then(|engine| self.schedule(&engine));
		if rescheduled.is_err() {
			self.abandon();
		}
	}
}

/// A serialized execution queue bound to an engine.
///
/// Cloning yields another handle to the same strand; use
/// [`sibling`](Self::sibling) for a new strand on the same engine.
#[derive(Clone)]
pub struct Strand {
	inner: Arc<StrandInner>,
}

impl Strand {
	pub fn create(engine: &Engine) -> Self {
		let engine_inner = engine.inner();
		let config = engine_inner.config();
		Self {
			inner: Arc::new(StrandInner {
				id: STRAND_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
				engine: Arc::downgrade(engine_inner),
				engine_id: engine_inner.id(),
				batch: config.strand_batch.max(1),
				queue: Mutex::new(StrandQueue {
					ready: VecDeque::new(),
					running: false,
				}),
				suspended: AtomicUsize::new(0),
				stacks: StackPool::new(config.stack.clone()),
			}),
		}
	}

	pub fn create_multi(count: usize, engine: &Engine) -> Vec<Self> {
		(0..count).map(|_| Self::create(engine)).collect()
	}

	/// A new, independent strand on the same engine.
	pub fn sibling(&self) -> Result<Self> {
		let engine = self.engine()?;
		Ok(Self::create(&engine))
	}

	pub fn id(&self) -> u64 {
		self.inner.id
	}

	pub fn engine(&self) -> Result<Engine> {
		self.inner.engine().map(Engine::from_inner)
	}

	/// Queue `job` behind everything already posted to this strand.
	pub fn post<F>(&self, job: F) -> Result<()>
	where
		F: FnOnce() + Send + 'static,
	{
		self.inner.post(Box::new(job))
	}

	/// Run `job` right away when called from inside this strand, otherwise
	/// behave like [`post`](Self::post).
	pub fn dispatch<F>(&self, job: F) -> Result<()>
	where
		F: FnOnce() + Send + 'static,
	{
		if self.running_in_this_strand() {
			job();
			Ok(())
		} else {
			self.post(job)
		}
	}

	pub fn running_in_this_strand(&self) -> bool {
		CURRENT_STRAND.with(|current| current.get() == self.inner.id)
	}

	pub fn make_timer(&self) -> Timer {
		Timer::new(self.clone())
	}

	pub fn ready_len(&self) -> usize {
		self.inner.queue.lock().ready.len()
	}

	/// Actors of this strand currently suspended on a primitive.
	pub fn waiting_len(&self) -> usize {
		self.inner.suspended.load(Ordering::Relaxed)
	}

	pub fn is_empty(&self) -> bool {
		self.ready_len() == 0 && self.waiting_len() == 0
	}

	pub fn stack_pool(&self) -> &StackPool {
		&self.inner.stacks
	}

	pub(crate) fn inner(&self) -> &Arc<StrandInner> {
		&self.inner
	}
}

impl PartialEq for Strand {
	fn eq(&self, other: &Self) -> bool {
		self.inner.id == other.inner.id
	}
}

impl Eq for Strand {}

impl std::fmt::Debug for Strand {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Strand")
			.field("id", &self.inner.id)
			.field("engine", &self.inner.engine_id)
			.field("ready", &self.ready_len())
			.field("waiting", &self.waiting_len())
			.finish()
	}
}
