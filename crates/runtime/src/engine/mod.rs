// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! The engine: a fixed pool of worker threads plus the OS reactor.
//!
//! Workers and the reactor come from a multi-threaded tokio runtime built on
//! [`Engine::run`]. A dedicated coordinator thread keeps timer deadlines.
//! Every unit of outstanding work holds a [`WorkGuard`]; [`Engine::stop`]
//! blocks until none is left and then joins every thread.

mod config;
mod priority;
mod work;

use std::{
	cell::Cell,
	collections::HashSet,
	sync::{
		Arc,
		atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
	},
	thread::{self, ThreadId},
};

pub use config::{DEFAULT_STRAND_BATCH, EngineConfig};
use parking_lot::{Condvar, Mutex, RwLock};
pub use priority::{SchedPolicy, ThreadPriority};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, warn};
pub use work::WorkGuard;
use work::WorkCounter;

use crate::{
	error::{Error, Result},
	return_usage_error,
	timer::scheduler::{Scheduler, SchedulerHandle},
};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

static ENGINE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

thread_local! {
	static CURRENT_ENGINE: Cell<u64> = const { Cell::new(0) };
}

/// Id of the engine whose worker is the current thread, 0 outside any engine.
pub(crate) fn current_engine_id() -> u64 {
	CURRENT_ENGINE.with(|current| current.get())
}

pub(crate) struct EngineInner {
	id: u64,
	config: EngineConfig,
	running: AtomicBool,
	runtime: Mutex<Option<Runtime>>,
	handle: RwLock<Option<Handle>>,
	timers: Mutex<Option<SchedulerHandle>>,
	scheduler: RwLock<Option<Scheduler>>,
	work: Arc<WorkCounter>,
	threads: Arc<Mutex<HashSet<ThreadId>>>,
	workers_up: Arc<Condvar>,
	thread_count: AtomicUsize,
	run_count: Arc<AtomicU64>,
}

impl EngineInner {
	pub(crate) fn id(&self) -> u64 {
		self.id
	}

	pub(crate) fn config(&self) -> &EngineConfig {
		&self.config
	}

	pub(crate) fn work_guard(&self) -> WorkGuard {
		self.work.guard()
	}

	pub(crate) fn scheduler(&self) -> Result<Scheduler> {
		self.scheduler.read().clone().ok_or(Error::EngineStopped)
	}

	pub(crate) fn post(&self, job: Job) -> Result<()> {
		let handle = self.handle.read();
		let Some(handle) = handle.as_ref() else {
			return Err(Error::EngineStopped);
		};

		let work = self.work.guard();
		let run_count = self.run_count.clone();
		handle.spawn(async move {
			let _work = work;
			run_count.fetch_add(1, Ordering::Relaxed);
			job();
		});
		Ok(())
	}

	pub(crate) fn running_in_this_engine(&self) -> bool {
		current_engine_id() == self.id
	}
}

impl Drop for EngineInner {
	fn drop(&mut self) {
		if let Some(mut timers) = self.timers.get_mut().take() {
			timers.shutdown();
		}
		if let Some(runtime) = self.runtime.get_mut().take() {
			warn!(engine = self.id, "engine dropped while running, abandoning outstanding work");
			runtime.shutdown_background();
		}
	}
}

/// A pool of worker threads that strands are multiplexed over.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct Engine {
	inner: Arc<EngineInner>,
}

impl Engine {
	pub fn new(config: EngineConfig) -> Self {
		Self {
			inner: Arc::new(EngineInner {
				id: ENGINE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
				config,
				running: AtomicBool::new(false),
				runtime: Mutex::new(None),
				handle: RwLock::new(None),
				timers: Mutex::new(None),
				scheduler: RwLock::new(None),
				work: Arc::new(WorkCounter::new()),
				threads: Arc::new(Mutex::new(HashSet::new())),
				workers_up: Arc::new(Condvar::new()),
				thread_count: AtomicUsize::new(0),
				run_count: Arc::new(AtomicU64::new(0)),
			}),
		}
	}

	pub fn id(&self) -> u64 {
		self.inner.id
	}

	pub fn title(&self) -> &str {
		&self.inner.config.title
	}

	pub fn config(&self) -> &EngineConfig {
		&self.inner.config
	}

	/// Start `threads` workers (at least one) and return once they are up.
	pub fn run(&self, threads: usize, policy: SchedPolicy) -> Result<()> {
		if self.inner.running.swap(true, Ordering::AcqRel) {
			return Err(Error::EngineRunning);
		}

		let threads = threads.max(1);
		if let Err(err) = self.start(threads, policy) {
			self.inner.running.store(false, Ordering::Release);
			return Err(err);
		}
		Ok(())
	}

	fn start(&self, threads: usize, policy: SchedPolicy) -> Result<()> {
		let engine_id = self.inner.id;
		let config = &self.inner.config;
		let title = config.title.clone();
		let worker_priority = config.priority;
		let affinity = config.affinity.clone();
		let start_registry = self.inner.threads.clone();
		let stop_registry = self.inner.threads.clone();
		let workers_up = self.inner.workers_up.clone();
		let name_index = AtomicUsize::new(0);
		let worker_index = AtomicUsize::new(0);

		let runtime = Builder::new_multi_thread()
			.worker_threads(threads)
			.thread_name_fn(move || format!("{}-{}", title, name_index.fetch_add(1, Ordering::Relaxed)))
			.on_thread_start(move || {
				CURRENT_ENGINE.with(|current| current.set(engine_id));
				// the hook also runs for blocking-pool threads, which only start
				// once every worker is up and so never claim a worker slot
				let index = worker_index.fetch_add(1, Ordering::Relaxed);
				if index < threads {
					start_registry.lock().insert(thread::current().id());
					workers_up.notify_all();
					priority::configure_worker(index, policy, worker_priority, &affinity);
				}
			})
			.on_thread_stop(move || {
				stop_registry.lock().remove(&thread::current().id());
				CURRENT_ENGINE.with(|current| current.set(0));
			})
			.enable_all()
			.build()?;

		{
			let mut registry = self.inner.threads.lock();
			while registry.len() < threads {
				self.inner.workers_up.wait(&mut registry);
			}
		}

		let timers = SchedulerHandle::start(format!("{}-timer", config.title))?;

		self.inner.run_count.store(0, Ordering::Relaxed);
		self.inner.thread_count.store(threads, Ordering::Relaxed);
		*self.inner.scheduler.write() = Some(timers.scheduler());
		*self.inner.timers.lock() = Some(timers);
		*self.inner.handle.write() = Some(runtime.handle().clone());
		*self.inner.runtime.lock() = Some(runtime);

		debug!(engine = engine_id, threads, ?policy, title = %config.title, "engine started");
		Ok(())
	}

	/// Block until the engine is quiescent, then join every thread.
	pub fn stop(&self) -> Result<()> {
		if !self.inner.running.load(Ordering::Acquire) {
			return Err(Error::EngineStopped);
		}
		if self.inner.running_in_this_engine() {
			return_usage_error!("engine {} cannot be stopped from its own worker thread", self.inner.id);
		}

		self.inner.work.wait_idle();

		if let Some(mut timers) = self.inner.timers.lock().take() {
			timers.shutdown();
		}
		self.inner.scheduler.write().take();
		self.inner.handle.write().take();

		// dropping the runtime joins the worker threads
		let runtime = self.inner.runtime.lock().take();
		drop(runtime);

		self.inner.thread_count.store(0, Ordering::Relaxed);
		self.inner.running.store(false, Ordering::Release);
		debug!(engine = self.inner.id, run_count = self.run_count(), "engine stopped");
		Ok(())
	}

	/// Run `job` on any worker.
	pub fn post<F>(&self, job: F) -> Result<()>
	where
		F: FnOnce() + Send + 'static,
	{
		self.inner.post(Box::new(job))
	}

	/// Keep [`stop`](Self::stop) waiting until the returned guard is dropped.
	pub fn hold_work(&self) -> WorkGuard {
		self.inner.work_guard()
	}

	pub fn outstanding_work(&self) -> usize {
		self.inner.work.outstanding()
	}

	pub fn is_running(&self) -> bool {
		self.inner.running.load(Ordering::Acquire)
	}

	pub fn running_in_this_engine(&self) -> bool {
		self.inner.running_in_this_engine()
	}

	/// Ids of the worker threads. Threads of tokio's blocking pool are
	/// engine threads too but are not listed here.
	pub fn thread_ids(&self) -> Vec<ThreadId> {
		self.inner.threads.lock().iter().copied().collect()
	}

	pub fn thread_count(&self) -> usize {
		self.inner.thread_count.load(Ordering::Relaxed)
	}

	/// Units of work executed since the last [`run`](Self::run).
	pub fn run_count(&self) -> u64 {
		self.inner.run_count.load(Ordering::Relaxed)
	}

	/// Tokio handle of the running engine, for I/O done from actor bodies.
	pub fn handle(&self) -> Result<Handle> {
		self.inner.handle.read().clone().ok_or(Error::EngineStopped)
	}

	pub(crate) fn inner(&self) -> &Arc<EngineInner> {
		&self.inner
	}

	pub(crate) fn from_inner(inner: Arc<EngineInner>) -> Self {
		Self {
			inner,
		}
	}
}

impl std::fmt::Debug for Engine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Engine")
			.field("id", &self.inner.id)
			.field("title", &self.inner.config.title)
			.field("running", &self.is_running())
			.finish()
	}
}
