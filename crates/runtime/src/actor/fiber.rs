// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! The fiber of an actor and the loop that drives it.
//!
//! The body future is polled only from a job posted into the actor's strand,
//! so at most one poll per strand runs at a time. The actor's waker re-posts
//! that job; `scheduled` keeps a single run job in flight.

use std::{
	any::{Any, TypeId},
	collections::HashMap,
	future::Future,
	mem,
	panic::{self, AssertUnwindSafe},
	pin::Pin,
	sync::{
		Arc,
		atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
	},
	task::{Context, Poll, Wake, Waker},
};

use futures_util::future::{BoxFuture, join_all};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace, warn};

use super::{Actor, ActorExit, ActorState, quit::QuitSlot};
use crate::{
	engine::WorkGuard,
	error::{Result, panic_message},
	strand::{FiberStack, StackMode, Strand},
};

pub(crate) type Body = Box<dyn FnOnce(Actor) -> BoxFuture<'static, Result<()>> + Send>;

static ACTOR_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

enum Phase {
	Body(BoxFuture<'static, Result<()>>),
	/// Force-quit and await the children left behind by the body.
	Teardown(BoxFuture<'static, ()>),
}

pub(crate) struct ActorCore {
	pub(crate) state: ActorState,
	body: Option<Body>,
	fiber: Option<Phase>,
	pub(crate) children: Vec<Actor>,
	pub(crate) exit: Option<ActorExit>,
	quit_waiters: Vec<Waker>,
	pub(crate) signal_waiters: Vec<Waker>,
	slots: Vec<Arc<dyn QuitSlot>>,
	pub(crate) pumps: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
	pub(crate) stack: Option<FiberStack>,
	pub(crate) work: Option<WorkGuard>,
}

pub(crate) struct ActorCell {
	pub(crate) id: u64,
	pub(crate) strand: Strand,
	pub(crate) stack_mode: StackMode,
	pub(crate) parent: Option<u64>,
	scheduled: AtomicBool,
	finished: AtomicBool,
	pub(crate) quit_requested: AtomicBool,
	pub(crate) quit_locks: AtomicUsize,
	pub(crate) waited: AtomicBool,
	pub(crate) core: Mutex<ActorCore>,
	pub(crate) quit_cond: Condvar,
}

impl ActorCell {
	pub(crate) fn new(strand: Strand, stack_mode: StackMode, parent: Option<u64>, body: Body) -> Arc<Self> {
		Arc::new(Self {
			id: ACTOR_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
			strand,
			stack_mode,
			parent,
			scheduled: AtomicBool::new(false),
			finished: AtomicBool::new(false),
			quit_requested: AtomicBool::new(false),
			quit_locks: AtomicUsize::new(0),
			waited: AtomicBool::new(false),
			core: Mutex::new(ActorCore {
				state: ActorState::Created,
				body: Some(body),
				fiber: None,
				children: Vec::new(),
				exit: None,
				quit_waiters: Vec::new(),
				signal_waiters: Vec::new(),
				slots: Vec::new(),
				pumps: HashMap::new(),
				stack: None,
				work: None,
			}),
			quit_cond: Condvar::new(),
		})
	}

	/// Post a run job into the strand unless one is already queued.
	pub(crate) fn schedule(self: &Arc<Self>) {
		if self.finished.load(Ordering::Acquire) || self.scheduled.swap(true, Ordering::AcqRel) {
			return;
		}

		let cell = self.clone();
		if let Err(err) = self.strand.inner().post(Box::new(move || cell.run())) {
			self.scheduled.store(false, Ordering::Release);
			warn!(actor = self.id, %err, "actor could not be scheduled");
		}
	}

	fn run(self: &Arc<Self>) {
		self.scheduled.store(false, Ordering::Release);

		let (fiber, body) = {
			let mut core = self.core.lock();
			match core.state {
				ActorState::Created | ActorState::Quit => return,
				ActorState::Suspended => {
					self.strand.inner().resumed();
					core.state = ActorState::Running;
				}
				ActorState::Runnable => core.state = ActorState::Running,
				ActorState::Running | ActorState::Quitting => {}
			}
			(core.fiber.take(), core.body.take())
		};

		let fiber = match (fiber, body) {
			(Some(fiber), _) => fiber,
			(None, Some(body)) => match self.start_fiber(body) {
				Ok(future) => Phase::Body(future),
				Err(exit) => return self.begin_quit(exit),
			},
			(None, None) => return,
		};

		match fiber {
			Phase::Body(future) => self.poll_body(future),
			Phase::Teardown(future) => self.poll_teardown(future),
		}
	}

	fn start_fiber(self: &Arc<Self>, body: Body) -> std::result::Result<BoxFuture<'static, Result<()>>, ActorExit> {
		let actor = Actor::from_cell(self.clone());
		let future = panic::catch_unwind(AssertUnwindSafe(move || body(actor)))
			.map_err(|payload| ActorExit::Panicked(panic_message(payload.as_ref())))?;

		let frame = mem::size_of_val(&*future);
		let stack = match self.strand.stack_pool().acquire(self.stack_mode, frame) {
			Ok(stack) => stack,
			Err(err) => {
				drop_fiber(future);
				return Err(ActorExit::Failed(err));
			}
		};

		trace!(actor = self.id, frame, stack = stack.size(), "fiber started");
		self.core.lock().stack = Some(stack);
		Ok(future)
	}

	fn poll_body(self: &Arc<Self>, mut future: BoxFuture<'static, Result<()>>) {
		if self.quit_requested.load(Ordering::Acquire) && self.quit_locks.load(Ordering::Acquire) == 0 {
			trace!(actor = self.id, "unwinding fiber for forced quit");
			drop_fiber(future);
			return self.begin_quit(ActorExit::ForceQuit);
		}

		let waker = Waker::from(self.clone());
		let mut cx = Context::from_waker(&waker);

		match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
			Ok(Poll::Pending) => self.suspend(Phase::Body(future)),
			Ok(Poll::Ready(result)) => {
				drop_fiber(future);
				let exit = match result {
					Ok(()) => ActorExit::Completed,
					Err(err) => ActorExit::Failed(err),
				};
				self.begin_quit(exit);
			}
			Err(payload) => {
				drop_fiber(future);
				self.begin_quit(ActorExit::Panicked(panic_message(payload.as_ref())));
			}
		}
	}

	fn poll_teardown(self: &Arc<Self>, mut future: BoxFuture<'static, ()>) {
		let waker = Waker::from(self.clone());
		let mut cx = Context::from_waker(&waker);

		match future.as_mut().poll(&mut cx) {
			Poll::Pending => self.core.lock().fiber = Some(Phase::Teardown(future)),
			Poll::Ready(()) => self.finish(),
		}
	}

	fn suspend(&self, fiber: Phase) {
		let mut core = self.core.lock();
		core.fiber = Some(fiber);
		if core.state == ActorState::Running {
			core.state = ActorState::Suspended;
			self.strand.inner().suspended();
		}
	}

	/// Enter `Quitting`: close every mailbox, then force-quit and await the
	/// children still attached.
	fn begin_quit(self: &Arc<Self>, exit: ActorExit) {
		match &exit {
			ActorExit::Completed => debug!(actor = self.id, "actor body completed"),
			ActorExit::ForceQuit => debug!(actor = self.id, "actor force quit"),
			ActorExit::Failed(err) => warn!(actor = self.id, %err, "actor body failed"),
			ActorExit::Panicked(message) => error!(actor = self.id, panic = %message, "actor body panicked"),
		}

		let (children, slots, pumps) = {
			let mut core = self.core.lock();
			core.state = ActorState::Quitting;
			core.exit = Some(exit);
			(mem::take(&mut core.children), mem::take(&mut core.slots), mem::take(&mut core.pumps))
		};

		for slot in slots {
			slot.close();
		}
		drop(pumps);

		if children.is_empty() {
			return self.finish();
		}

		trace!(actor = self.id, children = children.len(), "tearing down children");
		let teardown = Box::pin(async move {
			for child in &children {
				child.cell.request_quit();
			}
			join_all(children.iter().map(|child| QuitWait::new(child.cell.clone()))).await;
		});
		self.poll_teardown(teardown);
	}

	fn finish(&self) {
		let (waiters, signal_waiters, stack, work) = {
			let mut core = self.core.lock();
			core.state = ActorState::Quit;
			core.fiber = None;
			core.body = None;
			(
				mem::take(&mut core.quit_waiters),
				mem::take(&mut core.signal_waiters),
				core.stack.take(),
				core.work.take(),
			)
		};
		self.finished.store(true, Ordering::Release);

		if let Some(stack) = stack {
			self.strand.stack_pool().release(stack);
		}

		self.quit_cond.notify_all();
		for waker in waiters {
			waker.wake();
		}
		drop(signal_waiters);

		debug!(actor = self.id, strand = self.strand.id(), "actor quit");
		drop(work);
	}

	/// Ask the actor to quit. An actor that never started quits on the spot.
	pub(crate) fn request_quit(self: &Arc<Self>) {
		let unstarted = {
			let mut core = self.core.lock();
			match core.state {
				ActorState::Quitting | ActorState::Quit => return,
				ActorState::Created => {
					core.state = ActorState::Quitting;
					core.body.take()
				}
				_ => None,
			}
		};

		if let Some(body) = unstarted {
			drop(body);
			self.quit_requested.store(true, Ordering::Release);
			return self.begin_quit(ActorExit::ForceQuit);
		}

		if self.quit_requested.swap(true, Ordering::AcqRel) {
			return;
		}
		trace!(actor = self.id, "quit requested");

		let signal_waiters = mem::take(&mut self.core.lock().signal_waiters);
		for waker in signal_waiters {
			waker.wake();
		}
		self.schedule();
	}

	/// Attach a mailbox to this actor; it is closed when the actor quits.
	pub(crate) fn register_slot(&self, slot: Arc<dyn QuitSlot>) {
		let closed = {
			let mut core = self.core.lock();
			if matches!(core.state, ActorState::Quitting | ActorState::Quit) {
				true
			} else {
				core.slots.push(slot.clone());
				false
			}
		};
		if closed {
			slot.close();
		}
	}

	pub(crate) fn is_quitting(&self) -> bool {
		matches!(self.core.lock().state, ActorState::Quitting | ActorState::Quit)
	}
}

impl Wake for ActorCell {
	fn wake(self: Arc<Self>) {
		self.schedule();
	}

	fn wake_by_ref(self: &Arc<Self>) {
		self.schedule();
	}
}

/// Drop a fiber, running the destructors of everything it holds.
fn drop_fiber<T>(fiber: T) {
	if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || drop(fiber))) {
		error!(panic = %panic_message(payload.as_ref()), "panic while unwinding fiber");
	}
}

/// Resolves with the exit of an actor once it reaches `Quit`.
pub struct QuitWait {
	cell: Arc<ActorCell>,
}

impl QuitWait {
	pub(crate) fn new(cell: Arc<ActorCell>) -> Self {
		Self {
			cell,
		}
	}
}

impl Future for QuitWait {
	type Output = ActorExit;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<ActorExit> {
		let mut core = self.cell.core.lock();
		if core.state == ActorState::Quit {
			return Poll::Ready(core.exit.clone().unwrap_or(ActorExit::Completed));
		}
		if !core.quit_waiters.iter().any(|waker| waker.will_wake(cx.waker())) {
			core.quit_waiters.push(cx.waker().clone());
		}
		Poll::Pending
	}
}
