// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Actors: cooperative tasks running on a fiber inside a strand.
//!
//! An actor's body is an async closure receiving the [`Actor`] handle. It is
//! created with [`Actor::create`], started with [`Actor::notify_run`] and
//! reaches `Quit` only after its body returned (or was unwound by a forced
//! quit) and every child it left behind has quit as well.
//!
//! ```no_run
//! use reifydb_runtime::{Actor, Engine, EngineConfig, SchedPolicy, Strand};
//!
//! let engine = Engine::new(EngineConfig::default());
//! engine.run(2, SchedPolicy::default()).unwrap();
//!
//! let actor = Actor::create(&Strand::create(&engine), |actor| async move {
//! 	let child = actor.create_child(|child| async move {
//! 		child.sleep(std::time::Duration::from_millis(10)).await?;
//! 		Ok(())
//! 	});
//! 	actor.child_run(&child)?;
//! 	actor.child_wait_quit(&child).await?;
//! 	Ok(())
//! });
//! actor.notify_run().unwrap();
//! actor.outside_wait_quit().unwrap();
//! engine.stop().unwrap();
//! ```

mod child;
mod fiber;
mod quit;

use std::{
	future::Future,
	pin::Pin,
	sync::{Arc, atomic::Ordering},
	task::{Context, Poll},
	time::Duration,
};

pub use child::ChildActor;
pub(crate) use fiber::ActorCell;
use fiber::Body;
pub use fiber::QuitWait;
use futures_util::future::{BoxFuture, Either, select};
pub(crate) use quit::QuitSlot;
pub use quit::{QuitGuard, QuitSignal};
use tracing::debug;

use crate::{
	engine::current_engine_id,
	error::{Error, Result},
	return_usage_error,
	strand::{StackMode, Strand},
	timer::Sleep,
	usage_error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorState {
	Created,
	Runnable,
	Running,
	Suspended,
	Quitting,
	Quit,
}

/// How an actor ended; visible to everyone waiting for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorExit {
	Completed,
	Failed(Error),
	Panicked(String),
	ForceQuit,
}

impl ActorExit {
	pub fn is_completed(&self) -> bool {
		matches!(self, ActorExit::Completed)
	}

	pub fn is_force_quit(&self) -> bool {
		matches!(self, ActorExit::ForceQuit)
	}
}

pub(crate) fn box_body<F, Fut>(body: F) -> Body
where
	F: FnOnce(Actor) -> Fut + Send + 'static,
	Fut: Future<Output = Result<()>> + Send + 'static,
{
	Box::new(move |actor| -> BoxFuture<'static, Result<()>> { Box::pin(body(actor)) })
}

/// Handle to an actor. Cheap to clone.
#[derive(Clone)]
pub struct Actor {
	pub(crate) cell: Arc<ActorCell>,
}

impl Actor {
	pub fn create<F, Fut>(strand: &Strand, body: F) -> Self
	where
		F: FnOnce(Actor) -> Fut + Send + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		Self::create_with_stack(strand, StackMode::Default, body)
	}

	pub fn create_with_stack<F, Fut>(strand: &Strand, stack: StackMode, body: F) -> Self
	where
		F: FnOnce(Actor) -> Fut + Send + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		Self::from_cell(ActorCell::new(strand.clone(), stack, None, box_body(body)))
	}

	pub(crate) fn from_cell(cell: Arc<ActorCell>) -> Self {
		Self {
			cell,
		}
	}

	pub fn id(&self) -> u64 {
		self.cell.id
	}

	pub fn strand(&self) -> &Strand {
		&self.cell.strand
	}

	pub fn parent_id(&self) -> Option<u64> {
		self.cell.parent
	}

	pub fn state(&self) -> ActorState {
		self.cell.core.lock().state
	}

	/// Exit of the actor, once it has quit.
	pub fn exit(&self) -> Option<ActorExit> {
		let core = self.cell.core.lock();
		if core.state == ActorState::Quit {
			core.exit.clone()
		} else {
			None
		}
	}

	pub fn is_quit(&self) -> bool {
		self.state() == ActorState::Quit
	}

	/// Children created and not yet waited for.
	pub fn child_count(&self) -> usize {
		self.cell.core.lock().children.len()
	}

	/// Make the actor runnable. Fails if it was started before or the engine
	/// is not running.
	pub fn notify_run(&self) -> Result<()> {
		let engine = self.cell.strand.inner().engine()?;
		{
			let mut core = self.cell.core.lock();
			if core.state != ActorState::Created {
				return_usage_error!("actor {} was already started", self.cell.id);
			}
			core.state = ActorState::Runnable;
			core.work = Some(engine.work_guard());
		}

		debug!(actor = self.cell.id, strand = self.cell.strand.id(), "actor started");
		self.cell.schedule();
		Ok(())
	}

	/// Request a forced quit. Usable from anywhere; does not wait.
	pub fn notify_quit(&self) {
		self.cell.request_quit();
	}

	/// Block the calling thread until the actor has quit.
	///
	/// Must not be called from a worker of the actor's engine.
	pub fn outside_wait_quit(&self) -> Result<ActorExit> {
		if current_engine_id() == self.cell.strand.inner().engine_id() {
			return_usage_error!("outside_wait_quit called on a worker of the actor's engine");
		}

		let mut core = self.cell.core.lock();
		if core.state == ActorState::Created {
			return_usage_error!("actor {} was never started", self.cell.id);
		}
		while core.state != ActorState::Quit {
			self.cell.quit_cond.wait(&mut core);
		}
		Ok(core.exit.clone().unwrap_or(ActorExit::Completed))
	}

	/// Wait from inside another actor for this one to quit.
	pub fn wait_quit(&self) -> QuitWait {
		QuitWait::new(self.cell.clone())
	}

	/// Wait for an actor that is not one of our children.
	pub async fn actor_wait_quit(&self, other: &Actor) -> Result<ActorExit> {
		if other.id() == self.id() {
			return_usage_error!("actor {} cannot wait for itself", self.id());
		}
		if other.state() == ActorState::Created {
			return_usage_error!("actor {} was never started", other.id());
		}
		Ok(other.wait_quit().await)
	}

	pub fn sleep_future(&self, delay: Duration) -> Result<Sleep> {
		let scheduler = self.cell.strand.inner().engine()?.scheduler()?;
		Ok(Sleep::new(scheduler, delay))
	}

	pub async fn sleep(&self, delay: Duration) -> Result<()> {
		self.sleep_future(delay)?.await;
		Ok(())
	}

	/// Give every other continuation queued on the strand a turn.
	pub fn yield_now(&self) -> YieldNow {
		YieldNow {
			yielded: false,
		}
	}

	/// Race `future` against a deadline. Exactly one outcome is observed and
	/// the loser is dropped.
	pub async fn timeout<F: Future>(&self, delay: Duration, future: F) -> Result<F::Output> {
		let sleep = self.sleep_future(delay)?;
		let future = std::pin::pin!(future);

		match select(future, sleep).await {
			Either::Left((output, _)) => Ok(output),
			Either::Right(((), _)) => Err(Error::Timeout(delay)),
		}
	}

	pub fn quit_guard(&self) -> QuitGuard {
		QuitGuard::new(self.cell.clone())
	}

	pub fn quit_requested(&self) -> bool {
		self.cell.quit_requested.load(Ordering::Acquire)
	}

	pub fn quit_signal(&self) -> QuitSignal {
		QuitSignal::new(self.cell.clone())
	}

	/// Remaining stack margin in bytes.
	pub fn check_stack(&self) -> Result<usize> {
		let core = self.cell.core.lock();
		match core.stack.as_ref() {
			Some(stack) => stack.check(self.cell.strand.stack_pool().config().min_margin),
			None => Err(usage_error!("actor {} has no stack checked out", self.cell.id)),
		}
	}

	pub fn stack_size(&self) -> usize {
		self.cell.core.lock().stack.as_ref().map_or(0, |stack| stack.size())
	}

	pub fn using_stack_size(&self) -> usize {
		self.cell.core.lock().stack.as_ref().map_or(0, |stack| stack.used())
	}
}

impl PartialEq for Actor {
	fn eq(&self, other: &Self) -> bool {
		self.cell.id == other.cell.id
	}
}

impl Eq for Actor {}

impl std::fmt::Debug for Actor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Actor").field("id", &self.cell.id).field("strand", &self.cell.strand.id()).finish()
	}
}

/// Future returned by [`Actor::yield_now`].
pub struct YieldNow {
	yielded: bool,
}

impl Future for YieldNow {
	type Output = ();

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
		if self.yielded {
			return Poll::Ready(());
		}
		self.yielded = true;
		cx.waker().wake_by_ref();
		Poll::Pending
	}
}
