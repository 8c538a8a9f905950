// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{
	collections::HashSet,
	future::Future,
	pin::Pin,
	task::{Context, Poll},
};

use parking_lot::Mutex;

use super::waiter::WaitQueue;
use crate::{
	actor::Actor,
	error::Result,
	usage_error,
};

struct MutexState {
	owner: Option<u64>,
	waiters: WaitQueue<u64>,
	granted: HashSet<u64>,
}

/// Exclusive lock for actors with FIFO hand-off.
///
/// Unlocking passes ownership straight to the head of the queue, so no actor
/// arriving later can overtake a waiter. Locking a mutex already held by the
/// same actor is a usage error.
pub struct ActorMutex {
	state: Mutex<MutexState>,
}

impl Default for ActorMutex {
	fn default() -> Self {
		Self::new()
	}
}

impl ActorMutex {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(MutexState {
				owner: None,
				waiters: WaitQueue::new(),
				granted: HashSet::new(),
			}),
		}
	}

	/// Suspend `actor` until it holds the lock.
	pub fn lock<'a>(&'a self, actor: &Actor) -> MutexLock<'a> {
		MutexLock {
			mutex: self,
			actor: actor.id(),
			ticket: None,
			done: false,
		}
	}

	pub fn try_lock(&self, actor: &Actor) -> Option<ActorMutexGuard<'_>> {
		let mut state = self.state.lock();
		if state.owner.is_some() {
			return None;
		}
		state.owner = Some(actor.id());
		Some(ActorMutexGuard {
			mutex: self,
		})
	}

	pub fn is_locked(&self) -> bool {
		self.state.lock().owner.is_some()
	}

	/// Id of the actor holding the lock.
	pub fn owner(&self) -> Option<u64> {
		self.state.lock().owner
	}

	pub fn waiting(&self) -> usize {
		self.state.lock().waiters.len()
	}

	fn release(&self) {
		let waker = {
			let mut state = self.state.lock();
			match state.waiters.pop_front() {
				Some(next) => {
					state.owner = Some(next.payload);
					state.granted.insert(next.ticket);
					Some(next.waker)
				}
				None => {
					state.owner = None;
					None
				}
			}
		};
		if let Some(waker) = waker {
			waker.wake();
		}
	}
}

/// Future returned by [`ActorMutex::lock`].
pub struct MutexLock<'a> {
	mutex: &'a ActorMutex,
	actor: u64,
	ticket: Option<u64>,
	done: bool,
}

impl<'a> Future for MutexLock<'a> {
	type Output = Result<ActorMutexGuard<'a>>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();
		let mutex = this.mutex;
		let mut state = mutex.state.lock();

		match this.ticket {
			None => match state.owner {
				None => {
					state.owner = Some(this.actor);
					this.done = true;
					Poll::Ready(Ok(ActorMutexGuard {
						mutex,
					}))
				}
				Some(owner) if owner == this.actor => {
					this.done = true;
					Poll::Ready(Err(usage_error!("actor {} locked a mutex it already holds", owner)))
				}
				Some(_) => {
					this.ticket = Some(state.waiters.push_back(cx.waker().clone(), this.actor));
					Poll::Pending
				}
			},
			Some(ticket) => {
				if state.granted.remove(&ticket) {
					this.done = true;
					Poll::Ready(Ok(ActorMutexGuard {
						mutex,
					}))
				} else {
					state.waiters.update(ticket, cx.waker());
					Poll::Pending
				}
			}
		}
	}
}

impl Drop for MutexLock<'_> {
	fn drop(&mut self) {
		let Some(ticket) = self.ticket else {
			return;
		};
		if self.done {
			return;
		}

		let handed_over = {
			let mut state = self.mutex.state.lock();
			state.waiters.remove(ticket).is_none() && state.granted.remove(&ticket)
		};
		// ownership arrived after the waiter gave up, pass it on
		if handed_over {
			self.mutex.release();
		}
	}
}

/// Holds an [`ActorMutex`]; dropping it unlocks.
#[must_use = "the mutex unlocks as soon as the guard is dropped"]
pub struct ActorMutexGuard<'a> {
	mutex: &'a ActorMutex,
}

impl ActorMutexGuard<'_> {
	pub fn unlock(self) {}
}

impl Drop for ActorMutexGuard<'_> {
	fn drop(&mut self) {
		self.mutex.release();
	}
}
