// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Shared mutex with in-place upgrade.
//!
//! Wake policy:
//! - Waiters form one FIFO queue. A new shared request is only granted on the
//!   spot when nothing is queued, so a queued exclusive request blocks every
//!   shared request behind it (write preference).
//! - When the lock frees up, either the exclusive waiter at the head is
//!   granted, or the whole run of shared waiters at the head is released.
//! - Upgrades queue separately and take priority over both. A pending upgrade
//!   blocks new shared holders. The first upgrader is granted once every
//!   shared holder is parked in an upgrade request, itself included.
//!
//! Holds are tracked per actor: an actor asking for the mutex while already
//! holding it, shared or exclusive, gets a usage error instead of a deadlock.

use std::{
	collections::HashSet,
	future::Future,
	marker::PhantomData,
	pin::Pin,
	task::{Context, Poll, Waker},
};

use parking_lot::Mutex;

use super::waiter::{WaitQueue, wake_all};
use crate::{
	actor::Actor,
	error::Result,
	return_usage_error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Want {
	Shared,
	Exclusive,
}

struct SharedState {
	readers: usize,
	/// Actors holding a shared lock.
	holders: HashSet<u64>,
	writer: Option<u64>,
	upgraded: bool,
	queue: WaitQueue<(Want, u64)>,
	upgraders: WaitQueue,
	granted: HashSet<u64>,
}

impl SharedState {
	fn check(&self, actor: u64) -> Result<()> {
		if self.writer == Some(actor) {
			return_usage_error!("actor {} already holds this shared mutex exclusively", actor);
		}
		if self.holders.contains(&actor) {
			return_usage_error!("actor {} already holds this shared mutex shared", actor);
		}
		Ok(())
	}

	fn available(&self, want: Want) -> bool {
		let idle = self.writer.is_none() && !self.upgraded && self.upgraders.is_empty() && self.queue.is_empty();
		match want {
			Want::Shared => idle,
			Want::Exclusive => idle && self.readers == 0,
		}
	}

	fn take(&mut self, want: Want, actor: u64) {
		match want {
			Want::Shared => {
				self.readers += 1;
				self.holders.insert(actor);
			}
			Want::Exclusive => self.writer = Some(actor),
		}
	}

	fn give_back(&mut self, want: Want, actor: u64) {
		match want {
			Want::Shared => {
				self.readers -= 1;
				self.holders.remove(&actor);
			}
			Want::Exclusive => self.writer = None,
		}
	}

	/// Hand the lock to whoever is next; returns the wakers to call.
	fn grant(&mut self) -> Vec<Waker> {
		let mut wake = Vec::new();
		if self.writer.is_some() || self.upgraded {
			return wake;
		}

		if !self.upgraders.is_empty() {
			if self.readers == self.upgraders.len() {
				if let Some(next) = self.upgraders.pop_front() {
					self.upgraded = true;
					self.granted.insert(next.ticket);
					wake.push(next.waker);
				}
			}
			return wake;
		}

		match self.queue.front().map(|waiter| waiter.payload.0) {
			Some(Want::Exclusive) if self.readers == 0 => {
				if let Some(next) = self.queue.pop_front() {
					self.writer = Some(next.payload.1);
					self.granted.insert(next.ticket);
					wake.push(next.waker);
				}
			}
			Some(Want::Shared) => {
				while self.queue.front().is_some_and(|waiter| waiter.payload.0 == Want::Shared) {
					if let Some(next) = self.queue.pop_front() {
						self.readers += 1;
						self.holders.insert(next.payload.1);
						self.granted.insert(next.ticket);
						wake.push(next.waker);
					}
				}
			}
			_ => {}
		}
		wake
	}
}

/// Shared/exclusive lock for actors, with upgrade of a shared hold.
pub struct ActorSharedMutex {
	state: Mutex<SharedState>,
}

impl Default for ActorSharedMutex {
	fn default() -> Self {
		Self::new()
	}
}

impl ActorSharedMutex {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(SharedState {
				readers: 0,
				holders: HashSet::new(),
				writer: None,
				upgraded: false,
				queue: WaitQueue::new(),
				upgraders: WaitQueue::new(),
				granted: HashSet::new(),
			}),
		}
	}

	/// Suspend `actor` until it holds the mutex exclusively.
	pub async fn lock(&self, actor: &Actor) -> Result<SharedMutexGuard<'_>> {
		let actor = actor.id();
		Acquire::new(self, Want::Exclusive, actor).await?;
		Ok(SharedMutexGuard {
			mutex: self,
			actor,
		})
	}

	/// Suspend `actor` until it holds the mutex shared.
	pub async fn lock_shared(&self, actor: &Actor) -> Result<SharedMutexReadGuard<'_>> {
		let actor = actor.id();
		Acquire::new(self, Want::Shared, actor).await?;
		Ok(SharedMutexReadGuard {
			mutex: self,
			actor,
		})
	}

	pub fn readers(&self) -> usize {
		self.state.lock().readers
	}

	/// Held exclusively, either by a writer or by an upgraded reader.
	pub fn is_locked(&self) -> bool {
		let state = self.state.lock();
		state.writer.is_some() || state.upgraded
	}

	/// Id of the actor holding the mutex through [`lock`](Self::lock).
	pub fn owner(&self) -> Option<u64> {
		self.state.lock().writer
	}

	pub fn holds_shared(&self, actor: &Actor) -> bool {
		self.state.lock().holders.contains(&actor.id())
	}

	pub fn is_upgraded(&self) -> bool {
		self.state.lock().upgraded
	}

	pub fn waiting(&self) -> usize {
		let state = self.state.lock();
		state.queue.len() + state.upgraders.len()
	}

	fn release(&self, want: Want, actor: u64) {
		let wake = {
			let mut state = self.state.lock();
			state.give_back(want, actor);
			state.grant()
		};
		wake_all(wake);
	}

	fn demote(&self) {
		let wake = {
			let mut state = self.state.lock();
			state.upgraded = false;
			state.grant()
		};
		wake_all(wake);
	}
}

struct Acquire<'a> {
	mutex: &'a ActorSharedMutex,
	want: Want,
	actor: u64,
	ticket: Option<u64>,
	done: bool,
}

impl<'a> Acquire<'a> {
	fn new(mutex: &'a ActorSharedMutex, want: Want, actor: u64) -> Self {
		Self {
			mutex,
			want,
			actor,
			ticket: None,
			done: false,
		}
	}
}

impl Future for Acquire<'_> {
	type Output = Result<()>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		let this = self.get_mut();
		let mut state = this.mutex.state.lock();

		match this.ticket {
			None => {
				if let Err(err) = state.check(this.actor) {
					this.done = true;
					return Poll::Ready(Err(err));
				}
				if state.available(this.want) {
					state.take(this.want, this.actor);
					this.done = true;
					return Poll::Ready(Ok(()));
				}
				this.ticket = Some(state.queue.push_back(cx.waker().clone(), (this.want, this.actor)));
				Poll::Pending
			}
			Some(ticket) => {
				if state.granted.remove(&ticket) {
					this.done = true;
					Poll::Ready(Ok(()))
				} else {
					state.queue.update(ticket, cx.waker());
					Poll::Pending
				}
			}
		}
	}
}

impl Drop for Acquire<'_> {
	fn drop(&mut self) {
		let (Some(ticket), false) = (self.ticket, self.done) else {
			return;
		};

		let wake = {
			let mut state = self.mutex.state.lock();
			if state.queue.remove(ticket).is_none() && state.granted.remove(&ticket) {
				state.give_back(self.want, self.actor);
			}
			state.grant()
		};
		wake_all(wake);
	}
}

struct Upgrade<'a> {
	mutex: &'a ActorSharedMutex,
	ticket: Option<u64>,
	done: bool,
}

impl Future for Upgrade<'_> {
	type Output = ();

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
		let this = self.get_mut();
		let (ready, wake) = {
			let mut state = this.mutex.state.lock();
			match this.ticket {
				None => {
					if !state.upgraded && state.upgraders.is_empty() && state.readers == 1 {
						state.upgraded = true;
						(true, Vec::new())
					} else {
						let ticket = state.upgraders.push_back(cx.waker().clone(), ());
						this.ticket = Some(ticket);
						// parking may leave every reader waiting to upgrade
						let wake = state.grant();
						(state.granted.remove(&ticket), wake)
					}
				}
				Some(ticket) => {
					if state.granted.remove(&ticket) {
						(true, Vec::new())
					} else {
						state.upgraders.update(ticket, cx.waker());
						(false, Vec::new())
					}
				}
			}
		};

		wake_all(wake);
		if ready {
			this.done = true;
			Poll::Ready(())
		} else {
			Poll::Pending
		}
	}
}

impl Drop for Upgrade<'_> {
	fn drop(&mut self) {
		let (Some(ticket), false) = (self.ticket, self.done) else {
			return;
		};

		let wake = {
			let mut state = self.mutex.state.lock();
			if state.upgraders.remove(ticket).is_none() && state.granted.remove(&ticket) {
				state.upgraded = false;
			}
			state.grant()
		};
		wake_all(wake);
	}
}

/// Exclusive hold on an [`ActorSharedMutex`].
#[must_use = "the mutex unlocks as soon as the guard is dropped"]
pub struct SharedMutexGuard<'a> {
	mutex: &'a ActorSharedMutex,
	actor: u64,
}

impl SharedMutexGuard<'_> {
	pub fn unlock(self) {}
}

impl Drop for SharedMutexGuard<'_> {
	fn drop(&mut self) {
		self.mutex.release(Want::Exclusive, self.actor);
	}
}

/// Shared hold on an [`ActorSharedMutex`].
#[must_use = "the mutex unlocks as soon as the guard is dropped"]
pub struct SharedMutexReadGuard<'a> {
	mutex: &'a ActorSharedMutex,
	actor: u64,
}

impl SharedMutexReadGuard<'_> {
	pub fn unlock_shared(self) {}

	/// Convert this shared hold into exclusive access without letting any
	/// other actor in between. Dropping the returned guard demotes back.
	pub async fn lock_upgrade(&mut self) -> UpgradeGuard<'_> {
		Upgrade {
			mutex: self.mutex,
			ticket: None,
			done: false,
		}
		.await;

		UpgradeGuard {
			mutex: self.mutex,
			_hold: PhantomData,
		}
	}
}

impl Drop for SharedMutexReadGuard<'_> {
	fn drop(&mut self) {
		self.mutex.release(Want::Shared, self.actor);
	}
}

/// Exclusive access obtained by upgrading a shared hold.
#[must_use = "the upgrade is undone as soon as the guard is dropped"]
pub struct UpgradeGuard<'g> {
	mutex: &'g ActorSharedMutex,
	_hold: PhantomData<&'g mut ()>,
}

impl UpgradeGuard<'_> {
	pub fn unlock_upgrade(self) {}
}

impl Drop for UpgradeGuard<'_> {
	fn drop(&mut self) {
		self.mutex.demote();
	}
}
