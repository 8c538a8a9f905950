// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{
	future::Future,
	mem,
	pin::Pin,
	sync::{Arc, Weak},
	task::{Context, Poll, Waker},
};

use parking_lot::Mutex;
use tracing::trace;

use crate::{
	actor::{Actor, QuitSlot},
	error::{Error, Result},
	return_usage_error,
};

struct TrigState<T> {
	value: Option<T>,
	waiter: Option<Waker>,
	owner: Option<u64>,
	armed: bool,
	waited: bool,
	lost: bool,
}

struct TrigSlot<T> {
	state: Mutex<TrigState<T>>,
}

impl<T> TrigSlot<T> {
	fn lose(&self) {
		let (value, waker) = {
			let mut state = self.state.lock();
			state.lost = true;
			(state.value.take(), state.waiter.take())
		};
		drop(value);
		if let Some(waker) = waker {
			waker.wake();
		}
	}
}

impl<T: Send + 'static> QuitSlot for TrigSlot<T> {
	fn close(&self) {
		self.lose();
	}
}

/// Receiving end of a one-shot notification, bound to one actor.
///
/// Exactly one [`Trigger`] can be made for a handle and the handle can be
/// waited on exactly once.
pub struct TrigHandle<T> {
	slot: Arc<TrigSlot<T>>,
}

impl<T> TrigHandle<T> {
	pub fn new() -> Self {
		Self {
			slot: Arc::new(TrigSlot {
				state: Mutex::new(TrigState {
					value: None,
					waiter: None,
					owner: None,
					armed: false,
					waited: false,
					lost: false,
				}),
			}),
		}
	}

	pub fn owner(&self) -> Option<u64> {
		self.slot.state.lock().owner
	}
}

impl<T> Default for TrigHandle<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> Clone for TrigHandle<T> {
	fn clone(&self) -> Self {
		Self {
			slot: self.slot.clone(),
		}
	}
}

/// Sending end of a one-shot notification. Dropping it unfired makes the
/// waiting side fail with [`Error::LostNotifier`].
#[must_use = "dropping a trigger without firing it loses the notification"]
pub struct Trigger<T> {
	slot: Weak<TrigSlot<T>>,
	fired: bool,
}

impl<T> Trigger<T> {
	pub fn trig(mut self, value: T) -> Result<()> {
		self.fired = true;
		let Some(slot) = self.slot.upgrade() else {
			return Err(Error::LostNotifier);
		};

		let waker = {
			let mut state = slot.state.lock();
			if state.lost {
				return Err(Error::LostNotifier);
			}
			state.value = Some(value);
			state.waiter.take()
		};
		if let Some(waker) = waker {
			waker.wake();
		}
		Ok(())
	}

	pub fn is_lost(&self) -> bool {
		match self.slot.upgrade() {
			Some(slot) => slot.state.lock().lost,
			None => true,
		}
	}
}

impl<T> std::fmt::Debug for Trigger<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Trigger").field("fired", &self.fired).field("lost", &self.is_lost()).finish()
	}
}

impl<T> Drop for Trigger<T> {
	fn drop(&mut self) {
		if mem::replace(&mut self.fired, true) {
			return;
		}
		if let Some(slot) = self.slot.upgrade() {
			slot.lose();
		}
	}
}

struct WaitTrig<'a, T> {
	slot: &'a TrigSlot<T>,
}

impl<T> Future for WaitTrig<'_, T> {
	type Output = Result<T>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T>> {
		let mut state = self.slot.state.lock();
		if let Some(value) = state.value.take() {
			return Poll::Ready(Ok(value));
		}
		if state.lost {
			return Poll::Ready(Err(Error::LostNotifier));
		}
		state.waiter = Some(cx.waker().clone());
		Poll::Pending
	}
}

impl Actor {
	/// Bind `handle` to `target` and make its single trigger.
	pub fn make_trig_notifier_to<T: Send + 'static>(&self, target: &Actor, handle: &TrigHandle<T>) -> Result<Trigger<T>> {
		let bound = {
			let mut state = handle.slot.state.lock();
			if state.armed {
				return_usage_error!("a trigger was already made for this handle");
			}
			let bound = match state.owner {
				None => {
					state.owner = Some(target.id());
					true
				}
				Some(owner) if owner == target.id() => false,
				Some(owner) => {
					return_usage_error!("trigger handle is bound to actor {}, not to {}", owner, target.id())
				}
			};
			state.armed = true;
			bound
		};

		if bound {
			target.cell.register_slot(handle.slot.clone());
		}
		trace!(from = self.id(), to = target.id(), "trigger made");
		Ok(Trigger {
			slot: Arc::downgrade(&handle.slot),
			fired: false,
		})
	}

	/// Suspend until the trigger of `handle` fires.
	pub async fn wait_trig<T: Send + 'static>(&self, handle: &TrigHandle<T>) -> Result<T> {
		{
			let mut state = handle.slot.state.lock();
			if state.owner != Some(self.id()) {
				return_usage_error!("trigger handle is not bound to actor {}", self.id());
			}
			if mem::replace(&mut state.waited, true) {
				return_usage_error!("trigger handle was already waited on");
			}
		}

		WaitTrig {
			slot: &handle.slot,
		}
		.await
	}
}
