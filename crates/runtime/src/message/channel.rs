// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Rendezvous channel: a send completes only once a taker has the value.

use std::{
	collections::{HashMap, HashSet},
	future::Future,
	pin::Pin,
	task::{Context, Poll, Waker},
};

use parking_lot::Mutex;

use crate::sync::waiter::{WaitQueue, next_ticket};

struct Offer<T> {
	value: T,
	/// Re-offered after its taker went away; nobody waits for completion.
	orphan: bool,
}

struct ChannelState<T> {
	senders: WaitQueue<Offer<T>>,
	takers: WaitQueue,
	delivered: HashMap<u64, T>,
	completed: HashSet<u64>,
}

impl<T> ChannelState<T> {
	/// Hand `value` to the oldest parked taker, or give it back.
	fn hand_over(&mut self, value: T) -> std::result::Result<Waker, T> {
		match self.takers.pop_front() {
			Some(taker) => {
				self.delivered.insert(taker.ticket, value);
				Ok(taker.waker)
			}
			None => Err(value),
		}
	}
}

/// Synchronous message channel between actors.
pub struct SyncChannel<T> {
	state: Mutex<ChannelState<T>>,
}

impl<T> Default for SyncChannel<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> SyncChannel<T> {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(ChannelState {
				senders: WaitQueue::new(),
				takers: WaitQueue::new(),
				delivered: HashMap::new(),
				completed: HashSet::new(),
			}),
		}
	}

	/// Offer `value`; completes when a taker has received it.
	pub fn send(&self, value: T) -> SyncSend<'_, T> {
		SyncSend {
			channel: self,
			value: Some(value),
			ticket: None,
			done: false,
		}
	}

	/// Receive the oldest offered value.
	pub fn take(&self) -> SyncTake<'_, T> {
		SyncTake {
			channel: self,
			ticket: None,
			done: false,
		}
	}

	/// Senders parked with a value no taker has received yet.
	pub fn pending_senders(&self) -> usize {
		self.state.lock().senders.len()
	}

	pub fn pending_takers(&self) -> usize {
		self.state.lock().takers.len()
	}
}

/// Future returned by [`SyncChannel::send`].
pub struct SyncSend<'a, T> {
	channel: &'a SyncChannel<T>,
	value: Option<T>,
	ticket: Option<u64>,
	done: bool,
}

// the value is only ever moved out, never pinned
impl<T> Unpin for SyncSend<'_, T> {}

impl<T> Future for SyncSend<'_, T> {
	type Output = ();

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
		let this = self.get_mut();
		let mut wake = None;

		let ready = {
			let mut state = this.channel.state.lock();
			match (this.ticket, this.value.take()) {
				(None, Some(value)) => match state.hand_over(value) {
					Ok(waker) => {
						wake = Some(waker);
						true
					}
					Err(value) => {
						let offer = Offer {
							value,
							orphan: false,
						};
						this.ticket = Some(state.senders.push_back(cx.waker().clone(), offer));
						false
					}
				},
				(Some(ticket), _) => {
					if state.completed.remove(&ticket) {
						true
					} else {
						state.senders.update(ticket, cx.waker());
						false
					}
				}
				(None, None) => true,
			}
		};

		if let Some(waker) = wake {
			waker.wake();
		}
		if ready {
			this.done = true;
			Poll::Ready(())
		} else {
			Poll::Pending
		}
	}
}

impl<T> Drop for SyncSend<'_, T> {
	fn drop(&mut self) {
		let (Some(ticket), false) = (self.ticket, self.done) else {
			return;
		};
		let withdrawn = {
			let mut state = self.channel.state.lock();
			state.completed.remove(&ticket);
			state.senders.remove(ticket)
		};
		drop(withdrawn);
	}
}

/// Future returned by [`SyncChannel::take`].
pub struct SyncTake<'a, T> {
	channel: &'a SyncChannel<T>,
	ticket: Option<u64>,
	done: bool,
}

impl<T> Future for SyncTake<'_, T> {
	type Output = T;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
		let this = self.get_mut();
		let mut wake = None;

		let value = {
			let mut state = this.channel.state.lock();
			match this.ticket {
				None => match state.senders.pop_front() {
					Some(sender) => {
						if !sender.payload.orphan {
							state.completed.insert(sender.ticket);
							wake = Some(sender.waker);
						}
						Some(sender.payload.value)
					}
					None => {
						this.ticket = Some(state.takers.push_back(cx.waker().clone(), ()));
						None
					}
				},
				Some(ticket) => match state.delivered.remove(&ticket) {
					Some(value) => Some(value),
					None => {
						state.takers.update(ticket, cx.waker());
						None
					}
				},
			}
		};

		if let Some(waker) = wake {
			waker.wake();
		}
		match value {
			Some(value) => {
				this.done = true;
				Poll::Ready(value)
			}
			None => Poll::Pending,
		}
	}
}

impl<T> Drop for SyncTake<'_, T> {
	fn drop(&mut self) {
		let (Some(ticket), false) = (self.ticket, self.done) else {
			return;
		};

		let wake = {
			let mut state = self.channel.state.lock();
			if state.takers.remove(ticket).is_some() {
				None
			} else {
				match state.delivered.remove(&ticket) {
					// received but never observed, offer it again
					Some(value) => match state.hand_over(value) {
						Ok(waker) => Some(waker),
						Err(value) => {
							let offer = Offer {
								value,
								orphan: true,
							};
							state.senders.push_front(next_ticket(), Waker::noop().clone(), offer);
							None
						}
					},
					None => None,
				}
			}
		};

		if let Some(waker) = wake {
			waker.wake();
		}
	}
}
