// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Bounded FIFO buffer between actors.
//!
//! A full buffer parks pushers in arrival order; each pop moves the value of
//! the oldest parked pusher into the queue and releases it. An empty buffer
//! parks poppers; each push wakes one of them.

use std::{
	collections::{HashSet, VecDeque},
	future::Future,
	pin::Pin,
	task::{Context, Poll, Waker},
};

use parking_lot::Mutex;

use crate::sync::waiter::{WaitQueue, wake_all};

struct BufferState<T> {
	queue: VecDeque<T>,
	capacity: usize,
	pushers: WaitQueue<Option<T>>,
	poppers: WaitQueue,
	accepted: HashSet<u64>,
	notified: HashSet<u64>,
}

impl<T> BufferState<T> {
	/// Wake one parked popper if there is a value for it.
	fn wake_popper(&mut self, wake: &mut Vec<Waker>) {
		if self.queue.is_empty() {
			return;
		}
		if let Some(popper) = self.poppers.pop_front() {
			self.notified.insert(popper.ticket);
			wake.push(popper.waker);
		}
	}

	/// Move values of parked pushers into the queue while there is room.
	fn refill(&mut self, wake: &mut Vec<Waker>) {
		while self.queue.len() < self.capacity {
			let Some(pusher) = self.pushers.pop_front() else {
				break;
			};
			if let Some(value) = pusher.payload {
				self.queue.push_back(value);
			}
			self.accepted.insert(pusher.ticket);
			wake.push(pusher.waker);
		}
	}

	fn take(&mut self, wake: &mut Vec<Waker>) -> Option<T> {
		let value = self.queue.pop_front()?;
		self.refill(wake);
		self.wake_popper(wake);
		Some(value)
	}
}

/// Bounded buffer with suspending push and pop.
pub struct AsyncBuffer<T> {
	state: Mutex<BufferState<T>>,
}

impl<T> AsyncBuffer<T> {
	/// Create a buffer holding up to `capacity` values, at least one.
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			state: Mutex::new(BufferState {
				queue: VecDeque::with_capacity(capacity),
				capacity,
				pushers: WaitQueue::new(),
				poppers: WaitQueue::new(),
				accepted: HashSet::new(),
				notified: HashSet::new(),
			}),
		}
	}

	/// Append `value`, suspending while the buffer is full.
	pub fn push(&self, value: T) -> Push<'_, T> {
		Push {
			buffer: self,
			value: Some(value),
			ticket: None,
			done: false,
		}
	}

	/// Remove the oldest value, suspending while the buffer is empty.
	pub fn pop(&self) -> Pop<'_, T> {
		Pop {
			buffer: self,
			ticket: None,
			done: false,
		}
	}

	/// Append without suspending; hands the value back when full.
	pub fn try_push(&self, value: T) -> std::result::Result<(), T> {
		let mut wake = Vec::new();
		{
			let mut state = self.state.lock();
			if !state.pushers.is_empty() || state.queue.len() >= state.capacity {
				return Err(value);
			}
			state.queue.push_back(value);
			state.wake_popper(&mut wake);
		}
		wake_all(wake);
		Ok(())
	}

	pub fn try_pop(&self) -> Option<T> {
		let mut wake = Vec::new();
		let value = self.state.lock().take(&mut wake);
		wake_all(wake);
		value
	}

	pub fn len(&self) -> usize {
		self.state.lock().queue.len()
	}

	pub fn is_empty(&self) -> bool {
		self.state.lock().queue.is_empty()
	}

	pub fn is_full(&self) -> bool {
		let state = self.state.lock();
		state.queue.len() >= state.capacity
	}

	pub fn capacity(&self) -> usize {
		self.state.lock().capacity
	}
}

/// Future returned by [`AsyncBuffer::push`].
pub struct Push<'a, T> {
	buffer: &'a AsyncBuffer<T>,
	value: Option<T>,
	ticket: Option<u64>,
	done: bool,
}

// the value is only ever moved out, never pinned
impl<T> Unpin for Push<'_, T> {}

impl<T> Future for Push<'_, T> {
	type Output = ();

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
		let this = self.get_mut();
		let mut wake = Vec::new();

		let ready = {
			let mut state = this.buffer.state.lock();
			match this.ticket {
				None => {
					if state.pushers.is_empty() && state.queue.len() < state.capacity {
						if let Some(value) = this.value.take() {
							state.queue.push_back(value);
						}
						state.wake_popper(&mut wake);
						true
					} else {
						this.ticket = Some(state.pushers.push_back(cx.waker().clone(), this.value.take()));
						false
					}
				}
				Some(ticket) => {
					if state.accepted.remove(&ticket) {
						true
					} else {
						state.pushers.update(ticket, cx.waker());
						false
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

impl<T> Drop for Push<'_, T> {
	fn drop(&mut self) {
		let (Some(ticket), false) = (self.ticket, self.done) else {
			return;
		};
		let withdrawn = {
			let mut state = self.buffer.state.lock();
			let withdrawn = state.pushers.remove(ticket);
			state.accepted.remove(&ticket);
			withdrawn
		};
		drop(withdrawn);
	}
}

/// Future returned by [`AsyncBuffer::pop`].
pub struct Pop<'a, T> {
	buffer: &'a AsyncBuffer<T>,
	ticket: Option<u64>,
	done: bool,
}

impl<T> Future for Pop<'_, T> {
	type Output = T;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
		let this = self.get_mut();
		let mut wake = Vec::new();

		let value = {
			let mut state = this.buffer.state.lock();
			match this.ticket {
				None => {
					let value = state.take(&mut wake);
					if value.is_none() {
						this.ticket = Some(state.poppers.push_back(cx.waker().clone(), ()));
					}
					value
				}
				Some(ticket) => {
					if state.notified.remove(&ticket) {
						let value = state.take(&mut wake);
						if value.is_none() {
							// overtaken by a newcomer, keep our place at the head
							state.poppers.push_front(ticket, cx.waker().clone(), ());
						}
						value
					} else {
						state.poppers.update(ticket, cx.waker());
						None
					}
				}
			}
		};

		wake_all(wake);
		match value {
			Some(value) => {
				this.done = true;
				Poll::Ready(value)
			}
			None => Poll::Pending,
		}
	}
}

impl<T> Drop for Pop<'_, T> {
	fn drop(&mut self) {
		let (Some(ticket), false) = (self.ticket, self.done) else {
			return;
		};
		let mut wake = Vec::new();
		{
			let mut state = self.buffer.state.lock();
			if state.poppers.remove(ticket).is_none() && state.notified.remove(&ticket) {
				state.wake_popper(&mut wake);
			}
		}
		wake_all(wake);
	}
}
