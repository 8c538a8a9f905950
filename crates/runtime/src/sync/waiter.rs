// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! FIFO queues of suspended waiters.
//!
//! Each waiter is identified by a ticket that stays valid until the waiter is
//! removed, so a future re-polled with a new waker can refresh its entry and
//! a dropped future can take itself out of the queue.

use std::{
	collections::VecDeque,
	sync::atomic::{AtomicU64, Ordering},
	task::Waker,
};

static TICKET_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_ticket() -> u64 {
	TICKET_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub(crate) struct Waiter<T> {
	pub(crate) ticket: u64,
	pub(crate) waker: Waker,
	pub(crate) payload: T,
}

pub(crate) struct WaitQueue<T = ()> {
	entries: VecDeque<Waiter<T>>,
}

impl<T> WaitQueue<T> {
	pub(crate) fn new() -> Self {
		Self {
			entries: VecDeque::new(),
		}
	}

	pub(crate) fn push_back(&mut self, waker: Waker, payload: T) -> u64 {
		let ticket = next_ticket();
		self.entries.push_back(Waiter {
			ticket,
			waker,
			payload,
		});
		ticket
	}

	/// Queue a waiter under a ticket taken earlier.
	pub(crate) fn push_back_with(&mut self, ticket: u64, waker: Waker, payload: T) {
		self.entries.push_back(Waiter {
			ticket,
			waker,
			payload,
		});
	}

	/// Put a waiter back at the head, keeping its ticket.
	pub(crate) fn push_front(&mut self, ticket: u64, waker: Waker, payload: T) {
		self.entries.push_front(Waiter {
			ticket,
			waker,
			payload,
		});
	}

	/// Refresh the waker of a queued waiter. Returns `false` if not queued.
	pub(crate) fn update(&mut self, ticket: u64, waker: &Waker) -> bool {
		match self.entries.iter_mut().find(|waiter| waiter.ticket == ticket) {
			Some(waiter) => {
				if !waiter.waker.will_wake(waker) {
					waiter.waker = waker.clone();
				}
				true
			}
			None => false,
		}
	}

	pub(crate) fn remove(&mut self, ticket: u64) -> Option<Waiter<T>> {
		let position = self.entries.iter().position(|waiter| waiter.ticket == ticket)?;
		self.entries.remove(position)
	}

	pub(crate) fn pop_front(&mut self) -> Option<Waiter<T>> {
		self.entries.pop_front()
	}

	pub(crate) fn front(&self) -> Option<&Waiter<T>> {
		self.entries.front()
	}

	pub(crate) fn contains(&self, ticket: u64) -> bool {
		self.entries.iter().any(|waiter| waiter.ticket == ticket)
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.len()
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

/// Wake every waker after the state lock has been released.
pub(crate) fn wake_all(wakers: Vec<Waker>) {
	for waker in wakers {
		waker.wake();
	}
}
