// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{
	future::Future,
	pin::Pin,
	sync::{Arc, atomic::Ordering},
	task::{Context, Poll},
};

use super::fiber::ActorCell;

/// Something owned by an actor that must be shut when it starts quitting.
pub(crate) trait QuitSlot: Send + Sync {
	fn close(&self);
}

/// Defers a forced quit of its actor while alive.
///
/// Primitives keep working normally under a guard; once the last guard of an
/// actor with a pending quit request is dropped, the actor is unwound at its
/// next suspension point.
#[must_use = "a quit guard only protects while it is held"]
pub struct QuitGuard {
	cell: Arc<ActorCell>,
}

impl QuitGuard {
	pub(crate) fn new(cell: Arc<ActorCell>) -> Self {
		cell.quit_locks.fetch_add(1, Ordering::AcqRel);
		Self {
			cell,
		}
	}
}

impl Drop for QuitGuard {
	fn drop(&mut self) {
		if self.cell.quit_locks.fetch_sub(1, Ordering::AcqRel) == 1 && self.cell.quit_requested.load(Ordering::Acquire)
		{
			self.cell.schedule();
		}
	}
}

/// Resolves once a quit has been requested for the actor.
pub struct QuitSignal {
	cell: Arc<ActorCell>,
}

impl QuitSignal {
	pub(crate) fn new(cell: Arc<ActorCell>) -> Self {
		Self {
			cell,
		}
	}
}

impl Future for QuitSignal {
	type Output = ();

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
		if self.cell.quit_requested.load(Ordering::Acquire) {
			return Poll::Ready(());
		}

		let mut core = self.cell.core.lock();
		if self.cell.quit_requested.load(Ordering::Acquire) {
			return Poll::Ready(());
		}
		if !core.signal_waiters.iter().any(|waker| waker.will_wake(cx.waker())) {
			core.signal_waiters.push(cx.waker().clone());
		}
		Poll::Pending
	}
}
