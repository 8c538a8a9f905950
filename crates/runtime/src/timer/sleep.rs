// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{
	future::Future,
	pin::Pin,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	task::{Context, Poll},
	time::Duration,
};

use futures_util::task::AtomicWaker;

use super::scheduler::{Scheduler, TimerHandle};

struct SleepState {
	fired: AtomicBool,
	waker: AtomicWaker,
}

/// Future returned by [`Actor::sleep`](crate::Actor::sleep).
///
/// The deadline is armed on first poll and cancelled on drop.
pub struct Sleep {
	delay: Duration,
	scheduler: Scheduler,
	state: Arc<SleepState>,
	handle: Option<TimerHandle>,
}

impl Sleep {
	pub(crate) fn new(scheduler: Scheduler, delay: Duration) -> Self {
		Self {
			delay,
			scheduler,
			state: Arc::new(SleepState {
				fired: AtomicBool::new(false),
				waker: AtomicWaker::new(),
			}),
			handle: None,
		}
	}

	pub fn delay(&self) -> Duration {
		self.delay
	}
}

impl Future for Sleep {
	type Output = ();

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
		if self.state.fired.load(Ordering::Acquire) {
			return Poll::Ready(());
		}

		self.state.waker.register(cx.waker());

		if self.handle.is_none() {
			let state = self.state.clone();
			let handle = self.scheduler.schedule_once(self.delay, move || {
				state.fired.store(true, Ordering::Release);
				state.waker.wake();
			});
			self.handle = Some(handle);
		}

		if self.state.fired.load(Ordering::Acquire) {
			Poll::Ready(())
		} else {
			Poll::Pending
		}
	}
}

impl Drop for Sleep {
	fn drop(&mut self) {
		if let Some(handle) = self.handle.take() {
			handle.cancel();
		}
	}
}
