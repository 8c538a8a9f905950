// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Call/return rendezvous between actors.
//!
//! An invoker suspends until some handler has run on its argument and
//! produced the result. The handler closure runs on the handler's side,
//! outside any channel lock. If it panics, the invoker is released with
//! [`Error::LostNotifier`].

use std::{
	collections::HashMap,
	future::Future,
	pin::Pin,
	task::{Context, Poll, Waker},
};

use parking_lot::Mutex;

use crate::{
	error::{Error, Result},
	sync::waiter::{WaitQueue, next_ticket},
};

struct CspState<A, R> {
	invokers: WaitQueue<A>,
	handlers: WaitQueue,
	/// Invocations handed to a parked handler, by handler ticket.
	assigned: HashMap<u64, (u64, A)>,
	/// Invokers whose argument has been taken, by invoker ticket.
	in_flight: HashMap<u64, Waker>,
	results: HashMap<u64, Result<R>>,
}

impl<A, R> CspState<A, R> {
	/// Give an invocation to the oldest parked handler, or queue it.
	fn dispatch(&mut self, invoker: u64, waker: Waker, arg: A, front: bool) -> Option<Waker> {
		match self.handlers.pop_front() {
			Some(handler) => {
				self.assigned.insert(handler.ticket, (invoker, arg));
				self.in_flight.insert(invoker, waker);
				Some(handler.waker)
			}
			None => {
				if front {
					self.invokers.push_front(invoker, waker, arg);
				} else {
					self.invokers.push_back_with(invoker, waker, arg);
				}
				None
			}
		}
	}
}

/// Channel over which one actor invokes a handler provided by another.
pub struct CspChannel<A, R> {
	state: Mutex<CspState<A, R>>,
}

impl<A, R> Default for CspChannel<A, R> {
	fn default() -> Self {
		Self::new()
	}
}

impl<A, R> CspChannel<A, R> {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(CspState {
				invokers: WaitQueue::new(),
				handlers: WaitQueue::new(),
				assigned: HashMap::new(),
				in_flight: HashMap::new(),
				results: HashMap::new(),
			}),
		}
	}

	/// Call the handler with `arg` and suspend until it returns.
	///
	/// Resolves with [`Error::LostNotifier`] when the handler panicked.
	pub fn invoke_rval(&self, arg: A) -> Invoke<'_, A, R> {
		Invoke {
			channel: self,
			arg: Some(arg),
			ticket: None,
			done: false,
		}
	}

	/// Call the handler with `arg`, discarding the result.
	pub async fn invoke(&self, arg: A) -> Result<()> {
		self.invoke_rval(arg).await.map(drop)
	}

	/// Suspend until an invocation arrives, then serve it with `handler`.
	pub fn wait_invoke<H>(&self, handler: H) -> WaitInvoke<'_, A, R, H>
	where
		H: FnOnce(A) -> R,
	{
		WaitInvoke {
			channel: self,
			handler: Some(handler),
			ticket: None,
			done: false,
		}
	}

	pub fn waiting_invokers(&self) -> usize {
		self.state.lock().invokers.len()
	}

	pub fn waiting_handlers(&self) -> usize {
		self.state.lock().handlers.len()
	}
}

/// Future returned by [`CspChannel::invoke_rval`].
pub struct Invoke<'a, A, R> {
	channel: &'a CspChannel<A, R>,
	arg: Option<A>,
	ticket: Option<u64>,
	done: bool,
}

// the argument is only ever moved out, never pinned
impl<A, R> Unpin for Invoke<'_, A, R> {}

impl<A, R> Future for Invoke<'_, A, R> {
	type Output = Result<R>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<R>> {
		let this = self.get_mut();
		let mut wake = None;

		let result = {
			let mut state = this.channel.state.lock();
			match (this.ticket, this.arg.take()) {
				(None, Some(arg)) => {
					let ticket = next_ticket();
					this.ticket = Some(ticket);
					wake = state.dispatch(ticket, cx.waker().clone(), arg, false);
					None
				}
				(Some(ticket), _) => match state.results.remove(&ticket) {
					Some(result) => Some(result),
					None => {
						match state.in_flight.get_mut(&ticket) {
							Some(waker) => {
								if !waker.will_wake(cx.waker()) {
									*waker = cx.waker().clone();
								}
							}
							None => {
								state.invokers.update(ticket, cx.waker());
							}
						}
						None
					}
				},
				(None, None) => None,
			}
		};

		if let Some(waker) = wake {
			waker.wake();
		}
		match result {
			Some(result) => {
				this.done = true;
				Poll::Ready(result)
			}
			None => Poll::Pending,
		}
	}
}

impl<A, R> Drop for Invoke<'_, A, R> {
	fn drop(&mut self) {
		let (Some(ticket), false) = (self.ticket, self.done) else {
			return;
		};
		let (arg, result) = {
			let mut state = self.channel.state.lock();
			state.in_flight.remove(&ticket);
			(state.invokers.remove(ticket), state.results.remove(&ticket))
		};
		drop(arg);
		drop(result);
	}
}

/// Future returned by [`CspChannel::wait_invoke`].
pub struct WaitInvoke<'a, A, R, H> {
	channel: &'a CspChannel<A, R>,
	handler: Option<H>,
	ticket: Option<u64>,
	done: bool,
}

// the handler is only ever moved out, never pinned
impl<A, R, H> Unpin for WaitInvoke<'_, A, R, H> {}

impl<A, R, H> Future for WaitInvoke<'_, A, R, H>
where
	H: FnOnce(A) -> R,
{
	type Output = ();

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
		let this = self.get_mut();

		let job = {
			let mut state = this.channel.state.lock();
			match this.ticket {
				None => match state.invokers.pop_front() {
					Some(invoker) => {
						state.in_flight.insert(invoker.ticket, invoker.waker);
						Some((invoker.ticket, invoker.payload))
					}
					None => {
						this.ticket = Some(state.handlers.push_back(cx.waker().clone(), ()));
						None
					}
				},
				Some(ticket) => match state.assigned.remove(&ticket) {
					Some(job) => Some(job),
					None => {
						state.handlers.update(ticket, cx.waker());
						None
					}
				},
			}
		};

		let Some((invoker, arg)) = job else {
			return Poll::Pending;
		};
		this.done = true;
		let Some(handler) = this.handler.take() else {
			return Poll::Ready(());
		};

		let serving = Serving {
			channel: this.channel,
			invoker,
			finished: false,
		};
		let result = handler(arg);
		serving.complete(Ok(result));
		Poll::Ready(())
	}
}

/// An invocation whose handler is running. Fails the invocation when dropped
/// before completion, as happens when the handler unwinds.
struct Serving<'a, A, R> {
	channel: &'a CspChannel<A, R>,
	invoker: u64,
	finished: bool,
}

impl<A, R> Serving<'_, A, R> {
	fn complete(mut self, result: Result<R>) {
		self.finished = true;
		self.deliver(result);
	}

	fn deliver(&self, result: Result<R>) {
		let waker = {
			let mut state = self.channel.state.lock();
			match state.in_flight.remove(&self.invoker) {
				Some(waker) => {
					state.results.insert(self.invoker, result);
					Some(waker)
				}
				// the invoker gave up while the handler ran
				None => None,
			}
		};
		if let Some(waker) = waker {
			waker.wake();
		}
	}
}

impl<A, R> Drop for Serving<'_, A, R> {
	fn drop(&mut self) {
		if !self.finished {
			self.deliver(Err(Error::LostNotifier));
		}
	}
}

impl<A, R, H> Drop for WaitInvoke<'_, A, R, H> {
	fn drop(&mut self) {
		let (Some(ticket), false) = (self.ticket, self.done) else {
			return;
		};

		let wake = {
			let mut state = self.channel.state.lock();
			if state.handlers.remove(ticket).is_some() {
				None
			} else {
				match state.assigned.remove(&ticket) {
					// hand the invocation back so another handler serves it
					Some((invoker, arg)) => match state.in_flight.remove(&invoker) {
						Some(waker) => state.dispatch(invoker, waker, arg, true),
						None => None,
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
