// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Typed mailboxes: notifiers on the sending side, pumps on the receiving side.
//!
//! Every actor owns at most one mailbox per message type. Senders hold weak
//! references, so a mailbox lives exactly as long as its owner keeps a pump or
//! handle for it. A pump waiting on a mailbox whose senders are all gone, or
//! whose owner is quitting, resolves with [`Error::LostNotifier`].

use std::{
	any::TypeId,
	collections::VecDeque,
	future::Future,
	mem,
	pin::Pin,
	sync::{Arc, Weak},
	task::{Context, Poll, Waker},
};

use parking_lot::Mutex;
use tracing::trace;

use crate::{
	actor::{Actor, ActorState, ChildActor, QuitSlot},
	error::{Error, Result},
	return_usage_error,
};

struct MailboxState<T> {
	queue: VecDeque<T>,
	waiter: Option<Waker>,
	senders: usize,
	connected: bool,
	closed: bool,
	agent: Option<Notifier<T>>,
	owner: Option<u64>,
}

pub(crate) struct Mailbox<T> {
	state: Mutex<MailboxState<T>>,
}

enum Route<T> {
	Forward(Notifier<T>, T),
	Queued(Option<Waker>),
}

impl<T> Mailbox<T> {
	fn new(owner: Option<u64>) -> Arc<Self> {
		Arc::new(Self {
			state: Mutex::new(MailboxState {
				queue: VecDeque::new(),
				waiter: None,
				senders: 0,
				connected: false,
				closed: false,
				agent: None,
				owner,
			}),
		})
	}

	fn connect(self: &Arc<Self>) -> Result<Notifier<T>> {
		let mut state = self.state.lock();
		if state.closed {
			return Err(Error::LostNotifier);
		}
		state.senders += 1;
		state.connected = true;
		Ok(Notifier {
			mailbox: Arc::downgrade(self),
		})
	}

	fn owner(&self) -> Option<u64> {
		self.state.lock().owner
	}

	/// Bind an unowned mailbox to `owner`. Returns `true` on first binding.
	fn bind(&self, owner: u64) -> Result<bool> {
		let mut state = self.state.lock();
		match state.owner {
			None => {
				state.owner = Some(owner);
				Ok(true)
			}
			Some(current) if current == owner => Ok(false),
			Some(current) => {
				return_usage_error!("message handle is bound to actor {}, not to {}", current, owner)
			}
		}
	}

	fn deliver(&self, value: T) -> Result<()> {
		let route = {
			let mut state = self.state.lock();
			if state.closed {
				return Err(Error::LostNotifier);
			}
			match &state.agent {
				Some(agent) => Route::Forward(agent.clone(), value),
				None => {
					state.queue.push_back(value);
					Route::Queued(state.waiter.take())
				}
			}
		};

		match route {
			Route::Forward(agent, value) => agent.notify(value),
			Route::Queued(waker) => {
				if let Some(waker) = waker {
					waker.wake();
				}
				Ok(())
			}
		}
	}

	fn poll_recv(&self, cx: &mut Context<'_>) -> Poll<Result<T>> {
		let mut state = self.state.lock();
		if let Some(value) = state.queue.pop_front() {
			return Poll::Ready(Ok(value));
		}
		if state.closed || (state.connected && state.senders == 0) {
			return Poll::Ready(Err(Error::LostNotifier));
		}
		match &state.waiter {
			Some(waker) if waker.will_wake(cx.waker()) => {}
			_ => state.waiter = Some(cx.waker().clone()),
		}
		Poll::Pending
	}

	fn pending(&self) -> usize {
		self.state.lock().queue.len()
	}
}

impl<T: Send + 'static> QuitSlot for Mailbox<T> {
	fn close(&self) {
		let (queue, waiter, agent) = {
			let mut state = self.state.lock();
			state.closed = true;
			(mem::take(&mut state.queue), state.waiter.take(), state.agent.take())
		};
		drop(queue);
		drop(agent);
		if let Some(waker) = waiter {
			waker.wake();
		}
	}
}

/// Sending side of a mailbox.
///
/// Cloning adds a sender. When the last sender of a mailbox is dropped, a
/// pump waiting on it resolves with [`Error::LostNotifier`].
pub struct Notifier<T> {
	mailbox: Weak<Mailbox<T>>,
}

impl<T> Notifier<T> {
	/// Deliver `value`, or report that the receiver is gone.
	pub fn notify(&self, value: T) -> Result<()> {
		match self.mailbox.upgrade() {
			Some(mailbox) => mailbox.deliver(value),
			None => Err(Error::LostNotifier),
		}
	}

	pub fn is_lost(&self) -> bool {
		match self.mailbox.upgrade() {
			Some(mailbox) => mailbox.state.lock().closed,
			None => true,
		}
	}
}

impl<T> Clone for Notifier<T> {
	fn clone(&self) -> Self {
		if let Some(mailbox) = self.mailbox.upgrade() {
			mailbox.state.lock().senders += 1;
		}
		Self {
			mailbox: self.mailbox.clone(),
		}
	}
}

impl<T> Drop for Notifier<T> {
	fn drop(&mut self) {
		let Some(mailbox) = self.mailbox.upgrade() else {
			return;
		};

		let (waker, agent) = {
			let mut state = mailbox.state.lock();
			state.senders = state.senders.saturating_sub(1);
			if state.senders == 0 {
				(state.waiter.take(), state.agent.take())
			} else {
				(None, None)
			}
		};
		// the agent loses its only upstream
		drop(agent);
		if let Some(waker) = waker {
			waker.wake();
		}
	}
}

impl<T> std::fmt::Debug for Notifier<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Notifier").field("lost", &self.is_lost()).finish()
	}
}

/// Receiving side of an actor's mailbox for messages of type `T`.
pub struct MsgPump<T> {
	mailbox: Arc<Mailbox<T>>,
}

impl<T> Clone for MsgPump<T> {
	fn clone(&self) -> Self {
		Self {
			mailbox: self.mailbox.clone(),
		}
	}
}

impl<T> MsgPump<T> {
	/// Messages queued and not yet pumped.
	pub fn pending(&self) -> usize {
		self.mailbox.pending()
	}
}

/// A mailbox created ahead of time and bound to its receiver on first use.
///
/// A handle lets a parent hand out a notifier for a child before the child
/// has run; the child then waits on the same handle.
pub struct MsgHandle<T> {
	mailbox: Arc<Mailbox<T>>,
}

impl<T> MsgHandle<T> {
	pub fn new() -> Self {
		Self {
			mailbox: Mailbox::new(None),
		}
	}

	/// Id of the actor this handle is bound to.
	pub fn owner(&self) -> Option<u64> {
		self.mailbox.owner()
	}
}

impl<T> Default for MsgHandle<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> Clone for MsgHandle<T> {
	fn clone(&self) -> Self {
		Self {
			mailbox: self.mailbox.clone(),
		}
	}
}

struct Recv<'a, T> {
	mailbox: &'a Mailbox<T>,
}

impl<T> Future for Recv<'_, T> {
	type Output = Result<T>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T>> {
		self.mailbox.poll_recv(cx)
	}
}

impl Actor {
	fn mailbox<T: Send + 'static>(&self) -> Result<Arc<Mailbox<T>>> {
		let (mailbox, created) = {
			let mut core = self.cell.core.lock();
			if matches!(core.state, ActorState::Quitting | ActorState::Quit) {
				return Err(Error::LostNotifier);
			}
			match core.pumps.get(&TypeId::of::<T>()).cloned() {
				Some(existing) => match existing.downcast::<Mailbox<T>>() {
					Ok(mailbox) => (mailbox, false),
					Err(_) => return_usage_error!("mailbox type mismatch on actor {}", self.id()),
				},
				None => {
					let mailbox = Mailbox::<T>::new(Some(self.id()));
					core.pumps.insert(TypeId::of::<T>(), mailbox.clone());
					(mailbox, true)
				}
			}
		};

		if created {
			trace!(actor = self.id(), message = std::any::type_name::<T>(), "mailbox created");
			self.cell.register_slot(mailbox.clone());
		}
		Ok(mailbox)
	}

	/// Open this actor's mailbox for `T` for receiving.
	pub fn connect_msg_pump<T: Send + 'static>(&self) -> Result<MsgPump<T>> {
		Ok(MsgPump {
			mailbox: self.mailbox::<T>()?,
		})
	}

	/// Suspend until the next message arrives on `pump`.
	pub async fn pump_msg<T: Send + 'static>(&self, pump: &MsgPump<T>) -> Result<T> {
		if pump.mailbox.owner() != Some(self.id()) {
			return_usage_error!("actor {} pumped a mailbox it does not own", self.id());
		}
		Recv {
			mailbox: &pump.mailbox,
		}
		.await
	}

	/// Obtain a notifier delivering into `target`'s mailbox for `T`.
	pub fn connect_msg_notifier_to<T: Send + 'static>(&self, target: &Actor) -> Result<Notifier<T>> {
		let notifier = target.mailbox::<T>()?.connect()?;
		trace!(from = self.id(), to = target.id(), "notifier connected");
		Ok(notifier)
	}

	/// Forward every message of type `T` arriving at this actor to `child`.
	///
	/// Messages already queued are moved along first, in order.
	pub fn msg_agent_to<T: Send + 'static>(&self, child: &ChildActor) -> Result<()> {
		self.check_child(child)?;
		let downstream = child.mailbox::<T>()?.connect()?;
		let mailbox = self.mailbox::<T>()?;

		let (queued, replaced, kept) = {
			let mut state = mailbox.state.lock();
			let queued: Vec<T> = state.queue.drain(..).collect();
			if state.connected && state.senders == 0 {
				(queued, None, Some(downstream.clone()))
			} else {
				(queued, state.agent.replace(downstream.clone()), None)
			}
		};
		drop(replaced);

		for value in queued {
			downstream.notify(value)?;
		}
		drop(kept);
		trace!(actor = self.id(), child = child.id(), "message agent installed");
		Ok(())
	}

	/// Stop forwarding `T`; new messages queue at this actor again.
	pub fn msg_agent_off<T: Send + 'static>(&self) {
		let existing = self.cell.core.lock().pumps.get(&TypeId::of::<T>()).cloned();
		let Some(Ok(mailbox)) = existing.map(|existing| existing.downcast::<Mailbox<T>>()) else {
			return;
		};
		let agent = mailbox.state.lock().agent.take();
		drop(agent);
	}

	/// Bind `handle` to `target` and return a notifier for it.
	pub fn make_msg_notifier_to<T: Send + 'static>(&self, target: &Actor, handle: &MsgHandle<T>) -> Result<Notifier<T>> {
		if handle.mailbox.bind(target.id())? {
			target.cell.register_slot(handle.mailbox.clone());
		}
		let notifier = handle.mailbox.connect()?;
		trace!(from = self.id(), to = target.id(), "handle notifier made");
		Ok(notifier)
	}

	/// Suspend until a message arrives on a handle bound to this actor.
	pub async fn wait_msg<T: Send + 'static>(&self, handle: &MsgHandle<T>) -> Result<T> {
		if handle.mailbox.owner() != Some(self.id()) {
			return_usage_error!("message handle is not bound to actor {}", self.id());
		}
		Recv {
			mailbox: &handle.mailbox,
		}
		.await
	}
}
