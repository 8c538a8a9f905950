// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! The supervision tree: children are owned by the actor that created them.
//!
//! A parent keeps a strong handle to each child until it has waited for it.
//! Children still attached when the parent's body ends are force-quit and
//! awaited before the parent reaches `Quit`.

use std::{future::Future, ops::Deref, sync::atomic::Ordering};

use tracing::trace;

use super::{Actor, ActorExit, ActorState, box_body, fiber::ActorCell};
use crate::{
	error::Result,
	return_usage_error,
	strand::{StackMode, Strand},
};

/// Handle to a child actor, remembering which actor created it.
#[derive(Clone, Debug)]
pub struct ChildActor {
	actor: Actor,
	parent: u64,
}

impl ChildActor {
	pub fn actor(&self) -> &Actor {
		&self.actor
	}

	pub fn parent(&self) -> u64 {
		self.parent
	}
}

impl Deref for ChildActor {
	type Target = Actor;

	fn deref(&self) -> &Actor {
		&self.actor
	}
}

impl Actor {
	/// Create a child on this actor's strand.
	pub fn create_child<F, Fut>(&self, body: F) -> ChildActor
	where
		F: FnOnce(Actor) -> Fut + Send + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		self.spawn_child(self.cell.strand.clone(), StackMode::Default, body)
	}

	pub fn create_child_on<F, Fut>(&self, strand: &Strand, body: F) -> ChildActor
	where
		F: FnOnce(Actor) -> Fut + Send + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		self.spawn_child(strand.clone(), StackMode::Default, body)
	}

	pub fn create_child_with_stack<F, Fut>(&self, stack: StackMode, body: F) -> ChildActor
	where
		F: FnOnce(Actor) -> Fut + Send + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		self.spawn_child(self.cell.strand.clone(), stack, body)
	}

	fn spawn_child<F, Fut>(&self, strand: Strand, stack: StackMode, body: F) -> ChildActor
	where
		F: FnOnce(Actor) -> Fut + Send + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		let child = Actor::from_cell(ActorCell::new(strand, stack, Some(self.cell.id), box_body(body)));
		self.cell.core.lock().children.push(child.clone());
		trace!(parent = self.cell.id, child = child.id(), "child created");

		ChildActor {
			actor: child,
			parent: self.cell.id,
		}
	}

	pub(crate) fn check_child(&self, child: &ChildActor) -> Result<()> {
		if child.parent != self.cell.id {
			return_usage_error!("actor {} is a child of {}, not of {}", child.id(), child.parent, self.cell.id);
		}
		Ok(())
	}

	pub fn child_run(&self, child: &ChildActor) -> Result<()> {
		self.check_child(child)?;
		child.actor.notify_run()
	}

	/// Start every child that has not been started yet.
	pub fn child_run_all(&self) -> Result<()> {
		let children = self.cell.core.lock().children.clone();
		for child in children.iter().filter(|child| child.state() == ActorState::Created) {
			child.notify_run()?;
		}
		Ok(())
	}

	pub async fn child_wait_quit(&self, child: &ChildActor) -> Result<ActorExit> {
		self.check_child(child)?;
		if child.state() == ActorState::Created {
			return_usage_error!("child {} was never started", child.id());
		}
		self.wait_child(&child.actor).await
	}

	/// Wait for every attached child; all of them must have been started.
	pub async fn child_wait_quit_all(&self) -> Result<Vec<ActorExit>> {
		let children = self.cell.core.lock().children.clone();
		if let Some(child) = children.iter().find(|child| child.state() == ActorState::Created) {
			return_usage_error!("child {} was never started", child.id());
		}

		let mut exits = Vec::with_capacity(children.len());
		for child in &children {
			exits.push(self.wait_child(child).await?);
		}
		Ok(exits)
	}

	/// Force a child to quit and wait until it has.
	pub async fn child_force_quit(&self, child: &ChildActor) -> Result<ActorExit> {
		self.check_child(child)?;
		child.actor.notify_quit();
		self.wait_child(&child.actor).await
	}

	pub async fn child_force_quit_all(&self) -> Result<Vec<ActorExit>> {
		let children = self.cell.core.lock().children.clone();
		for child in &children {
			child.notify_quit();
		}

		let mut exits = Vec::with_capacity(children.len());
		for child in &children {
			exits.push(self.wait_child(child).await?);
		}
		Ok(exits)
	}

	async fn wait_child(&self, child: &Actor) -> Result<ActorExit> {
		if child.cell.waited.swap(true, Ordering::AcqRel) {
			return_usage_error!("child {} was already waited for", child.id());
		}

		let exit = child.wait_quit().await;
		self.cell.core.lock().children.retain(|attached| attached.id() != child.id());
		trace!(parent = self.cell.id, child = child.id(), ?exit, "child reaped");
		Ok(exit)
	}
}
