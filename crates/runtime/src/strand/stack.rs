// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Pooled fiber stacks.
//!
//! A fiber is the pinned future of an actor body, so its "stack" is the frame
//! that future occupies. Each strand keeps a pool of [`FiberStack`] budgets
//! grouped by size class; an actor checks one out when it starts and returns
//! it once it has fully quit. A frame that does not fit its stack fails the
//! actor before the body runs.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StackConfig {
	/// Stack size handed to actors created with [`StackMode::Default`].
	pub default_size: usize,
	/// Free stacks kept per size class.
	pub max_pooled: usize,
	/// Margin below which `check_stack` reports exhaustion.
	pub min_margin: usize,
}

impl Default for StackConfig {
	fn default() -> Self {
		Self {
			default_size: 64 * 1024,
			max_pooled: 16,
			min_margin: 1024,
		}
	}
}

impl StackConfig {
	pub fn default_size(mut self, size: usize) -> Self {
		self.default_size = size;
		self
	}

	pub fn max_pooled(mut self, count: usize) -> Self {
		self.max_pooled = count;
		self
	}

	pub fn min_margin(mut self, margin: usize) -> Self {
		self.min_margin = margin;
		self
	}
}

/// How an actor's stack is sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StackMode {
	#[default]
	Default,
	Fixed(usize),
	/// Grow to fit the fiber: its frame rounded up to a power of two.
	Auto,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackStats {
	pub allocated: usize,
	pub reused: usize,
	pub in_use: usize,
	pub pooled: usize,
}

/// A stack checked out of a [`StackPool`].
#[derive(Debug)]
pub struct FiberStack {
	size: usize,
	used: usize,
}

impl FiberStack {
	fn new(size: usize) -> Self {
		Self {
			size,
			used: 0,
		}
	}

	pub fn size(&self) -> usize {
		self.size
	}

	pub fn used(&self) -> usize {
		self.used
	}

	pub fn margin(&self) -> usize {
		self.size.saturating_sub(self.used)
	}

	fn reset(&mut self) {
		self.used = 0;
	}

	/// Report the remaining margin, failing once it drops under `min_margin`.
	#[cfg(feature = "stack-check")]
	pub(crate) fn check(&self, min_margin: usize) -> Result<usize> {
		let margin = self.margin();
		if margin < min_margin {
			return Err(Error::StackExhaustion {
				required: self.used + min_margin,
				available: self.size,
			});
		}
		if margin < self.size / 8 {
			tracing::warn!(size = self.size, used = self.used, margin, "fiber stack nearly exhausted");
		}
		Ok(margin)
	}

	#[cfg(not(feature = "stack-check"))]
	pub(crate) fn check(&self, _min_margin: usize) -> Result<usize> {
		Ok(self.margin())
	}
}

#[derive(Default)]
struct PoolState {
	free: HashMap<usize, Vec<FiberStack>>,
	allocated: usize,
	reused: usize,
	in_use: usize,
}

pub struct StackPool {
	config: StackConfig,
	state: Mutex<PoolState>,
}

impl StackPool {
	pub(crate) fn new(config: StackConfig) -> Self {
		Self {
			config,
			state: Mutex::new(PoolState::default()),
		}
	}

	pub fn config(&self) -> &StackConfig {
		&self.config
	}

	pub(crate) fn size_for(&self, mode: StackMode, frame: usize) -> usize {
		match mode {
			StackMode::Default => self.config.default_size,
			StackMode::Fixed(size) => size,
			StackMode::Auto => frame.next_power_of_two().max(self.config.default_size),
		}
	}

	/// Check out a stack able to hold a fiber frame of `frame` bytes.
	pub(crate) fn acquire(&self, mode: StackMode, frame: usize) -> Result<FiberStack> {
		let size = self.size_for(mode, frame);
		if frame > size {
			return Err(Error::StackExhaustion {
				required: frame,
				available: size,
			});
		}

		let mut state = self.state.lock();
		let mut stack = match state.free.get_mut(&size).and_then(Vec::pop) {
			Some(stack) => {
				state.reused += 1;
				stack
			}
			None => {
				state.allocated += 1;
				FiberStack::new(size)
			}
		};
		state.in_use += 1;
		stack.used = frame;
		Ok(stack)
	}

	pub(crate) fn release(&self, mut stack: FiberStack) {
		stack.reset();
		let mut state = self.state.lock();
		state.in_use -= 1;
		let max_pooled = self.config.max_pooled;
		let class = state.free.entry(stack.size).or_default();
		if class.len() < max_pooled {
			class.push(stack);
		}
	}

	pub fn stats(&self) -> StackStats {
		let state = self.state.lock();
		StackStats {
			allocated: state.allocated,
			reused: state.reused,
			in_use: state.in_use,
			pooled: state.free.values().map(Vec::len).sum(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pool() -> StackPool {
		StackPool::new(StackConfig::default().default_size(4096).max_pooled(2).min_margin(256))
	}

	#[test]
	fn test_acquire_default_size() {
		let pool = pool();
		let stack = pool.acquire(StackMode::Default, 1000).unwrap();
		assert_eq!(stack.size(), 4096);
		assert_eq!(stack.used(), 1000);
		assert_eq!(stack.margin(), 3096);
	}

	#[test]
	fn test_frame_too_large_for_fixed_stack() {
		let pool = pool();
		let err = pool.acquire(StackMode::Fixed(512), 1000).unwrap_err();
		assert_eq!(
			err,
			Error::StackExhaustion {
				required: 1000,
				available: 512
			}
		);
		assert_eq!(pool.stats().in_use, 0);
	}

	#[test]
	fn test_auto_grows_to_power_of_two() {
		let pool = pool();
		let stack = pool.acquire(StackMode::Auto, 5000).unwrap();
		assert_eq!(stack.size(), 8192);

		let small = pool.acquire(StackMode::Auto, 10).unwrap();
		assert_eq!(small.size(), 4096, "auto never goes below the default size");
	}

	#[test]
	fn test_released_stack_is_reused_fresh() {
		let pool = pool();
		let stack = pool.acquire(StackMode::Default, 3000).unwrap();
		pool.release(stack);

		let stack = pool.acquire(StackMode::Default, 100).unwrap();
		assert_eq!(stack.used(), 100);

		let stats = pool.stats();
		assert_eq!(stats.allocated, 1);
		assert_eq!(stats.reused, 1);
		assert_eq!(stats.in_use, 1);
	}

	#[test]
	fn test_pool_is_bounded_per_class() {
		let pool = pool();
		let stacks: Vec<_> = (0..4).map(|_| pool.acquire(StackMode::Default, 10).unwrap()).collect();
		for stack in stacks {
			pool.release(stack);
		}

		let stats = pool.stats();
		assert_eq!(stats.pooled, 2);
		assert_eq!(stats.in_use, 0);
	}

	#[cfg(feature = "stack-check")]
	#[test]
	fn test_check_reports_exhaustion_below_min_margin() {
		let pool = pool();
		let stack = pool.acquire(StackMode::Default, 4000).unwrap();
		assert!(matches!(stack.check(256), Err(Error::StackExhaustion { .. })));

		let roomy = pool.acquire(StackMode::Default, 100).unwrap();
		assert_eq!(roomy.check(256).unwrap(), 3996);
	}
}
