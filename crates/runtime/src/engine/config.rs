// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use serde::Deserialize;

use super::priority::ThreadPriority;
use crate::strand::StackConfig;

pub const DEFAULT_STRAND_BATCH: usize = 64;

/// Configuration for an [`Engine`](super::Engine).
///
/// Deserialisable with every field optional, or built fluently:
///
/// ```
/// use reifydb_runtime::{EngineConfig, ThreadPriority};
///
/// let config = EngineConfig::new().title("ingest").priority(ThreadPriority::AboveNormal).strand_batch(16);
/// assert_eq!(config.title, "ingest");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
	/// Prefix of worker thread names.
	pub title: String,
	pub priority: Option<ThreadPriority>,
	/// CPU ids; worker `i` is pinned to `affinity[i % affinity.len()]`.
	pub affinity: Vec<usize>,
	pub stack: StackConfig,
	/// Continuations a strand runs per engine job before yielding the worker.
	pub strand_batch: usize,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			title: "engine".to_string(),
			priority: None,
			affinity: Vec::new(),
			stack: StackConfig::default(),
			strand_batch: DEFAULT_STRAND_BATCH,
		}
	}
}

impl EngineConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn title(mut self, title: impl Into<String>) -> Self {
		self.title = title.into();
		self
	}

	pub fn priority(mut self, priority: ThreadPriority) -> Self {
		self.priority = Some(priority);
		self
	}

	pub fn affinity(mut self, cpus: impl IntoIterator<Item = usize>) -> Self {
		self.affinity = cpus.into_iter().collect();
		self
	}

	pub fn stack(mut self, stack: StackConfig) -> Self {
		self.stack = stack;
		self
	}

	pub fn strand_batch(mut self, batch: usize) -> Self {
		self.strand_batch = batch.max(1);
		self
	}
}
