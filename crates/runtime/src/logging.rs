// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Logging bootstrap for hosts embedding the runtime.
//!
//! The runtime itself only emits `tracing` events; installing a subscriber
//! is left to the host. [`init`] is a convenience for tests and small hosts.

use serde::Deserialize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
	/// Default filter directive, used when `RUST_LOG` is not set.
	pub filter: String,
	pub ansi: bool,
	/// Emit one JSON object per event instead of human-readable lines.
	pub json: bool,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			filter: "info".to_string(),
			ansi: true,
			json: false,
		}
	}
}

impl LoggingConfig {
	pub fn new(filter: impl Into<String>) -> Self {
		Self {
			filter: filter.into(),
			..Self::default()
		}
	}

	pub fn ansi(mut self, ansi: bool) -> Self {
		self.ansi = ansi;
		self
	}

	pub fn json(mut self, json: bool) -> Self {
		self.json = json;
		self
	}

	fn env_filter(&self) -> Result<EnvFilter> {
		match EnvFilter::try_from_default_env() {
			Ok(filter) => Ok(filter),
			Err(_) => EnvFilter::try_new(&self.filter)
				.map_err(|err| Error::Usage(format!("invalid log filter {:?}: {}", self.filter, err))),
		}
	}
}

/// Install a global `fmt` subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
	let filter = config.env_filter()?;

	let installed = if config.json {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().json().with_thread_names(true))
			.try_init()
	} else {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().with_ansi(config.ansi).with_thread_names(true))
			.try_init()
	};

	installed.map_err(|err| Error::Usage(format!("failed to install log subscriber: {}", err)))
}
