// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Error taxonomy of the runtime.
//!
//! Primitive-level failures (a lost notifier, a timeout) are returned to the
//! suspended operation that observed them and never terminate unrelated actors.

use std::{any::Any, fmt::Display, io, time::Duration};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	/// The actor on the other side of a notifier, trigger or pump is gone.
	#[error("notifier lost: the target actor has quit or every producer was dropped")]
	LostNotifier,

	#[error("stack exhausted: fiber needs {required} bytes but the stack provides {available}")]
	StackExhaustion {
		required: usize,
		available: usize,
	},

	#[error("operation timed out after {0:?}")]
	Timeout(Duration),

	/// Invalid call sequence, e.g. waiting twice on the same child.
	#[error("usage error: {0}")]
	Usage(String),

	/// A resource such as a listening port is already taken.
	#[error("resource conflict: {0}")]
	ResourceConflict(String),

	#[error("engine is already running")]
	EngineRunning,

	#[error("engine is not running")]
	EngineStopped,

	#[error("io error: {0}")]
	Io(String),

	/// Error raised by user code inside an actor body.
	#[error("actor body failed: {0}")]
	Body(String),
}

impl Error {
	/// Wrap an arbitrary error raised by an actor body.
	pub fn body(err: impl Display) -> Self {
		Error::Body(err.to_string())
	}

	pub fn is_lost(&self) -> bool {
		matches!(self, Error::LostNotifier)
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_))
	}

	pub fn is_usage(&self) -> bool {
		matches!(self, Error::Usage(_))
	}
}

impl From<io::Error> for Error {
	fn from(err: io::Error) -> Self {
		match err.kind() {
			io::ErrorKind::AddrInUse => Error::ResourceConflict(err.to_string()),
			_ => Error::Io(err.to_string()),
		}
	}
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		message.to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

/// Build an [`Error::Usage`] from a format string.
#[macro_export]
macro_rules! usage_error {
	($($arg:tt)*) => {
		$crate::error::Error::Usage(format!($($arg)*))
	};
}

/// Return early with an [`Error::Usage`].
#[macro_export]
macro_rules! return_usage_error {
	($($arg:tt)*) => {
		return Err($crate::usage_error!($($arg)*))
	};
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_addr_in_use_maps_to_resource_conflict() {
		let err: Error = io::Error::new(io::ErrorKind::AddrInUse, "port 1234 taken").into();
		assert!(matches!(err, Error::ResourceConflict(_)));
	}

	#[test]
	fn test_other_io_errors_map_to_io() {
		let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
		assert_eq!(err, Error::Io("pipe".to_string()));
	}

	#[test]
	fn test_usage_error_macro() {
		let err = usage_error!("child {} waited twice", 7);
		assert!(err.is_usage());
		assert_eq!(err.to_string(), "usage error: child 7 waited twice");
	}

	#[test]
	fn test_panic_message() {
		let payload = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
		assert_eq!(panic_message(payload.as_ref()), "boom 1");
	}

	#[test]
	fn test_stack_exhaustion_display() {
		let err = Error::StackExhaustion {
			required: 4096,
			available: 1024,
		};
		assert_eq!(err.to_string(), "stack exhausted: fiber needs 4096 bytes but the stack provides 1024");
	}
}
