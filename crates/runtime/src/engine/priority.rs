// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Worker thread priority and CPU affinity.
//!
//! Applied from the worker start hook. Failures are reported through the log
//! and never abort the engine; on platforms without support every call is a
//! no-op that reports `false`.

use serde::Deserialize;
use tracing::{debug, warn};

/// Scheduling priority of the engine's worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPriority {
	TimeCritical,
	Highest,
	AboveNormal,
	Normal,
	BelowNormal,
	Lowest,
	Idle,
}

impl ThreadPriority {
	/// Static priority level handed to the OS for real-time policies.
	pub fn level(self) -> i32 {
		match self {
			ThreadPriority::TimeCritical => 99,
			ThreadPriority::Highest => 83,
			ThreadPriority::AboveNormal => 66,
			ThreadPriority::Normal => 50,
			ThreadPriority::BelowNormal => 33,
			ThreadPriority::Lowest => 16,
			ThreadPriority::Idle => 0,
		}
	}
}

/// OS scheduling policy for worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedPolicy {
	Fifo,
	RoundRobin,
	#[default]
	Other,
}

pub(crate) fn configure_worker(index: usize, policy: SchedPolicy, priority: Option<ThreadPriority>, affinity: &[usize]) {
	if let Some(priority) = priority {
		if set_priority(policy, priority) {
			debug!(worker = index, ?policy, ?priority, "worker priority applied");
		} else {
			warn!(worker = index, ?policy, ?priority, "failed to apply worker priority");
		}
	}

	if affinity.is_empty() {
		return;
	}
	if let Some(&cpu) = affinity.get(index % affinity.len()) {
		if set_affinity(cpu) {
			debug!(worker = index, cpu, "worker pinned");
		} else {
			warn!(worker = index, cpu, "failed to pin worker");
		}
	}
}

cfg_if::cfg_if! {
	if #[cfg(target_os = "linux")] {
		fn set_priority(policy: SchedPolicy, priority: ThreadPriority) -> bool {
			let policy = match policy {
				SchedPolicy::Fifo => libc::SCHED_FIFO,
				SchedPolicy::RoundRobin => libc::SCHED_RR,
				SchedPolicy::Other => libc::SCHED_OTHER,
			};
			// SCHED_OTHER only accepts a static priority of 0
			let level = if policy == libc::SCHED_OTHER {
				0
			} else {
				priority.level().max(1)
			};

			// SAFETY: sched_param is plain old data and pthread_self is always valid
			unsafe {
				let mut param: libc::sched_param = std::mem::zeroed();
				param.sched_priority = level;
				libc::pthread_setschedparam(libc::pthread_self(), policy, &param) == 0
			}
		}

		fn set_affinity(cpu: usize) -> bool {
			// CPU_SET indexes past the set for ids it cannot represent
			if cpu >= libc::CPU_SETSIZE as usize {
				return false;
			}
			// SAFETY: cpu_set_t is plain old data, pid 0 targets the calling thread
			unsafe {
				let mut set: libc::cpu_set_t = std::mem::zeroed();
				libc::CPU_ZERO(&mut set);
				libc::CPU_SET(cpu, &mut set);
				libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0
			}
		}
	} else {
		fn set_priority(_policy: SchedPolicy, _priority: ThreadPriority) -> bool {
			false
		}

		fn set_affinity(_cpu: usize) -> bool {
			false
		}
	}
}
