// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Strand-serialized cooperative actor runtime.
//!
//! An [`Engine`] owns a pool of worker threads. A [`Strand`] is a serial
//! executor on top of it: continuations posted to one strand never run
//! concurrently. An [`Actor`] is a cooperative task pinned to a strand; it
//! suspends on locks, messages and timers without ever blocking a worker.

pub mod actor;
pub mod engine;
pub mod error;
pub mod io;
pub mod logging;
pub mod message;
pub mod strand;
pub mod sync;
pub mod timer;

pub use actor::{Actor, ActorExit, ActorState, ChildActor, QuitGuard};
pub use engine::{Engine, EngineConfig, SchedPolicy, ThreadPriority, WorkGuard};
pub use error::{Error, Result};
pub use logging::LoggingConfig;
pub use message::{AsyncBuffer, CspChannel, MsgHandle, MsgPump, Notifier, SyncChannel, TrigHandle, Trigger};
pub use strand::{StackConfig, StackMode, Strand};
pub use sync::{ActorMutex, ActorSharedMutex};
pub use timer::Timer;
