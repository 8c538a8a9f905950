// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Message passing between actors.
//!
//! - [`Notifier`] / [`MsgPump`]: typed, queued, one mailbox per actor and type
//! - [`MsgHandle`]: a mailbox made before its receiver runs
//! - [`TrigHandle`] / [`Trigger`]: one value, once
//! - [`AsyncBuffer`]: bounded FIFO
//! - [`SyncChannel`]: rendezvous
//! - [`CspChannel`]: call and return

mod buffer;
mod channel;
mod csp;
mod mailbox;
mod trig;

pub use buffer::{AsyncBuffer, Pop, Push};
pub use channel::{SyncChannel, SyncSend, SyncTake};
pub use csp::{CspChannel, Invoke, WaitInvoke};
pub use mailbox::{MsgHandle, MsgPump, Notifier};
pub use trig::{TrigHandle, Trigger};
