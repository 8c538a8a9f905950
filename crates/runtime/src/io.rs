// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Timed socket operations for actors.
//!
//! Sockets are registered with the engine's reactor. A timed operation that
//! loses its race against the timer is dropped, which cancels it.

use std::{
	net::{SocketAddr, ToSocketAddrs},
	time::Duration,
};

use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::{TcpListener, TcpStream},
};
use tracing::debug;

use crate::{actor::Actor, engine::Engine, error::Result};

/// Bind a TCP listener on `addr` within `engine`.
///
/// An address already in use is reported as [`Error::ResourceConflict`](crate::Error::ResourceConflict).
pub fn bind_listener(engine: &Engine, addr: impl ToSocketAddrs) -> Result<TcpListener> {
	let listener = std::net::TcpListener::bind(addr)?;
	listener.set_nonblocking(true)?;

	let handle = engine.handle()?;
	let _runtime = handle.enter();
	let listener = TcpListener::from_std(listener)?;
	debug!(engine = engine.id(), addr = ?listener.local_addr().ok(), "listener bound");
	Ok(listener)
}

/// Accept one connection, giving up after `limit`.
pub async fn accept(actor: &Actor, listener: &TcpListener, limit: Duration) -> Result<(TcpStream, SocketAddr)> {
	Ok(actor.timeout(limit, listener.accept()).await??)
}

pub async fn connect(actor: &Actor, addr: SocketAddr, limit: Duration) -> Result<TcpStream> {
	Ok(actor.timeout(limit, TcpStream::connect(addr)).await??)
}

/// Read some bytes into `buf`; returns 0 at end of stream.
pub async fn read(actor: &Actor, stream: &mut TcpStream, buf: &mut [u8], limit: Duration) -> Result<usize> {
	Ok(actor.timeout(limit, stream.read(buf)).await??)
}

pub async fn write_all(actor: &Actor, stream: &mut TcpStream, buf: &[u8], limit: Duration) -> Result<()> {
	Ok(actor.timeout(limit, stream.write_all(buf)).await??)
}
