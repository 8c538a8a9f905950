// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{sync::Arc, time::Duration};

use reifydb_runtime::{
	Actor, ActorExit, Engine, EngineConfig, Error, SchedPolicy, Strand,
	io::{accept, bind_listener, connect, read, write_all},
};
use reifydb_testing::Trace;

fn started(threads: usize) -> Engine {
	let engine = Engine::new(EngineConfig::new().title("io-test"));
	engine.run(threads, SchedPolicy::default()).unwrap();
	engine
}

const LIMIT: Duration = Duration::from_secs(5);

#[test]
fn test_port_conflict() {
	let engine = started(1);
	let listener = bind_listener(&engine, "127.0.0.1:0").unwrap();
	let addr = listener.local_addr().unwrap();

	let second = bind_listener(&engine, addr);
	assert!(matches!(second, Err(Error::ResourceConflict(_))));

	drop(listener);
	engine.stop().unwrap();
}

#[test]
fn test_bind_requires_running_engine() {
	let engine = Engine::new(EngineConfig::default());
	assert!(matches!(bind_listener(&engine, "127.0.0.1:0"), Err(Error::EngineStopped)));
}

#[test]
fn test_accept_times_out() {
	let engine = started(2);
	let trace = Arc::new(Trace::new());

	let recorder = trace.clone();
	let actor = Actor::create(&Strand::create(&engine), move |actor| async move {
		let engine = actor.strand().engine()?;
		let listener = bind_listener(&engine, "127.0.0.1:0")?;
		let result = accept(&actor, &listener, Duration::from_millis(20)).await;
		recorder.record("actor", format!("timeout={}", result.is_err_and(|err| err.is_timeout())));
		Ok(())
	});

	actor.notify_run().unwrap();
	assert_eq!(actor.outside_wait_quit().unwrap(), ActorExit::Completed);
	assert_eq!(trace.of("actor"), vec!["timeout=true"]);
	engine.stop().unwrap();
}

#[test]
fn test_echo_between_actors() {
	let engine = started(2);
	let listener = bind_listener(&engine, "127.0.0.1:0").unwrap();
	let addr = listener.local_addr().unwrap();
	let trace = Arc::new(Trace::new());

	let server = Actor::create(&Strand::create(&engine), move |actor| async move {
		let (mut stream, _) = accept(&actor, &listener, LIMIT).await?;
		let mut buf = [0u8; 64];
		loop {
			let n = read(&actor, &mut stream, &mut buf, LIMIT).await?;
			if n == 0 {
				return Ok(());
			}
			write_all(&actor, &mut stream, &buf[..n], LIMIT).await?;
		}
	});

	let recorder = trace.clone();
	let client = Actor::create(&Strand::create(&engine), move |actor| async move {
		let mut stream = connect(&actor, addr, LIMIT).await?;
		for word in ["ping", "pong"] {
			write_all(&actor, &mut stream, word.as_bytes(), LIMIT).await?;

			let mut echoed = Vec::new();
			let mut buf = [0u8; 64];
			while echoed.len() < word.len() {
				let n = read(&actor, &mut stream, &mut buf, LIMIT).await?;
				if n == 0 {
					break;
				}
				echoed.extend_from_slice(&buf[..n]);
			}
			recorder.record("client", String::from_utf8_lossy(&echoed).into_owned());
		}
		Ok(())
	});

	server.notify_run().unwrap();
	client.notify_run().unwrap();
	assert_eq!(client.outside_wait_quit().unwrap(), ActorExit::Completed);
	assert_eq!(server.outside_wait_quit().unwrap(), ActorExit::Completed);
	assert_eq!(trace.of("client"), vec!["ping", "pong"]);
	engine.stop().unwrap();
}
