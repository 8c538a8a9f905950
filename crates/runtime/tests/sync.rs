// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{sync::Arc, time::Duration};

use reifydb_runtime::{Actor, ActorExit, ActorMutex, ActorSharedMutex, Engine, EngineConfig, SchedPolicy, Strand};
use reifydb_testing::{Trace, wait_for};

fn started(threads: usize) -> Engine {
	let engine = Engine::new(EngineConfig::new().title("sync-test"));
	engine.run(threads, SchedPolicy::default()).unwrap();
	engine
}

fn ms(millis: u64) -> Duration {
	Duration::from_millis(millis)
}

#[test]
fn test_mutex_sections_never_interleave() {
	let engine = started(4);
	let mutex = Arc::new(ActorMutex::new());
	let trace = Arc::new(Trace::new());

	let actors: Vec<Actor> = ["a", "b"]
		.into_iter()
		.map(|name| {
			let mutex = mutex.clone();
			let trace = trace.clone();
			Actor::create(&Strand::create(&engine), move |actor| async move {
				for _ in 0..3 {
					let guard = mutex.lock(&actor).await?;
					trace.record(name, "lock");
					for step in 0..3 {
						actor.sleep(ms(2)).await?;
						trace.record(name, format!("step {step}"));
					}
					trace.record(name, "unlock");
					guard.unlock();
				}
				Ok(())
			})
		})
		.collect();

	for actor in &actors {
		actor.notify_run().unwrap();
	}
	for actor in &actors {
		assert_eq!(actor.outside_wait_quit().unwrap(), ActorExit::Completed);
	}

	trace.assert_exclusive("lock", "unlock");
	assert_eq!(trace.count("a", "lock"), 3);
	assert_eq!(trace.count("b", "lock"), 3);
	assert!(!mutex.is_locked());
	engine.stop().unwrap();
}

#[test]
fn test_mutex_recursive_lock_is_usage_error() {
	let engine = started(1);
	let mutex = Arc::new(ActorMutex::new());

	let held = mutex.clone();
	let actor = Actor::create(&Strand::create(&engine), move |actor| async move {
		let _guard = held.lock(&actor).await?;
		assert_eq!(held.owner(), Some(actor.id()));
		assert!(held.lock(&actor).await.is_err_and(|err| err.is_usage()));
		assert!(held.try_lock(&actor).is_none());
		Ok(())
	});

	actor.notify_run().unwrap();
	assert_eq!(actor.outside_wait_quit().unwrap(), ActorExit::Completed);
	assert!(!mutex.is_locked());
	engine.stop().unwrap();
}

#[test]
fn test_mutex_released_on_force_quit() {
	let engine = started(2);
	let mutex = Arc::new(ActorMutex::new());
	let strand = Strand::create(&engine);

	let held = mutex.clone();
	let holder = Actor::create(&strand, move |actor| async move {
		let _guard = held.lock(&actor).await?;
		actor.sleep(Duration::from_secs(60)).await?;
		Ok(())
	});
	let waiting = mutex.clone();
	let waiter = Actor::create(&strand.sibling().unwrap(), move |actor| async move {
		let _guard = waiting.lock(&actor).await?;
		Ok(())
	});

	holder.notify_run().unwrap();
	wait_for(|| mutex.is_locked(), "holder should take the lock");
	waiter.notify_run().unwrap();
	wait_for(|| mutex.waiting() == 1, "waiter should queue");

	holder.notify_quit();
	assert_eq!(holder.outside_wait_quit().unwrap(), ActorExit::ForceQuit);
	assert_eq!(waiter.outside_wait_quit().unwrap(), ActorExit::Completed);
	assert!(!mutex.is_locked());
	engine.stop().unwrap();
}

#[test]
fn test_shared_mutex_concurrent_upgrade() {
	let engine = started(4);
	let lock = Arc::new(ActorSharedMutex::new());
	let trace = Arc::new(Trace::new());

	let exclusive_lock = lock.clone();
	let exclusive_trace = trace.clone();
	let writer = Actor::create(&Strand::create(&engine), move |actor| async move {
		let guard = exclusive_lock.lock(&actor).await?;
		exclusive_trace.record("a", "locked");
		actor.sleep(ms(20)).await?;
		exclusive_trace.record("a", "unlocked");
		guard.unlock();
		Ok(())
	});
	writer.notify_run().unwrap();
	wait_for(|| lock.is_locked(), "writer should hold the lock");

	let readers: Vec<Actor> = ["b", "c"]
		.into_iter()
		.map(|name| {
			let lock = lock.clone();
			let trace = trace.clone();
			Actor::create(&Strand::create(&engine), move |actor| async move {
				let mut read = lock.lock_shared(&actor).await?;
				trace.record(name, "shared");
				actor.sleep(ms(10)).await?;

				let upgraded = read.lock_upgrade().await;
				trace.record(name, "upgraded");
				actor.sleep(ms(5)).await?;
				trace.record(name, "demoted");
				upgraded.unlock_upgrade();

				read.unlock_shared();
				Ok(())
			})
		})
		.collect();

	for reader in &readers {
		reader.notify_run().unwrap();
	}
	assert_eq!(writer.outside_wait_quit().unwrap(), ActorExit::Completed);
	for reader in &readers {
		assert_eq!(reader.outside_wait_quit().unwrap(), ActorExit::Completed);
	}

	trace.assert_before(("a", "unlocked"), ("b", "shared"));
	trace.assert_before(("a", "unlocked"), ("c", "shared"));
	trace.assert_exclusive("upgraded", "demoted");
	assert_eq!(trace.count("b", "upgraded"), 1);
	assert_eq!(trace.count("c", "upgraded"), 1);

	assert!(!lock.is_locked());
	assert_eq!(lock.readers(), 0);
	engine.stop().unwrap();
}

#[test]
fn test_shared_holders_run_together() {
	let engine = started(4);
	let lock = Arc::new(ActorSharedMutex::new());

	let readers: Vec<Actor> = (0..3)
		.map(|_| {
			let lock = lock.clone();
			Actor::create(&Strand::create(&engine), move |actor| async move {
				let _read = lock.lock_shared(&actor).await?;
				actor.sleep(ms(30)).await?;
				Ok(())
			})
		})
		.collect();

	for reader in &readers {
		reader.notify_run().unwrap();
	}
	wait_for(|| lock.readers() == 3, "all readers should hold the lock at once");

	for reader in &readers {
		assert_eq!(reader.outside_wait_quit().unwrap(), ActorExit::Completed);
	}
	engine.stop().unwrap();
}

#[test]
fn test_queued_writer_blocks_new_readers() {
	let engine = started(4);
	let lock = Arc::new(ActorSharedMutex::new());
	let trace = Arc::new(Trace::new());

	let first = lock.clone();
	let first_trace = trace.clone();
	let reader = Actor::create(&Strand::create(&engine), move |actor| async move {
		let read = first.lock_shared(&actor).await?;
		actor.sleep(ms(30)).await?;
		first_trace.record("reader", "released");
		drop(read);
		Ok(())
	});
	reader.notify_run().unwrap();
	wait_for(|| lock.readers() == 1, "first reader should hold the lock");

	let write = lock.clone();
	let write_trace = trace.clone();
	let writer = Actor::create(&Strand::create(&engine), move |actor| async move {
		let guard = write.lock(&actor).await?;
		write_trace.record("writer", "locked");
		drop(guard);
		Ok(())
	});
	writer.notify_run().unwrap();
	wait_for(|| lock.waiting() == 1, "writer should queue");

	let late = lock.clone();
	let late_trace = trace.clone();
	let late_reader = Actor::create(&Strand::create(&engine), move |actor| async move {
		let _read = late.lock_shared(&actor).await?;
		late_trace.record("late", "shared");
		Ok(())
	});
	late_reader.notify_run().unwrap();

	for actor in [&reader, &writer, &late_reader] {
		assert_eq!(actor.outside_wait_quit().unwrap(), ActorExit::Completed);
	}
	trace.assert_before(("reader", "released"), ("writer", "locked"));
	trace.assert_before(("writer", "locked"), ("late", "shared"));
	engine.stop().unwrap();
}

#[test]
fn test_shared_mutex_relock_is_usage_error() {
	let engine = started(1);
	let lock = Arc::new(ActorSharedMutex::new());

	let held = lock.clone();
	let actor = Actor::create(&Strand::create(&engine), move |actor| async move {
		let read = held.lock_shared(&actor).await?;
		assert!(held.holds_shared(&actor));
		assert!(held.lock_shared(&actor).await.is_err_and(|err| err.is_usage()));
		assert!(held.lock(&actor).await.is_err_and(|err| err.is_usage()));
		read.unlock_shared();

		let write = held.lock(&actor).await?;
		assert_eq!(held.owner(), Some(actor.id()));
		assert!(held.lock(&actor).await.is_err_and(|err| err.is_usage()));
		assert!(held.lock_shared(&actor).await.is_err_and(|err| err.is_usage()));
		write.unlock();
		Ok(())
	});

	actor.notify_run().unwrap();
	assert_eq!(actor.outside_wait_quit().unwrap(), ActorExit::Completed);
	assert!(!lock.is_locked());
	assert_eq!(lock.readers(), 0);
	assert_eq!(lock.owner(), None);
	engine.stop().unwrap();
}
