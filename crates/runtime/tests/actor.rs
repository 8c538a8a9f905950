// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{
	hint::black_box,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	time::Duration,
};

use reifydb_runtime::{Actor, ActorExit, ActorState, Engine, EngineConfig, Error, SchedPolicy, StackMode, Strand};
use reifydb_testing::{Trace, wait_for};

fn started(threads: usize) -> Engine {
	let engine = Engine::new(EngineConfig::new().title("actor-test"));
	engine.run(threads, SchedPolicy::default()).unwrap();
	engine
}

fn ms(millis: u64) -> Duration {
	Duration::from_millis(millis)
}

#[test]
fn test_body_completes() {
	let engine = started(2);
	let trace = Arc::new(Trace::new());

	let recorder = trace.clone();
	let actor = Actor::create(&Strand::create(&engine), move |actor| async move {
		recorder.record("main", "start");
		actor.sleep(ms(5)).await?;
		actor.yield_now().await;
		recorder.record("main", "end");
		Ok(())
	});
	assert_eq!(actor.state(), ActorState::Created);

	actor.notify_run().unwrap();
	assert_eq!(actor.outside_wait_quit().unwrap(), ActorExit::Completed);
	assert!(actor.is_quit());
	assert_eq!(actor.exit(), Some(ActorExit::Completed));
	assert_eq!(trace.of("main"), vec!["start", "end"]);

	engine.stop().unwrap();
}

#[test]
fn test_run_twice_is_usage_error() {
	let engine = started(1);
	let actor = Actor::create(&Strand::create(&engine), |_| async { Ok(()) });

	actor.notify_run().unwrap();
	assert!(actor.notify_run().unwrap_err().is_usage());
	actor.outside_wait_quit().unwrap();
	engine.stop().unwrap();
}

#[test]
fn test_wait_on_never_started_actor() {
	let engine = started(1);
	let actor = Actor::create(&Strand::create(&engine), |_| async { Ok(()) });
	assert!(actor.outside_wait_quit().unwrap_err().is_usage());
	engine.stop().unwrap();
}

#[test]
fn test_failed_body() {
	let engine = started(1);
	let actor = Actor::create(&Strand::create(&engine), |_| async { Err(Error::body("boom")) });

	actor.notify_run().unwrap();
	assert_eq!(actor.outside_wait_quit().unwrap(), ActorExit::Failed(Error::Body("boom".to_string())));
	engine.stop().unwrap();
}

#[test]
fn test_panicking_body_only_ends_that_actor() {
	let engine = started(2);
	let strand = Strand::create(&engine);

	let panicking = Actor::create(&strand, |actor| async move {
		actor.yield_now().await;
		panic!("body exploded");
	});
	let healthy = Actor::create(&strand, |actor| async move {
		actor.sleep(ms(10)).await?;
		Ok(())
	});

	panicking.notify_run().unwrap();
	healthy.notify_run().unwrap();

	match panicking.outside_wait_quit().unwrap() {
		ActorExit::Panicked(message) => assert!(message.contains("body exploded")),
		other => panic!("unexpected exit {other:?}"),
	}
	assert_eq!(healthy.outside_wait_quit().unwrap(), ActorExit::Completed);
	engine.stop().unwrap();
}

#[test]
fn test_child_run_and_wait() {
	let engine = started(2);
	let trace = Arc::new(Trace::new());

	let recorder = trace.clone();
	let parent = Actor::create(&Strand::create(&engine), move |actor| async move {
		let child_trace = recorder.clone();
		let child = actor.create_child(move |child| async move {
			child.sleep(ms(5)).await?;
			child_trace.record("child", "done");
			Ok(())
		});
		assert_eq!(child.parent(), actor.id());
		assert_eq!(child.parent_id(), Some(actor.id()));
		assert_eq!(actor.child_count(), 1);

		actor.child_run(&child)?;
		let exit = actor.child_wait_quit(&child).await?;
		recorder.record("parent", format!("child exit {:?}", exit));
		assert_eq!(actor.child_count(), 0);
		Ok(())
	});

	parent.notify_run().unwrap();
	assert_eq!(parent.outside_wait_quit().unwrap(), ActorExit::Completed);
	trace.assert_before(("child", "done"), ("parent", "child exit Completed"));
	engine.stop().unwrap();
}

#[test]
fn test_child_usage_errors() {
	let engine = started(1);
	let outcome = Arc::new(Trace::new());

	let recorder = outcome.clone();
	let parent = Actor::create(&Strand::create(&engine), move |actor| async move {
		let idle = actor.create_child(|_| async { Ok(()) });
		let never_started = actor.child_wait_quit(&idle).await;
		recorder.record("parent", format!("never started usage={}", never_started.unwrap_err().is_usage()));

		actor.child_run(&idle)?;
		actor.child_wait_quit(&idle).await?;
		let twice = actor.child_wait_quit(&idle).await;
		recorder.record("parent", format!("twice usage={}", twice.unwrap_err().is_usage()));
		Ok(())
	});

	parent.notify_run().unwrap();
	assert_eq!(parent.outside_wait_quit().unwrap(), ActorExit::Completed);
	assert_eq!(outcome.of("parent"), vec!["never started usage=true", "twice usage=true"]);
	engine.stop().unwrap();
}

#[test]
fn test_foreign_child_is_usage_error() {
	let engine = started(1);
	let strand = Strand::create(&engine);
	let outcome = Arc::new(Trace::new());

	let recorder = outcome.clone();
	let parent = Actor::create(&strand, move |actor| async move {
		let other = actor.create_child(|_| async { Ok(()) });
		let sibling = actor.create_child(move |sibling| async move {
			let result = sibling.child_run(&other);
			recorder.record("sibling", format!("usage={}", result.unwrap_err().is_usage()));
			Ok(())
		});
		actor.child_run(&sibling)?;
		actor.child_wait_quit(&sibling).await?;
		Ok(())
	});

	parent.notify_run().unwrap();
	assert_eq!(parent.outside_wait_quit().unwrap(), ActorExit::Completed);
	assert_eq!(outcome.of("sibling"), vec!["usage=true"]);
	engine.stop().unwrap();
}

#[test]
fn test_force_quit_sleeping_child() {
	let engine = started(2);
	let reached = Arc::new(AtomicBool::new(false));

	let flag = reached.clone();
	let parent = Actor::create(&Strand::create(&engine), move |actor| async move {
		let child = actor.create_child(move |child| async move {
			child.sleep(Duration::from_secs(60)).await?;
			flag.store(true, Ordering::SeqCst);
			Ok(())
		});
		actor.child_run(&child)?;
		actor.sleep(ms(10)).await?;

		let exit = actor.child_force_quit(&child).await?;
		assert!(exit.is_force_quit());
		Ok(())
	});

	parent.notify_run().unwrap();
	assert_eq!(parent.outside_wait_quit().unwrap(), ActorExit::Completed);
	assert!(!reached.load(Ordering::SeqCst));

	// the cancelled sleep must not keep the engine busy
	engine.stop().unwrap();
}

#[test]
fn test_force_quit_from_outside() {
	let engine = started(1);
	let actor = Actor::create(&Strand::create(&engine), |actor| async move {
		loop {
			actor.sleep(ms(5)).await?;
		}
	});

	actor.notify_run().unwrap();
	wait_for(|| actor.state() == ActorState::Suspended, "actor should suspend in its sleep");
	actor.notify_quit();
	assert_eq!(actor.outside_wait_quit().unwrap(), ActorExit::ForceQuit);
	engine.stop().unwrap();
}

#[test]
fn test_force_quit_unstarted_actor() {
	let engine = started(1);
	let actor = Actor::create(&Strand::create(&engine), |_| async { Ok(()) });
	actor.notify_quit();
	assert_eq!(actor.state(), ActorState::Quit);
	assert_eq!(actor.exit(), Some(ActorExit::ForceQuit));
	engine.stop().unwrap();
}

#[test]
fn test_quit_guard_defers_force_quit() {
	let engine = started(2);
	let trace = Arc::new(Trace::new());

	let recorder = trace.clone();
	let actor = Actor::create(&Strand::create(&engine), move |actor| async move {
		let guard = actor.quit_guard();
		recorder.record("actor", "guarded");
		actor.quit_signal().await;
		recorder.record("actor", "signalled");
		actor.sleep(ms(10)).await?;
		recorder.record("actor", format!("cleanup quit_requested={}", actor.quit_requested()));
		drop(guard);

		actor.sleep(Duration::from_secs(60)).await?;
		recorder.record("actor", "unreachable");
		Ok(())
	});

	actor.notify_run().unwrap();
	wait_for(|| trace.count("actor", "guarded") == 1, "actor should take its guard");
	actor.notify_quit();

	assert_eq!(actor.outside_wait_quit().unwrap(), ActorExit::ForceQuit);
	assert_eq!(trace.of("actor"), vec!["guarded", "signalled", "cleanup quit_requested=true"]);
	engine.stop().unwrap();
}

#[test]
fn test_children_torn_down_with_parent() {
	let engine = started(2);
	let strand = Strand::create(&engine);
	let children = Arc::new(parking_lot::Mutex::new(Vec::new()));

	let collected = children.clone();
	let parent = Actor::create(&strand, move |actor| async move {
		for _ in 0..3 {
			let child = actor.create_child(|child| async move {
				child.sleep(Duration::from_secs(60)).await?;
				Ok(())
			});
			collected.lock().push(child.actor().clone());
		}
		actor.child_run_all()?;
		actor.yield_now().await;
		Ok(())
	});

	parent.notify_run().unwrap();
	assert_eq!(parent.outside_wait_quit().unwrap(), ActorExit::Completed);
	for child in children.lock().iter() {
		assert_eq!(child.exit(), Some(ActorExit::ForceQuit));
	}
	engine.stop().unwrap();
}

#[test]
fn test_force_quit_reaches_every_descendant() {
	let engine = started(2);
	let trace = Arc::new(Trace::new());
	let descendants = Arc::new(parking_lot::Mutex::new(Vec::new()));

	let recorder = trace.clone();
	let collected = descendants.clone();
	let parent = Actor::create(&Strand::create(&engine), move |actor| async move {
		let child_collected = collected.clone();
		let child = actor.create_child(move |child| async move {
			let grandchild = child.create_child(move |grandchild| async move {
				let guard = grandchild.quit_guard();
				recorder.record("grandchild", "guarded");
				grandchild.quit_signal().await;
				grandchild.sleep(ms(10)).await?;
				recorder.record("grandchild", "cleanup");
				drop(guard);
				grandchild.sleep(Duration::from_secs(60)).await?;
				Ok(())
			});
			child_collected.lock().push(grandchild.actor().clone());
			child.child_run(&grandchild)?;
			child.sleep(Duration::from_secs(60)).await?;
			Ok(())
		});
		collected.lock().push(child.actor().clone());
		actor.child_run(&child)?;
		actor.sleep(Duration::from_secs(60)).await?;
		Ok(())
	});

	parent.notify_run().unwrap();
	wait_for(|| trace.count("grandchild", "guarded") == 1, "grandchild should take its guard");
	parent.notify_quit();

	assert_eq!(parent.outside_wait_quit().unwrap(), ActorExit::ForceQuit);
	let descendants = descendants.lock();
	assert_eq!(descendants.len(), 2);
	for descendant in descendants.iter() {
		assert_eq!(descendant.state(), ActorState::Quit);
		assert_eq!(descendant.exit(), Some(ActorExit::ForceQuit));
	}
	assert_eq!(trace.of("grandchild"), vec!["guarded", "cleanup"]);
	engine.stop().unwrap();
}

#[test]
fn test_failed_parent_still_reaps_children() {
	let engine = started(2);
	let children = Arc::new(parking_lot::Mutex::new(Vec::new()));

	let collected = children.clone();
	let parent = Actor::create(&Strand::create(&engine), move |actor| async move {
		let child = actor.create_child(|child| async move {
			child.sleep(Duration::from_secs(60)).await?;
			Ok(())
		});
		collected.lock().push(child.actor().clone());
		actor.child_run(&child)?;
		Err(Error::body("parent failed"))
	});

	parent.notify_run().unwrap();
	assert!(matches!(parent.outside_wait_quit().unwrap(), ActorExit::Failed(_)));
	assert!(children.lock().iter().all(Actor::is_quit));
	engine.stop().unwrap();
}

#[test]
fn test_wait_all_and_force_quit_all() {
	let engine = started(2);
	let outcome = Arc::new(Trace::new());

	let recorder = outcome.clone();
	let parent = Actor::create(&Strand::create(&engine), move |actor| async move {
		for delay in [3, 1, 2] {
			actor.create_child(move |child| async move {
				child.sleep(ms(delay)).await?;
				Ok(())
			});
		}
		actor.child_run_all()?;
		let exits = actor.child_wait_quit_all().await?;
		recorder.record("parent", format!("waited {}", exits.iter().filter(|exit| exit.is_completed()).count()));

		for _ in 0..2 {
			actor.create_child(|child| async move {
				child.sleep(Duration::from_secs(60)).await?;
				Ok(())
			});
		}
		actor.child_run_all()?;
		let exits = actor.child_force_quit_all().await?;
		recorder.record("parent", format!("forced {}", exits.iter().filter(|exit| exit.is_force_quit()).count()));
		Ok(())
	});

	parent.notify_run().unwrap();
	assert_eq!(parent.outside_wait_quit().unwrap(), ActorExit::Completed);
	assert_eq!(outcome.of("parent"), vec!["waited 3", "forced 2"]);
	engine.stop().unwrap();
}

#[test]
fn test_wait_for_non_child() {
	let engine = started(2);
	let strand = Strand::create(&engine);

	let worker = Actor::create(&strand, |actor| async move {
		actor.sleep(ms(10)).await?;
		Ok(())
	});
	let watched = worker.clone();
	let watcher = Actor::create(&strand.sibling().unwrap(), move |actor| async move {
		let exit = actor.actor_wait_quit(&watched).await?;
		assert!(exit.is_completed());
		assert!(actor.actor_wait_quit(&actor).await.unwrap_err().is_usage());
		Ok(())
	});

	worker.notify_run().unwrap();
	watcher.notify_run().unwrap();
	assert_eq!(watcher.outside_wait_quit().unwrap(), ActorExit::Completed);
	engine.stop().unwrap();
}

#[test]
fn test_timeout_race() {
	let engine = started(2);
	let outcome = Arc::new(Trace::new());

	let recorder = outcome.clone();
	let actor = Actor::create(&Strand::create(&engine), move |actor| async move {
		let slow = actor.timeout(ms(10), actor.sleep(Duration::from_secs(60))).await;
		recorder.record("actor", format!("slow timeout={}", slow.unwrap_err().is_timeout()));

		let fast = actor.timeout(Duration::from_secs(60), async { 7 }).await?;
		recorder.record("actor", format!("fast {}", fast));
		Ok(())
	});

	actor.notify_run().unwrap();
	assert_eq!(actor.outside_wait_quit().unwrap(), ActorExit::Completed);
	assert_eq!(outcome.of("actor"), vec!["slow timeout=true", "fast 7"]);

	// neither losing timer nor losing sleep may hold the engine
	engine.stop().unwrap();
}

#[test]
fn test_fixed_stack_too_small() {
	let engine = started(1);
	let strand = Strand::create(&engine);

	let actor = Actor::create_with_stack(&strand, StackMode::Fixed(256), |actor| async move {
		let buffer = [7u8; 4096];
		actor.yield_now().await;
		black_box(&buffer);
		Ok(())
	});

	actor.notify_run().unwrap();
	match actor.outside_wait_quit().unwrap() {
		ActorExit::Failed(Error::StackExhaustion {
			required,
			available,
		}) => {
			assert!(required >= 4096);
			assert_eq!(available, 256);
		}
		other => panic!("unexpected exit {other:?}"),
	}
	engine.stop().unwrap();
}

#[test]
fn test_auto_stack_grows() {
	let engine = started(1);
	let strand = Strand::create(&engine);
	let outcome = Arc::new(Trace::new());

	let recorder = outcome.clone();
	let actor = Actor::create_with_stack(&strand, StackMode::Auto, move |actor| async move {
		let buffer = [7u8; 128 * 1024];
		actor.yield_now().await;
		black_box(&buffer);

		let size = actor.stack_size();
		recorder.record("actor", format!("fits={}", size >= actor.using_stack_size()));
		recorder.record("actor", format!("power_of_two={}", size.is_power_of_two()));
		actor.check_stack()?;
		Ok(())
	});

	actor.notify_run().unwrap();
	assert_eq!(actor.outside_wait_quit().unwrap(), ActorExit::Completed);
	assert_eq!(outcome.of("actor"), vec!["fits=true", "power_of_two=true"]);

	let stats = strand.stack_pool().stats();
	assert_eq!(stats.in_use, 0);
	assert_eq!(stats.allocated, 1);
	engine.stop().unwrap();
}

#[test]
fn test_stacks_are_reused() {
	let engine = started(1);
	let strand = Strand::create(&engine);

	for _ in 0..3 {
		let actor = Actor::create(&strand, |actor| async move {
			actor.yield_now().await;
			Ok(())
		});
		actor.notify_run().unwrap();
		actor.outside_wait_quit().unwrap();
	}

	let stats = strand.stack_pool().stats();
	assert_eq!(stats.allocated, 1);
	assert_eq!(stats.reused, 2);
	engine.stop().unwrap();
}
