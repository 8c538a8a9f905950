// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Ordered, thread-safe event log for checking interleavings.
//!
//! Actors record `(who, what)` pairs as they go; the test then asserts on
//! the global order, e.g. that one actor's critical section was never
//! interleaved with another actor's events.

use std::fmt;

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
	pub who: String,
	pub what: String,
}

impl fmt::Display for Event {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}", self.who, self.what)
	}
}

#[derive(Default)]
pub struct Trace {
	events: Mutex<Vec<Event>>,
}

impl Trace {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn record(&self, who: impl Into<String>, what: impl Into<String>) {
		self.events.lock().push(Event {
			who: who.into(),
			what: what.into(),
		});
	}

	pub fn events(&self) -> Vec<Event> {
		self.events.lock().clone()
	}

	pub fn len(&self) -> usize {
		self.events.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.events.lock().is_empty()
	}

	/// Everything `who` recorded, in order.
	pub fn of(&self, who: &str) -> Vec<String> {
		self.events.lock().iter().filter(|event| event.who == who).map(|event| event.what.clone()).collect()
	}

	pub fn count(&self, who: &str, what: &str) -> usize {
		self.events.lock().iter().filter(|event| event.who == who && event.what == what).count()
	}

	/// Index of the first `(who, what)` event.
	pub fn position(&self, who: &str, what: &str) -> Option<usize> {
		self.events.lock().iter().position(|event| event.who == who && event.what == what)
	}

	/// Assert that `(who_a, what_a)` was recorded before `(who_b, what_b)`.
	pub fn assert_before(&self, (who_a, what_a): (&str, &str), (who_b, what_b): (&str, &str)) {
		let first = self.position(who_a, what_a);
		let second = self.position(who_b, what_b);
		match (first, second) {
			(Some(first), Some(second)) => assert!(
				first < second,
				"expected `{who_a} {what_a}` before `{who_b} {what_b}`\n{}",
				self.dump()
			),
			_ => panic!("missing `{who_a} {what_a}` or `{who_b} {what_b}`\n{}", self.dump()),
		}
	}

	/// Assert that every section opened by an `enter` event and closed by
	/// the matching `leave` event of the same actor contains no event from
	/// anyone else.
	pub fn assert_exclusive(&self, enter: &str, leave: &str) {
		let events = self.events();
		let mut holder: Option<&str> = None;

		for (index, event) in events.iter().enumerate() {
			match holder {
				Some(who) => {
					assert_eq!(who, event.who, "event #{index} `{event}` interleaved a section of `{who}`\n{}", self.dump());
					if event.what == leave {
						holder = None;
					}
				}
				None => {
					assert_ne!(event.what, leave, "event #{index} `{event}` left a section never entered\n{}", self.dump());
					if event.what == enter {
						holder = Some(event.who.as_str());
					}
				}
			}
		}
	}

	pub fn dump(&self) -> String {
		self.events.lock().iter().enumerate().map(|(index, event)| format!("{index:4}: {event}\n")).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_record_in_order() {
		let trace = Trace::new();
		trace.record("a", "start");
		trace.record("b", "start");
		trace.record("a", "stop");

		assert_eq!(trace.len(), 3);
		assert_eq!(trace.of("a"), vec!["start", "stop"]);
		assert_eq!(trace.count("b", "start"), 1);
		trace.assert_before(("b", "start"), ("a", "stop"));
	}

	#[test]
	fn test_exclusive_sections() {
		let trace = Trace::new();
		for who in ["a", "b"] {
			trace.record(who, "lock");
			trace.record(who, "work");
			trace.record(who, "unlock");
		}
		trace.record("a", "idle");
		trace.assert_exclusive("lock", "unlock");
	}

	#[test]
	#[should_panic(expected = "interleaved")]
	fn test_interleaved_sections() {
		let trace = Trace::new();
		trace.record("a", "lock");
		trace.record("b", "work");
		trace.record("a", "unlock");
		trace.assert_exclusive("lock", "unlock");
	}
}
