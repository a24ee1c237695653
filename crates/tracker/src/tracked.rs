use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use plexus_registry::{ServiceEvent, ServiceEventKind, ServiceRef};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::customizer::TrackerCustomizer;
use crate::latch::CounterLatch;

/// Tracked-set state machine shared between the tracker facade and the
/// registry listener.
///
/// Invariants: a reference is in at most one of `initial`, `adding`,
/// `tracked`; every customizer call happens with the state lock released;
/// removal from `tracked` precedes the `removed` callback.
pub(crate) struct Tracked<T, C> {
	customizer: Arc<C>,
	state: Mutex<State<T>>,
	cond: Condvar,
	closed: AtomicBool,
	/// Drained by `close` so in-flight deliveries finish first.
	latch: CounterLatch,
}

struct State<T> {
	tracked: FxHashMap<ServiceRef, Arc<T>>,
	/// References whose `adding` call is in progress. Keeps reentrant
	/// track/untrack during a customizer call coherent.
	adding: Vec<ServiceRef>,
	/// Matches that existed when the tracker opened, not yet processed.
	initial: VecDeque<ServiceRef>,
	/// References the customizer already saw through an event while the
	/// initial queue drains. The event takes precedence over the queued
	/// entry, even when `adding` declined the reference.
	notified: FxHashSet<ServiceRef>,
	draining_initial: bool,
	/// Bumped once per add, modify, and remove.
	tracking_count: u64,
}

impl<T> State<T> {
	fn finish_initial(&mut self) {
		self.draining_initial = false;
		self.notified.clear();
	}
}

impl<T, C: TrackerCustomizer<T>> Tracked<T, C> {
	pub(crate) fn new(customizer: Arc<C>) -> Self {
		Tracked {
			customizer,
			state: Mutex::new(State {
				tracked: FxHashMap::default(),
				adding: Vec::new(),
				initial: VecDeque::new(),
				notified: FxHashSet::default(),
				draining_initial: true,
				tracking_count: 0,
			}),
			cond: Condvar::new(),
			closed: AtomicBool::new(false),
			latch: CounterLatch::default(),
		}
	}

	pub(crate) fn set_initial(&self, references: Vec<ServiceRef>) {
		self.state.lock().initial.extend(references);
	}

	/// Processes the initial queue. A queued reference the customizer has
	/// already seen through an event (tracked, busy adding, or notified and
	/// declined) is a no-op here; an event that untracked one has removed
	/// it from the queue.
	pub(crate) fn track_initial(&self) {
		loop {
			let reference = {
				let mut state = self.state.lock();
				if self.closed.load(Ordering::Acquire) {
					state.finish_initial();
					return;
				}
				let Some(reference) = state.initial.pop_front() else {
					state.finish_initial();
					return;
				};
				if state.tracked.contains_key(&reference)
					|| state.adding.contains(&reference)
					|| state.notified.contains(&reference)
				{
					continue;
				}
				state.adding.push(reference);
				reference
			};
			self.customizer_adding(reference);
		}
	}

	/// Routes one registry event. Runs on the publisher's thread.
	pub(crate) fn service_changed(&self, event: &ServiceEvent) {
		if self.closed.load(Ordering::Acquire) {
			return;
		}
		let _guard = self.latch.enter();
		if self.closed.load(Ordering::Acquire) {
			return;
		}
		match event.kind {
			ServiceEventKind::Registered | ServiceEventKind::Modified => {
				self.track(event.reference);
			}
			ServiceEventKind::ModifiedEndmatch | ServiceEventKind::Unregistering => {
				self.untrack(event.reference);
			}
		}
	}

	pub(crate) fn track(&self, reference: ServiceRef) {
		let already = {
			let mut state = self.state.lock();
			if state.draining_initial {
				state.notified.insert(reference);
			}
			match state.tracked.get(&reference) {
				Some(object) => {
					let object = Arc::clone(object);
					state.tracking_count += 1;
					Some(object)
				}
				None => {
					if state.adding.contains(&reference) {
						// Reentrant event for a reference mid-`adding`.
						return;
					}
					state.adding.push(reference);
					None
				}
			}
		};
		match already {
			Some(object) => self.customizer.modified(reference, &object),
			None => self.customizer_adding(reference),
		}
	}

	/// Calls `adding` outside the lock, then reconciles: the reference may
	/// have been untracked (or the tracker closed) while the customizer ran.
	fn customizer_adding(&self, reference: ServiceRef) {
		let object = match catch_unwind(AssertUnwindSafe(|| self.customizer.adding(reference)))
		{
			Ok(object) => object,
			Err(panic) => {
				self.state.lock().adding.retain(|r| *r != reference);
				resume_unwind(panic);
			}
		};

		let became_untracked = {
			let mut state = self.state.lock();
			let was_adding = state.adding.iter().position(|r| *r == reference);
			match was_adding {
				Some(at) => {
					state.adding.remove(at);
					if self.closed.load(Ordering::Acquire) {
						true
					} else {
						if let Some(object) = &object {
							state.tracked.insert(reference, Arc::clone(object));
							state.tracking_count += 1;
							self.cond.notify_all();
						}
						false
					}
				}
				// Untracked while `adding` ran.
				None => true,
			}
		};

		if became_untracked {
			if let Some(object) = object {
				self.customizer.removed(reference, object);
			}
		}
	}

	pub(crate) fn untrack(&self, reference: ServiceRef) {
		let object = {
			let mut state = self.state.lock();
			if let Some(at) = state.initial.iter().position(|r| *r == reference) {
				// Never seen by the customizer; just forget it.
				state.initial.remove(at);
				return;
			}
			if let Some(at) = state.adding.iter().position(|r| *r == reference) {
				// `adding` is in flight; it will fire `removed` itself.
				state.adding.remove(at);
				return;
			}
			let Some(object) = state.tracked.remove(&reference) else {
				return;
			};
			state.tracking_count += 1;
			self.cond.notify_all();
			object
		};
		self.customizer.removed(reference, object);
	}

	/// Shuts the state machine down: wakes waiters, drains in-flight
	/// deliveries, then untracks whatever remains. The registry listener
	/// must already be removed.
	pub(crate) fn close(&self) {
		if self.closed.swap(true, Ordering::AcqRel) {
			return;
		}
		{
			let mut state = self.state.lock();
			state.initial.clear();
			self.cond.notify_all();
		}
		self.latch.wait();

		let references: Vec<ServiceRef> = self.state.lock().tracked.keys().copied().collect();
		for reference in references {
			self.untrack(reference);
		}
	}

	pub(crate) fn get(&self, reference: ServiceRef) -> Option<Arc<T>> {
		self.state.lock().tracked.get(&reference).cloned()
	}

	pub(crate) fn snapshot(&self) -> Vec<(ServiceRef, Arc<T>)> {
		self.state
			.lock()
			.tracked
			.iter()
			.map(|(r, o)| (*r, Arc::clone(o)))
			.collect()
	}

	pub(crate) fn size(&self) -> usize {
		self.state.lock().tracked.len()
	}

	pub(crate) fn tracking_count(&self) -> u64 {
		self.state.lock().tracking_count
	}

	/// Blocks until something is tracked, the deadline passes, or the
	/// tracker closes. Returns whether something is tracked.
	pub(crate) fn wait_until(&self, deadline: Instant) -> bool {
		let mut state = self.state.lock();
		loop {
			if !state.tracked.is_empty() {
				return true;
			}
			if self.closed.load(Ordering::Acquire) {
				return false;
			}
			if self.cond.wait_until(&mut state, deadline).timed_out() {
				return !state.tracked.is_empty();
			}
		}
	}
}
