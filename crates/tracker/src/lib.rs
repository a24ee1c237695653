//! A concurrent tracker over the plexus service registry.
//!
//! A [`ServiceTracker`] watches services matching a [`TrackerCriterion`],
//! maps each matching reference to a tracked object through a
//! [`TrackerCustomizer`], and keeps the set current as services come, go,
//! and change properties. [`ServiceTracker::get_service`] always answers
//! from the tracked set; [`ServiceTracker::wait_for_service`] blocks until
//! something matches or a deadline passes.
//!
//! Customizer callbacks run on the thread that triggered the change (the
//! publisher's thread for events, the opener's thread for the initial set)
//! and always outside the tracker's internal lock, so they may call back
//! into the tracker and the registry.

mod customizer;
mod latch;
mod tracked;

use std::cmp::Reverse;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use plexus_filter::Filter;
use plexus_registry::{OwnerId, ServiceRef, ServiceRegistry, keys};

pub use customizer::{RefCustomizer, TrackerCustomizer};

use crate::tracked::Tracked;

/// Distinguishes listeners of multiple trackers sharing one owner.
static NEXT_DISCRIMINATOR: AtomicU64 = AtomicU64::new(0);

/// What a tracker follows.
#[derive(Clone, Debug)]
pub enum TrackerCriterion {
	/// Exactly one service, by reference.
	Reference(ServiceRef),
	/// Every service published under an interface name.
	Interface(String),
	/// Services under an interface that also satisfy a filter.
	InterfaceFiltered(String, Filter),
	/// Services matching an arbitrary filter.
	Filter(Filter),
}

impl TrackerCriterion {
	fn to_filter(&self) -> Filter {
		match self {
			TrackerCriterion::Reference(reference) => {
				Filter::equality(keys::SERVICE_ID, &reference.id().to_string())
			}
			TrackerCriterion::Interface(name) => Filter::equality(keys::OBJECTCLASS, name),
			TrackerCriterion::InterfaceFiltered(name, filter) => {
				Filter::equality(keys::OBJECTCLASS, name).and(filter)
			}
			TrackerCriterion::Filter(filter) => filter.clone(),
		}
	}
}

/// Tracks services matching a criterion and the objects customized from
/// them. Closed on drop.
pub struct ServiceTracker<T, C: TrackerCustomizer<T>> {
	registry: Arc<ServiceRegistry>,
	owner: OwnerId,
	discriminator: u64,
	filter: Filter,
	customizer: Arc<C>,
	tracked: Mutex<Option<Arc<Tracked<T, C>>>>,
	/// Best reference for the tracking count it was computed at.
	cached_best: Mutex<Option<(u64, Option<ServiceRef>)>>,
}

/// A tracker whose tracked objects are the references themselves.
pub type RefTracker = ServiceTracker<ServiceRef, RefCustomizer>;

impl RefTracker {
	/// A tracker that needs no customization.
	pub fn references(registry: Arc<ServiceRegistry>, criterion: TrackerCriterion) -> Self {
		Self::new(registry, criterion, RefCustomizer)
	}
}

impl<T, C: TrackerCustomizer<T>> ServiceTracker<T, C> {
	pub fn new(registry: Arc<ServiceRegistry>, criterion: TrackerCriterion, customizer: C) -> Self {
		ServiceTracker {
			owner: registry.new_owner(),
			discriminator: NEXT_DISCRIMINATOR.fetch_add(1, Ordering::Relaxed),
			filter: criterion.to_filter(),
			customizer: Arc::new(customizer),
			registry,
			tracked: Mutex::new(None),
			cached_best: Mutex::new(None),
		}
	}

	/// Stops tracking and untracks everything still held, invoking
	/// `removed` for each pair. A closed tracker is a no-op to close again.
	pub fn close(&self) {
		let tracked = { self.tracked.lock().take() };
		let Some(tracked) = tracked else {
			return;
		};
		// Unsubscribe first so no new events race the shutdown.
		self.registry
			.remove_listener(self.owner, self.discriminator);
		tracked.close();
		tracing::debug!(filter = %self.filter, "tracker closed");
	}

	/// The highest-ranked (then lowest-id) tracked reference.
	pub fn get_service_reference(&self) -> Option<ServiceRef> {
		let tracked = { self.tracked.lock().clone() }?;
		let count = tracked.tracking_count();
		{
			let cache = self.cached_best.lock();
			if let Some((stamp, best)) = &*cache {
				if *stamp == count {
					return *best;
				}
			}
		}

		let best = tracked
			.snapshot()
			.into_iter()
			.map(|(reference, _)| reference)
			.min_by_key(|reference| {
				let ranking = self.registry.ranking_of(*reference).unwrap_or(0);
				(Reverse(ranking), reference.id())
			});
		*self.cached_best.lock() = Some((count, best));
		best
	}

	/// The tracked object for the best reference.
	pub fn get_service(&self) -> Option<Arc<T>> {
		let reference = self.get_service_reference()?;
		let tracked = { self.tracked.lock().clone() }?;
		tracked.get(reference)
	}

	/// Blocks until a service is tracked, for at most `timeout`.
	/// `Duration::ZERO` polls without blocking. Closing the tracker wakes
	/// the wait.
	pub fn wait_for_service(&self, timeout: Duration) -> Option<Arc<T>> {
		let deadline = Instant::now() + timeout;
		loop {
			if let Some(service) = self.get_service() {
				return Some(service);
			}
			if timeout.is_zero() {
				return None;
			}
			let tracked = { self.tracked.lock().clone() }?;
			if !tracked.wait_until(deadline) {
				return self.get_service();
			}
		}
	}

	/// Stops tracking one reference, as if it had stopped matching.
	pub fn remove(&self, reference: ServiceRef) {
		let tracked = { self.tracked.lock().clone() };
		if let Some(tracked) = tracked {
			tracked.untrack(reference);
		}
	}

	/// Current `(reference, object)` pairs, unordered.
	pub fn tracked(&self) -> Vec<(ServiceRef, Arc<T>)> {
		self.tracked
			.lock()
			.as_ref()
			.map_or_else(Vec::new, |t| t.snapshot())
	}

	pub fn size(&self) -> usize {
		self.tracked.lock().as_ref().map_or(0, |t| t.size())
	}

	pub fn is_empty(&self) -> bool {
		self.size() == 0
	}

	/// Modification counter: bumped once per add, modify, and remove.
	/// `-1` while the tracker is not open.
	pub fn tracking_count(&self) -> i64 {
		self.tracked
			.lock()
			.as_ref()
			.map_or(-1, |t| t.tracking_count() as i64)
	}
}

impl<T, C> ServiceTracker<T, C>
where
	T: Send + Sync + 'static,
	C: TrackerCustomizer<T> + 'static,
{
	/// Starts tracking: subscribes to registry events, then feeds the
	/// services that already match through the customizer. Opening an open
	/// tracker is a no-op.
	pub fn open(&self) {
		let tracked = {
			let mut slot = self.tracked.lock();
			if slot.is_some() {
				return;
			}
			let tracked = Arc::new(Tracked::new(Arc::clone(&self.customizer)));
			let handle = Arc::clone(&tracked);
			self.registry.add_listener(
				self.owner,
				self.discriminator,
				Some(self.filter.clone()),
				Box::new(move |event| handle.service_changed(event)),
			);
			// Events may already be flowing; the initial queue and the
			// adding ledger reconcile duplicates.
			tracked.set_initial(self.registry.find(None, Some(&self.filter)));
			*slot = Some(Arc::clone(&tracked));
			tracked
		};
		tracing::debug!(filter = %self.filter, "tracker opened");
		tracked.track_initial();
	}
}

impl<T, C: TrackerCustomizer<T>> Drop for ServiceTracker<T, C> {
	fn drop(&mut self) {
		self.close();
	}
}
