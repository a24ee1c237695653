use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use plexus_filter::{Filter, PropertyMap, Value};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::RegistryError;
use crate::event::{ServiceEvent, ServiceEventKind, ServiceListener};
use crate::keys::{OBJECTCLASS, SERVICE_ID, SERVICE_RANKING};
use crate::listeners::ListenerBank;
use crate::registration::{OwnerId, Registration, ServiceId, ServiceRef};

/// The in-process service directory.
///
/// Registrations are indexed per interface in ranking-descending,
/// id-ascending order, so `find` is a filtered walk of an already sorted
/// slice and `best_match` is its first hit. Listener dispatch goes through
/// the [`ListenerBank`]; events are always delivered outside the registry
/// lock, so listeners may freely call back in.
pub struct ServiceRegistry {
	inner: Mutex<RegistryInner>,
	listeners: ListenerBank,
	next_owner: AtomicU64,
}

#[derive(Default)]
struct RegistryInner {
	next_id: u64,
	arena: FxHashMap<ServiceId, Arc<Registration>>,
	/// Per-interface indexes, each sorted ranking-desc then id-asc.
	by_class: FxHashMap<String, Vec<Arc<Registration>>>,
	/// Every live registration, same order.
	all: Vec<Arc<Registration>>,
}

impl Default for ServiceRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl ServiceRegistry {
	pub fn new() -> Self {
		ServiceRegistry {
			inner: Mutex::new(RegistryInner::default()),
			listeners: ListenerBank::default(),
			next_owner: AtomicU64::new(0),
		}
	}

	/// Mints a fresh component identity.
	pub fn new_owner(&self) -> OwnerId {
		OwnerId(self.next_owner.fetch_add(1, Ordering::Relaxed))
	}

	/// Publishes a service under one or more interface names.
	///
	/// The registry injects `objectClass` and `service.id`, replacing any
	/// caller-supplied values, and defaults `service.ranking` to `Int(0)`
	/// when absent or not an integer. The REGISTERED event fires after the
	/// service is queryable.
	pub fn register(
		&self,
		owner: OwnerId,
		interfaces: &[&str],
		mut props: PropertyMap,
	) -> Result<ServiceRef, RegistryError> {
		if interfaces.is_empty() {
			return Err(RegistryError::EmptyInterfaces);
		}
		if interfaces.iter().any(|i| i.trim().is_empty()) {
			return Err(RegistryError::EmptyInterfaceName);
		}

		let classes: Arc<[String]> = interfaces.iter().map(|i| i.to_string()).collect();
		let (registration, snapshot) = {
			let mut inner = self.inner.lock();
			let id = ServiceId(inner.next_id);
			inner.next_id += 1;

			props.insert(OBJECTCLASS, Value::StrList(classes.to_vec()));
			props.insert(SERVICE_ID, Value::Int(id.0 as i64));
			let ranking = coerce_ranking(&mut props);

			let snapshot = Arc::new(props);
			let registration = Arc::new(Registration {
				id,
				owner,
				classes,
				props: ArcSwap::new(Arc::clone(&snapshot)),
				ranking: AtomicI64::new(ranking),
				unregistering: AtomicBool::new(false),
			});

			inner.arena.insert(id, Arc::clone(&registration));
			for class in registration.classes.iter() {
				let index = inner.by_class.entry(class.clone()).or_default();
				insert_sorted(index, &registration);
			}
			let all = &mut inner.all;
			insert_sorted(all, &registration);
			(registration, snapshot)
		};

		tracing::debug!(
			service = %registration.reference(),
			classes = ?registration.classes,
			"service registered"
		);
		self.fire(ServiceEventKind::Registered, registration.reference(), snapshot);
		Ok(registration.reference())
	}

	/// Replaces a service's properties.
	///
	/// Listeners that match the new properties receive MODIFIED; listeners
	/// that matched the old properties but not the new ones receive
	/// MODIFIED_ENDMATCH with the old snapshot. No listener receives more
	/// than one event.
	pub fn set_properties(
		&self,
		reference: ServiceRef,
		mut props: PropertyMap,
	) -> Result<(), RegistryError> {
		let (before, matching, old, new) = {
			let mut inner = self.inner.lock();
			let registration = inner
				.arena
				.get(&reference.id())
				.filter(|r| !r.unregistering.load(Ordering::Acquire))
				.cloned()
				.ok_or(RegistryError::NotFound(reference.id()))?;

			let old = registration.props.load_full();
			let before = self.listeners.candidates_for(&old);

			props.insert(
				OBJECTCLASS,
				Value::StrList(registration.classes.to_vec()),
			);
			props.insert(SERVICE_ID, Value::Int(registration.id.0 as i64));
			let ranking = coerce_ranking(&mut props);

			let new = Arc::new(props);
			registration.props.store(Arc::clone(&new));
			if registration.ranking.swap(ranking, Ordering::AcqRel) != ranking {
				for class in registration.classes.iter() {
					if let Some(index) = inner.by_class.get_mut(class) {
						sort_index(index);
					}
				}
				sort_index(&mut inner.all);
			}

			let matching = self.listeners.candidates_for(&new);
			(before, matching, old, new)
		};

		let modified = ServiceEvent {
			kind: ServiceEventKind::Modified,
			reference,
			properties: new,
		};
		self.listeners.deliver(&modified, &matching);

		let matched: FxHashSet<usize> = matching.iter().map(|e| Arc::as_ptr(e) as usize).collect();
		let endmatch: Vec<_> = before
			.into_iter()
			.filter(|e| !matched.contains(&(Arc::as_ptr(e) as usize)))
			.collect();
		if !endmatch.is_empty() {
			let event = ServiceEvent {
				kind: ServiceEventKind::ModifiedEndmatch,
				reference,
				properties: old,
			};
			self.listeners.deliver(&event, &endmatch);
		}
		Ok(())
	}

	/// Withdraws a service. Idempotent; a stale reference is a no-op.
	///
	/// UNREGISTERING is delivered while the service can still be looked up;
	/// only afterwards is it removed from the indexes.
	pub fn unregister(&self, reference: ServiceRef) {
		let registration = {
			let inner = self.inner.lock();
			match inner.arena.get(&reference.id()) {
				Some(r) => Arc::clone(r),
				None => return,
			}
		};
		if registration.unregistering.swap(true, Ordering::AcqRel) {
			return;
		}

		let snapshot = registration.props.load_full();
		self.fire(ServiceEventKind::Unregistering, reference, snapshot);

		let mut inner = self.inner.lock();
		inner.arena.remove(&reference.id());
		for class in registration.classes.iter() {
			let emptied = match inner.by_class.get_mut(class) {
				Some(index) => {
					index.retain(|r| r.id != reference.id());
					index.is_empty()
				}
				None => false,
			};
			if emptied {
				inner.by_class.remove(class);
			}
		}
		inner.all.retain(|r| r.id != reference.id());
		drop(inner);

		tracing::debug!(service = %reference, "service unregistered");
	}

	/// Looks up services by interface and/or filter, ranking-desc id-asc.
	///
	/// With no interface, a filter that pins `objectClass` to literal values
	/// prunes the walk to those interfaces' indexes.
	pub fn find(&self, interface: Option<&str>, filter: Option<&Filter>) -> Vec<ServiceRef> {
		let inner = self.inner.lock();
		let matches = |r: &Arc<Registration>| {
			filter.is_none_or(|f| f.matches(&r.props.load()))
		};

		match interface {
			Some(interface) => inner
				.by_class
				.get(interface)
				.map(|index| {
					index
						.iter()
						.filter(|r| matches(r))
						.map(|r| r.reference())
						.collect()
				})
				.unwrap_or_default(),
			None => {
				if let Some(classes) = filter.and_then(Filter::matched_object_classes) {
					let mut hits: Vec<&Arc<Registration>> = Vec::new();
					let mut seen: FxHashSet<ServiceId> = FxHashSet::default();
					for class in &classes {
						for r in inner.by_class.get(class).into_iter().flatten() {
							if seen.insert(r.id) && matches(r) {
								hits.push(r);
							}
						}
					}
					hits.sort_unstable_by(|a, b| order_key(a).cmp(&order_key(b)));
					hits.iter().map(|r| r.reference()).collect()
				} else {
					inner
						.all
						.iter()
						.filter(|r| matches(r))
						.map(|r| r.reference())
						.collect()
				}
			}
		}
	}

	/// The highest-ranked (then lowest-id) service matching the query.
	/// Stops at the first hit instead of materializing the `find` list.
	pub fn best_match(&self, interface: Option<&str>, filter: Option<&Filter>) -> Option<ServiceRef> {
		let inner = self.inner.lock();
		let matches = |r: &Arc<Registration>| {
			filter.is_none_or(|f| f.matches(&r.props.load()))
		};

		match interface {
			Some(interface) => inner
				.by_class
				.get(interface)
				.and_then(|index| index.iter().find(|r| matches(r)))
				.map(|r| r.reference()),
			None => {
				if let Some(classes) = filter.and_then(Filter::matched_object_classes) {
					// First hit per pinned index, best across them.
					let mut best: Option<&Arc<Registration>> = None;
					for class in &classes {
						let Some(hit) = inner
							.by_class
							.get(class)
							.and_then(|index| index.iter().find(|r| matches(r)))
						else {
							continue;
						};
						if best.is_none_or(|b| order_key(hit) < order_key(b)) {
							best = Some(hit);
						}
					}
					best.map(|r| r.reference())
				} else {
					inner.all.iter().find(|r| matches(r)).map(|r| r.reference())
				}
			}
		}
	}

	/// The current property snapshot, or `None` for a stale reference.
	pub fn properties(&self, reference: ServiceRef) -> Option<Arc<PropertyMap>> {
		let inner = self.inner.lock();
		inner
			.arena
			.get(&reference.id())
			.map(|r| r.props.load_full())
	}

	pub fn ranking_of(&self, reference: ServiceRef) -> Option<i64> {
		let inner = self.inner.lock();
		inner
			.arena
			.get(&reference.id())
			.map(|r| r.ranking.load(Ordering::Acquire))
	}

	pub fn object_classes_of(&self, reference: ServiceRef) -> Option<Arc<[String]>> {
		let inner = self.inner.lock();
		inner
			.arena
			.get(&reference.id())
			.map(|r| Arc::clone(&r.classes))
	}

	/// Every live registration the owner published, id-ascending.
	pub fn registrations_of(&self, owner: OwnerId) -> Vec<ServiceRef> {
		let inner = self.inner.lock();
		let mut refs: Vec<ServiceRef> = inner
			.arena
			.values()
			.filter(|r| r.owner == owner)
			.map(|r| r.reference())
			.collect();
		refs.sort_unstable();
		refs
	}

	/// Withdraws everything the owner published.
	pub fn unregister_all(&self, owner: OwnerId) {
		for reference in self.registrations_of(owner) {
			self.unregister(reference);
		}
	}

	/// Registers a service listener under `(owner, discriminator)`. Adding
	/// under an existing identity replaces the previous listener. `None`
	/// for the filter means every event is delivered.
	pub fn add_listener(
		&self,
		owner: OwnerId,
		discriminator: u64,
		filter: Option<Filter>,
		callback: ServiceListener,
	) {
		self.listeners.add(owner, discriminator, filter, callback);
	}

	/// Removes a listener. Returns whether one was registered.
	pub fn remove_listener(&self, owner: OwnerId, discriminator: u64) -> bool {
		self.listeners.remove(owner, discriminator)
	}

	/// Removes every listener the owner registered.
	pub fn remove_all_listeners(&self, owner: OwnerId) {
		self.listeners.remove_all(owner);
	}

	fn fire(&self, kind: ServiceEventKind, reference: ServiceRef, properties: Arc<PropertyMap>) {
		let candidates = self.listeners.candidates_for(&properties);
		let event = ServiceEvent {
			kind,
			reference,
			properties,
		};
		self.listeners.deliver(&event, &candidates);
	}
}

/// Ranking from the property map, replacing a missing or non-integer value
/// with `Int(0)`.
fn coerce_ranking(props: &mut PropertyMap) -> i64 {
	match props.get(SERVICE_RANKING).and_then(Value::as_int) {
		Some(ranking) => ranking,
		None => {
			props.insert(SERVICE_RANKING, Value::Int(0));
			0
		}
	}
}

/// Sort key: ranking descending, then id ascending.
fn order_key(r: &Registration) -> (std::cmp::Reverse<i64>, u64) {
	(std::cmp::Reverse(r.ranking.load(Ordering::Acquire)), r.id.0)
}

fn insert_sorted(index: &mut Vec<Arc<Registration>>, registration: &Arc<Registration>) {
	let key = order_key(registration);
	let at = index.partition_point(|r| order_key(r) <= key);
	index.insert(at, Arc::clone(registration));
}

fn sort_index(index: &mut [Arc<Registration>]) {
	index.sort_by_key(|r| order_key(r));
}
