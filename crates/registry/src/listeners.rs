use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use plexus_filter::{Filter, LocalCache, PropertyMap, Value};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::event::{ServiceEvent, ServiceListener};
use crate::keys::{HASHED_KEYS, OBJECTCLASS, OBJECTCLASS_IX, SERVICE_ID, SERVICE_ID_IX};
use crate::registration::OwnerId;

/// One registered listener.
pub(crate) struct ListenerEntry {
	owner: OwnerId,
	discriminator: u64,
	/// Global insertion order; delivery order follows it.
	token: u64,
	filter: Option<Filter>,
	/// Bucket form of a simple filter; `None` puts the entry on the
	/// complicated list.
	cache: Option<LocalCache>,
	callback: ServiceListener,
	removed: AtomicBool,
}

/// The listener dispatch cache.
///
/// Listeners with simple filters live in per-key hash buckets and are found
/// by lookup; everything else sits on a linear list and is re-evaluated per
/// event. The two paths together are observationally equivalent to
/// evaluating every filter against every event.
#[derive(Default)]
pub(crate) struct ListenerBank {
	inner: Mutex<BankInner>,
}

#[derive(Default)]
struct BankInner {
	next_token: u64,
	entries: FxHashMap<(OwnerId, u64), Arc<ListenerEntry>>,
	complicated: Vec<Arc<ListenerEntry>>,
	buckets: [FxHashMap<String, Vec<Arc<ListenerEntry>>>; HASHED_KEYS.len()],
}

impl ListenerBank {
	/// Registers a listener under `(owner, discriminator)`, replacing any
	/// listener previously registered under the same pair.
	pub(crate) fn add(
		&self,
		owner: OwnerId,
		discriminator: u64,
		filter: Option<Filter>,
		callback: ServiceListener,
	) {
		let cache = filter.as_ref().and_then(|f| {
			let mut cache = f.simple_cache(&HASHED_KEYS)?;
			canonicalize_ids(&mut cache);
			Some(cache)
		});

		let mut inner = self.inner.lock();
		inner.remove_locked(owner, discriminator);

		let token = inner.next_token;
		inner.next_token += 1;
		let entry = Arc::new(ListenerEntry {
			owner,
			discriminator,
			token,
			filter,
			cache,
			callback,
			removed: AtomicBool::new(false),
		});

		match &entry.cache {
			None => inner.complicated.push(Arc::clone(&entry)),
			Some(cache) => {
				for ix in cache.constrained_keys() {
					for value in cache.values(ix) {
						inner.buckets[ix]
							.entry(value.clone())
							.or_default()
							.push(Arc::clone(&entry));
					}
				}
			}
		}
		inner.entries.insert((owner, discriminator), entry);
	}

	/// Removes the listener registered under `(owner, discriminator)`.
	/// Returns whether one was present.
	pub(crate) fn remove(&self, owner: OwnerId, discriminator: u64) -> bool {
		self.inner.lock().remove_locked(owner, discriminator)
	}

	/// Removes every listener the owner registered.
	pub(crate) fn remove_all(&self, owner: OwnerId) {
		let mut inner = self.inner.lock();
		let discriminators: Vec<u64> = inner
			.entries
			.keys()
			.filter(|(o, _)| *o == owner)
			.map(|(_, d)| *d)
			.collect();
		for discriminator in discriminators {
			inner.remove_locked(owner, discriminator);
		}
	}

	/// Collects the listeners whose filters accept `props`, in listener
	/// registration order.
	pub(crate) fn candidates_for(&self, props: &PropertyMap) -> Vec<Arc<ListenerEntry>> {
		let classes = object_class_values(props);
		let id = props.get(SERVICE_ID).and_then(Value::as_int);
		let id_text = id.map(|i| i.to_string());

		let inner = self.inner.lock();
		let mut out: Vec<Arc<ListenerEntry>> = Vec::new();
		let mut seen: FxHashSet<u64> = FxHashSet::default();

		for entry in &inner.complicated {
			if entry.removed.load(Ordering::Acquire) {
				continue;
			}
			if entry.filter.as_ref().is_none_or(|f| f.matches(props)) {
				seen.insert(entry.token);
				out.push(Arc::clone(entry));
			}
		}

		let mut bucket_scan = |ix: usize, value: &str| {
			let Some(bucket) = inner.buckets[ix].get(value) else {
				return;
			};
			for entry in bucket {
				if entry.removed.load(Ordering::Acquire) || seen.contains(&entry.token) {
					continue;
				}
				let cache = entry.cache.as_ref().expect("bucketed entries are simple");
				if cache.is_conjunctive()
					&& !conjunctive_hit(cache, &classes, id_text.as_deref())
				{
					continue;
				}
				seen.insert(entry.token);
				out.push(Arc::clone(entry));
			}
		};

		for class in &classes {
			bucket_scan(OBJECTCLASS_IX, class);
		}
		if let Some(id_text) = &id_text {
			bucket_scan(SERVICE_ID_IX, id_text);
		}

		out.sort_unstable_by_key(|e| e.token);
		out
	}

	/// Invokes each candidate's callback, isolating panics so one failing
	/// listener cannot starve the rest or unwind into the publisher.
	pub(crate) fn deliver(&self, event: &ServiceEvent, candidates: &[Arc<ListenerEntry>]) {
		for entry in candidates {
			if entry.removed.load(Ordering::Acquire) {
				continue;
			}
			let outcome = catch_unwind(AssertUnwindSafe(|| (entry.callback)(event)));
			if outcome.is_err() {
				tracing::warn!(
					owner = entry.owner.0,
					discriminator = entry.discriminator,
					kind = ?event.kind,
					service = %event.reference,
					"service listener panicked; continuing dispatch"
				);
			}
		}
	}
}

impl BankInner {
	fn remove_locked(&mut self, owner: OwnerId, discriminator: u64) -> bool {
		let Some(entry) = self.entries.remove(&(owner, discriminator)) else {
			return false;
		};
		entry.removed.store(true, Ordering::Release);
		match &entry.cache {
			None => self.complicated.retain(|e| e.token != entry.token),
			Some(cache) => {
				for ix in cache.constrained_keys() {
					for value in cache.values(ix) {
						let emptied = match self.buckets[ix].get_mut(value) {
							Some(bucket) => {
								bucket.retain(|e| e.token != entry.token);
								bucket.is_empty()
							}
							None => false,
						};
						if emptied {
							self.buckets[ix].remove(value);
						}
					}
				}
			}
		}
		true
	}
}

/// Rewrites cached `service.id` literals through `i64` so `007` and `7`
/// share a bucket. Unparseable literals are left alone; they can never match
/// a real id, and no event ever looks their bucket up.
fn canonicalize_ids(cache: &mut LocalCache) {
	for value in cache.values_mut(SERVICE_ID_IX) {
		if let Ok(id) = value.parse::<i64>() {
			*value = id.to_string();
		}
	}
}

fn object_class_values(props: &PropertyMap) -> Vec<String> {
	match props.get(OBJECTCLASS) {
		Some(Value::StrList(classes)) => classes.clone(),
		Some(Value::Str(class)) => vec![class.clone()],
		_ => Vec::new(),
	}
}

/// A conjunctive entry matches only when every key it constrains is hit by
/// the event.
fn conjunctive_hit(cache: &LocalCache, classes: &[String], id_text: Option<&str>) -> bool {
	cache.constrained_keys().all(|ix| {
		let values = cache.values(ix);
		match ix {
			OBJECTCLASS_IX => classes.iter().any(|c| values.iter().any(|v| v == c)),
			SERVICE_ID_IX => id_text.is_some_and(|id| values.iter().any(|v| v == id)),
			_ => false,
		}
	})
}
