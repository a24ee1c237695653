use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64};

use arc_swap::ArcSwap;
use plexus_filter::PropertyMap;

/// A registry-assigned, strictly increasing service identity.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ServiceId(pub(crate) u64);

impl ServiceId {
	pub fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for ServiceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// Identity of a publishing or listening component. Handed out by
/// [`ServiceRegistry::new_owner`](crate::ServiceRegistry::new_owner) and used
/// for bulk cleanup.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OwnerId(pub(crate) u64);

/// A handle to a registered service.
///
/// The handle is just the id; every property access goes back through the
/// registry, so a reference held across an unregistration simply stops
/// resolving instead of pinning stale state alive.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ServiceRef {
	id: ServiceId,
}

impl ServiceRef {
	pub(crate) fn new(id: ServiceId) -> Self {
		ServiceRef { id }
	}

	pub fn id(&self) -> ServiceId {
		self.id
	}
}

impl fmt::Display for ServiceRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "service#{}", self.id)
	}
}

/// Registry-internal state of one registration.
pub(crate) struct Registration {
	pub(crate) id: ServiceId,
	pub(crate) owner: OwnerId,
	pub(crate) classes: std::sync::Arc<[String]>,
	/// Property snapshot, replaced wholesale on `set_properties`.
	pub(crate) props: ArcSwap<PropertyMap>,
	/// Ranking copy used by the sorted indexes; kept in sync with `props`
	/// under the registry lock.
	pub(crate) ranking: AtomicI64,
	pub(crate) unregistering: AtomicBool,
}

impl Registration {
	pub(crate) fn reference(&self) -> ServiceRef {
		ServiceRef::new(self.id)
	}
}
