use std::sync::Arc;

use plexus_filter::PropertyMap;

use crate::registration::ServiceRef;

/// Lifecycle phase a [`ServiceEvent`] reports.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ServiceEventKind {
	/// The service became queryable.
	Registered,
	/// Properties changed and the listener's filter still matches.
	Modified,
	/// Properties changed and the listener's filter matched the old
	/// properties but not the new ones. Carries the old snapshot.
	ModifiedEndmatch,
	/// The service is about to be removed; it is still queryable while this
	/// event is delivered.
	Unregistering,
}

/// A service lifecycle notification with the property snapshot the event was
/// computed against.
#[derive(Clone, Debug)]
pub struct ServiceEvent {
	pub kind: ServiceEventKind,
	pub reference: ServiceRef,
	pub properties: Arc<PropertyMap>,
}

/// Callback invoked for matching service events. Panics are caught at the
/// dispatch boundary and logged; they never reach the publisher.
pub type ServiceListener = Box<dyn Fn(&ServiceEvent) + Send + Sync>;
