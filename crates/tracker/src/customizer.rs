use std::sync::Arc;

use plexus_registry::ServiceRef;

/// Maps tracked service references to tracked objects.
///
/// All three callbacks run outside the tracker's internal lock, so a
/// customizer may call back into the tracker or the registry. `adding` may
/// return `None` to decline tracking; a declined reference never produces a
/// `removed` call.
pub trait TrackerCustomizer<T>: Send + Sync {
	/// A matching service appeared. Returns the object to track, or `None`
	/// to ignore this reference.
	fn adding(&self, reference: ServiceRef) -> Option<Arc<T>>;

	/// A tracked service's properties changed.
	fn modified(&self, reference: ServiceRef, tracked: &Arc<T>) {
		let _ = (reference, tracked);
	}

	/// A tracked service stopped matching or was unregistered. The tracker
	/// has already forgotten the pair when this runs.
	fn removed(&self, reference: ServiceRef, tracked: Arc<T>) {
		let _ = (reference, tracked);
	}
}

/// The default customizer: tracks the reference itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct RefCustomizer;

impl TrackerCustomizer<ServiceRef> for RefCustomizer {
	fn adding(&self, reference: ServiceRef) -> Option<Arc<ServiceRef>> {
		Some(Arc::new(reference))
	}
}
