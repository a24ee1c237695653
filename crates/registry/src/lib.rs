//! A dynamic in-process service directory.
//!
//! Components publish values under interface names with arbitrary typed
//! properties, look each other up by interface and/or
//! [`Filter`](plexus_filter::Filter), and observe lifecycle changes through
//! filtered listeners. The registry owns three reserved property keys
//! ([`keys::OBJECTCLASS`], [`keys::SERVICE_ID`], [`keys::SERVICE_RANKING`])
//! and keeps lookups deterministic: ranking descending, then service id
//! ascending.
//!
//! Listener dispatch avoids evaluating every filter on every event. Filters
//! that reduce to equality tests on `objectClass`/`service.id` are indexed in
//! hash buckets; everything else is re-evaluated per event. See
//! [`ServiceRegistry::add_listener`].

pub mod keys;

mod error;
mod event;
mod listeners;
mod registration;
mod registry;

pub use error::RegistryError;
pub use event::{ServiceEvent, ServiceEventKind, ServiceListener};
pub use registration::{OwnerId, ServiceId, ServiceRef};
pub use registry::ServiceRegistry;

pub use plexus_filter::{Filter, ParseError, PropertyMap, Value};
