//! Reserved property keys injected by the registry.

/// The interface names a service is published under, always a
/// [`Value::StrList`](plexus_filter::Value::StrList).
pub const OBJECTCLASS: &str = "objectClass";

/// The registry-assigned service id, always a
/// [`Value::Int`](plexus_filter::Value::Int).
pub const SERVICE_ID: &str = "service.id";

/// The publisher-supplied ranking, defaulted to `Int(0)`.
pub const SERVICE_RANKING: &str = "service.ranking";

/// Keys the listener dispatch cache indexes on. Order fixes the key index
/// used throughout the cache.
pub(crate) const HASHED_KEYS: [&str; 2] = [OBJECTCLASS, SERVICE_ID];

pub(crate) const OBJECTCLASS_IX: usize = 0;
pub(crate) const SERVICE_ID_IX: usize = 1;
