use thiserror::Error;

use crate::registration::ServiceId;

/// Errors from registry operations. Every failing operation leaves the
/// registry unchanged.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum RegistryError {
	#[error("a service must be registered under at least one interface")]
	EmptyInterfaces,

	#[error("interface names must not be empty")]
	EmptyInterfaceName,

	#[error("service {0} is not registered")]
	NotFound(ServiceId),
}
