//! Error types for the backup coordination core

use std::error::Error;
use std::fmt;
use std::io;

use crate::config::ConfigError;
use crate::plugin::PluginError;
use crate::security::SecurityError;
use crate::shm_ring::ShmRingError;

/// Helper function to reduce Box::new() boilerplate when wrapping errors
///
/// This function is useful for reducing verbosity when manually wrapping error types
/// into `Box<dyn Error + Send + Sync>` for error variant fields.
#[inline]
pub fn boxed_error<E: Error + Send + Sync + 'static>(e: E) -> Box<dyn Error + Send + Sync> {
	Box::new(e)
}

/// Unified error type for the backup coordination core
///
/// Every fallible core operation returns `Result<T, CoreError>`. Diagnostics
/// meant for the server (§4.1 of the spec) are a separate channel (`Message`);
/// `CoreError` is strictly the Rust-level propagation of "this call failed".
#[derive(Debug)]
pub enum CoreError {
	/// I/O error
	Io(io::Error),

	/// Protocol violation on the request stream (§7 taxonomy 5): malformed
	/// request line, invalid OPTIONS syntax, duplicate OPTIONS header.
	ProtocolViolation { message: String },

	/// Configuration error (nested)
	Config(ConfigError),

	/// Plugin orchestration error (nested)
	Plugin(PluginError),

	/// Security-file policy error (nested)
	Security(SecurityError),

	/// Shared-memory ring error (nested)
	ShmRing(ShmRingError),

	/// Privileged-bind broker error (nested)
	BindBroker(BindBrokerError),

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for CoreError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CoreError::Io(e) => write!(f, "I/O error: {}", e),
			CoreError::ProtocolViolation { message } => {
				write!(f, "protocol violation: {}", message)
			}
			CoreError::Config(e) => write!(f, "configuration error: {}", e),
			CoreError::Plugin(e) => write!(f, "plugin error: {}", e),
			CoreError::Security(e) => write!(f, "security policy error: {}", e),
			CoreError::ShmRing(e) => write!(f, "shared-memory ring error: {}", e),
			CoreError::BindBroker(e) => write!(f, "bind broker error: {}", e),
			CoreError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for CoreError {}

impl From<io::Error> for CoreError {
	fn from(e: io::Error) -> Self {
		CoreError::Io(e)
	}
}

impl From<String> for CoreError {
	fn from(e: String) -> Self {
		CoreError::Other { message: e }
	}
}

impl From<ConfigError> for CoreError {
	fn from(e: ConfigError) -> Self {
		CoreError::Config(e)
	}
}

impl From<PluginError> for CoreError {
	fn from(e: PluginError) -> Self {
		CoreError::Plugin(e)
	}
}

impl From<SecurityError> for CoreError {
	fn from(e: SecurityError) -> Self {
		CoreError::Security(e)
	}
}

impl From<ShmRingError> for CoreError {
	fn from(e: ShmRingError) -> Self {
		CoreError::ShmRing(e)
	}
}

impl From<BindBrokerError> for CoreError {
	fn from(e: BindBrokerError) -> Self {
		CoreError::BindBroker(e)
	}
}

/// Privileged-bind broker errors (component B)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindBrokerError {
	/// Helper process could not be spawned
	SpawnFailed { message: String },

	/// Helper rejected the request per security-file port policy
	PortNotAllowed { port: u16 },

	/// `bind(2)` failed with `EADDRINUSE`; caller should retry another port
	AddrInUse,

	/// `bind(2)` failed with some other error; do not retry
	BindFailed { message: String },

	/// Neither side produced a result within the 5-second timeout
	Timeout,

	/// The helper's control channel closed unexpectedly
	Disconnected,

	/// Port range exhausted without success
	RangeExhausted,
}

impl fmt::Display for BindBrokerError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BindBrokerError::SpawnFailed { message } => {
				write!(f, "failed to spawn ambind helper: {}", message)
			}
			BindBrokerError::PortNotAllowed { port } => {
				write!(f, "port {} is outside the allowed range", port)
			}
			BindBrokerError::AddrInUse => write!(f, "address already in use"),
			BindBrokerError::BindFailed { message } => write!(f, "bind failed: {}", message),
			BindBrokerError::Timeout => write!(f, "timed out waiting for helper"),
			BindBrokerError::Disconnected => write!(f, "helper control channel disconnected"),
			BindBrokerError::RangeExhausted => write!(f, "port range exhausted"),
		}
	}
}

impl Error for BindBrokerError {}

// vim: ts=4
