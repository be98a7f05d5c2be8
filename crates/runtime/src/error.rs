//! Error types for the uia runtime.

use std::time::Duration;

use thiserror::Error;
use uia_protocol::StatusKind;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the device helper.
#[derive(Debug, Error)]
pub enum Error {
	/// The helper process never reached the online state.
	#[error("Failed to launch helper process: {0}")]
	LaunchFailed(String),

	/// The forwarded socket could not be opened.
	#[error("Failed to connect to helper socket: {0}")]
	ConnectionFailed(String),

	/// No response bytes arrived within the idle window.
	#[error("Helper socket stopped responding after {}ms. The recent response was '{partial}'", idle.as_millis())]
	TransportTimeout { idle: Duration, partial: String },

	/// The socket failed after it was connected.
	#[error("Helper socket crashed: {0}")]
	TransportCrashed(String),

	/// The helper answered with a nonzero status.
	#[error("{kind}: {message}")]
	Remote { kind: StatusKind, message: String },

	/// The helper or the active engine exited without being asked to.
	#[error("Unexpected shutdown: {0}")]
	UnexpectedShutdown(String),

	/// The session was torn down after an unexpected shutdown.
	#[error("Session terminated: {0}")]
	SessionTerminated(String),

	/// The requested context is not among the available contexts.
	#[error("No such context found: {0}")]
	NoSuchContext(String),

	/// A proxy transition was requested while a proxy slot is occupied.
	#[error("Proxy already active for context '{0}'")]
	ProxyAlreadyActive(String),

	/// The lock screen could not be dismissed.
	#[error("Unlock failed: {0}")]
	UnlockFailed(String),

	/// A device shell/adb command failed.
	#[error("Device command failed: {0}")]
	Device(String),

	/// The downstream web engine failed.
	#[error("Engine error: {0}")]
	Engine(String),

	/// Invalid argument provided to an operation.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// The operation is not valid in the current lifecycle state.
	#[error("Invalid state: {0}")]
	InvalidState(String),

	/// Timeout waiting for a bounded operation.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns the helper status kind if this is a remote error.
	pub fn status_kind(&self) -> Option<StatusKind> {
		match self {
			Error::Remote { kind, .. } => Some(*kind),
			_ => None,
		}
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		match self {
			Error::TransportTimeout { .. } | Error::Timeout(_) => true,
			Error::Remote { kind, .. } => matches!(kind, StatusKind::Timeout | StatusKind::ScriptTimeout),
			_ => false,
		}
	}

	/// Returns true for errors that end the whole session.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			Error::UnexpectedShutdown(_) | Error::SessionTerminated(_) | Error::TransportCrashed(_)
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn remote_errors_expose_status_kind() {
		let err = Error::Remote {
			kind: StatusKind::NoSuchElement,
			message: "not found".into(),
		};
		assert_eq!(err.status_kind(), Some(StatusKind::NoSuchElement));
		assert_eq!(err.to_string(), "NoSuchElement: not found");
		assert!(!err.is_fatal());
	}

	#[test]
	fn transport_timeout_is_timeout() {
		let err = Error::TransportTimeout {
			idle: Duration::from_millis(1500),
			partial: "{\"status\"".into(),
		};
		assert!(err.is_timeout());
		assert!(err.to_string().contains("1500ms"));
	}
}
