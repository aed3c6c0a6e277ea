//! Error types for the debug bridge.

use devbridge_protocol::SessionKey;
use thiserror::Error;

/// Result type alias for debug bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
	/// Bad options or an unsupported host/platform/connection combination.
	Validation,
	/// Device or app not reachable in the required state.
	Connectivity,
	/// A bounded wait the operation cannot proceed without ran out.
	Timeout,
	/// Malformed frames or a broken session socket.
	Protocol,
	Internal,
}

/// Errors raised by the debug bridge.
///
/// Timeouts that only degrade an operation are logged, never returned.
#[derive(Debug, Error)]
pub enum Error {
	#[error("{0}")]
	Validation(String),

	#[error("{message} (device {device}, app {app})")]
	Connectivity {
		device: String,
		app: String,
		message: String,
	},

	#[error("Debug session {key} failed: {message}")]
	Protocol { key: SessionKey, message: String },

	#[error("Timed out after {ms}ms waiting for {condition}")]
	Timeout { ms: u64, condition: String },

	#[error(transparent)]
	Runtime(#[from] devbridge_runtime::Error),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	pub(crate) fn connectivity(key: &SessionKey, message: impl Into<String>) -> Self {
		Error::Connectivity {
			device: key.device_id.clone(),
			app: key.app_id.clone(),
			message: message.into(),
		}
	}

	pub fn category(&self) -> ErrorCategory {
		match self {
			Error::Validation(_) => ErrorCategory::Validation,
			Error::Connectivity { .. } => ErrorCategory::Connectivity,
			Error::Protocol { .. } => ErrorCategory::Protocol,
			Error::Timeout { .. } => ErrorCategory::Timeout,
			Error::Runtime(inner) => match inner {
				devbridge_runtime::Error::DeviceUnavailable(_) => ErrorCategory::Connectivity,
				devbridge_runtime::Error::ToolNotFound { .. } | devbridge_runtime::Error::Unsupported { .. } => {
					ErrorCategory::Validation
				}
				other if other.is_protocol() => ErrorCategory::Protocol,
				_ => ErrorCategory::Internal,
			},
			Error::Io(_) | Error::Json(_) => ErrorCategory::Internal,
		}
	}
}
