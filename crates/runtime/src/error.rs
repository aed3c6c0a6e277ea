//! Error types for device and transport operations.

use devbridge_protocol::{FrameError, Platform};
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while talking to devices or the host.
#[derive(Debug, Error)]
pub enum Error {
	/// A required host tool is not installed.
	#[error("{program} not found. Install it or point devbridge at it in the config file.")]
	ToolNotFound { program: String },

	/// A host or device command exited unsuccessfully.
	#[error("`{command}` failed (exit {}): {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()))]
	CommandFailed {
		command: String,
		code: Option<i32>,
		stderr: String,
	},

	/// The device is not reachable.
	#[error("Device {0} is not connected")]
	DeviceUnavailable(String),

	/// The operation has no implementation on this platform.
	#[error("{operation} is not supported on {platform}")]
	Unsupported {
		platform: Platform,
		operation: &'static str,
	},

	/// Notification proxy failure.
	#[error("Notification error: {0}")]
	Notification(String),

	/// Malformed device frame.
	#[error("Frame error: {0}")]
	Frame(#[from] FrameError),

	/// The peer closed the stream in the middle of a frame.
	#[error("Connection closed with {buffered} bytes of an incomplete frame")]
	TruncatedFrame { buffered: usize },

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl Error {
	/// Returns `true` when the error came from a malformed or truncated frame.
	pub fn is_protocol(&self) -> bool {
		matches!(self, Error::Frame(_) | Error::TruncatedFrame { .. })
	}

	/// Returns the captured stderr for a failed command.
	pub fn stderr(&self) -> Option<&str> {
		match self {
			Error::CommandFailed { stderr, .. } => Some(stderr),
			_ => None,
		}
	}
}
