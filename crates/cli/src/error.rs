use std::path::PathBuf;

use devbridge::ErrorCategory;
use thiserror::Error;

use crate::output::{CommandError, ErrorCode};

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("{0}")]
	Validation(String),

	#[error("invalid configuration in {path}: {message}")]
	Config { path: PathBuf, message: String },

	#[error("cleanup daemon: {0}")]
	Daemon(String),

	#[error(transparent)]
	Debug(#[from] devbridge::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl From<devbridge_runtime::Error> for CliError {
	fn from(err: devbridge_runtime::Error) -> Self {
		CliError::Debug(err.into())
	}
}

impl CliError {
	pub fn code(&self) -> ErrorCode {
		match self {
			CliError::Validation(_) | CliError::Config { .. } => ErrorCode::ValidationError,
			CliError::Daemon(_) => ErrorCode::DaemonError,
			CliError::Debug(err) => match err.category() {
				ErrorCategory::Validation => ErrorCode::ValidationError,
				ErrorCategory::Connectivity => ErrorCode::ConnectivityError,
				ErrorCategory::Timeout => ErrorCode::Timeout,
				ErrorCategory::Protocol => ErrorCode::ProtocolError,
				ErrorCategory::Internal => ErrorCode::InternalError,
			},
			CliError::Io(_) => ErrorCode::IoError,
			CliError::Json(_) | CliError::Anyhow(_) => ErrorCode::InternalError,
		}
	}

	/// Convert this error to a CommandError for structured output
	pub fn to_command_error(&self) -> CommandError {
		CommandError {
			code: self.code(),
			message: self.to_string(),
			details: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn categories_map_to_codes() {
		let validation = CliError::from(devbridge::Error::Validation("--debug-brk and --start cannot be used together".into()));
		assert_eq!(validation.code(), ErrorCode::ValidationError);

		let timeout = CliError::from(devbridge::Error::Timeout {
			ms: 60_000,
			condition: "org.demo to launch".into(),
		});
		assert_eq!(timeout.code(), ErrorCode::Timeout);

		let missing_tool = CliError::from(devbridge_runtime::Error::ToolNotFound { program: "adb".into() });
		assert_eq!(missing_tool.code(), ErrorCode::ValidationError);

		let offline = CliError::from(devbridge_runtime::Error::DeviceUnavailable("emu".into()));
		assert_eq!(offline.code(), ErrorCode::ConnectivityError);
	}

	#[test]
	fn command_error_carries_message() {
		let err = CliError::Daemon("socket refused connection".into());
		let cmd = err.to_command_error();
		assert_eq!(cmd.code, ErrorCode::DaemonError);
		assert_eq!(cmd.message, "cleanup daemon: socket refused connection");
	}
}
