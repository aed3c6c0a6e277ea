//! Crash-safe cleanup registration.
//!
//! Every forward the tunnel manager creates is paired with an idempotent
//! removal command handed to a [`CleanupRegistry`]. The registry is expected
//! to run pending commands even if this process dies without tearing down.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A host command that undoes one OS resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupCommand {
	pub device_id: String,
	pub program: String,
	pub args: Vec<String>,
}

impl CleanupCommand {
	pub fn new(device_id: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
		Self {
			device_id: device_id.into(),
			program: program.into(),
			args,
		}
	}
}

impl fmt::Display for CleanupCommand {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.program)?;
		for arg in &self.args {
			if arg.contains(' ') {
				write!(f, " \"{arg}\"")?;
			} else {
				write!(f, " {arg}")?;
			}
		}
		Ok(())
	}
}

/// Registry of commands that must run if this process exits uncleanly.
#[async_trait]
pub trait CleanupRegistry: Send + Sync {
	async fn register(&self, command: &CleanupCommand) -> Result<()>;

	async fn unregister(&self, command: &CleanupCommand) -> Result<()>;
}

/// Registry that drops everything; forwards outlive a crash.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCleanup;

#[async_trait]
impl CleanupRegistry for NoopCleanup {
	async fn register(&self, _command: &CleanupCommand) -> Result<()> {
		Ok(())
	}

	async fn unregister(&self, _command: &CleanupCommand) -> Result<()> {
		Ok(())
	}
}
