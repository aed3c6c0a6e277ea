use devbridge::CleanupCommand;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonRequest {
	Ping,
	/// Run `command` once `owner_pid` exits. `None` keeps it until stopped explicitly.
	RegisterCleanup {
		owner_pid: Option<u32>,
		command: CleanupCommand,
	},
	UnregisterCleanup {
		command: CleanupCommand,
	},
	/// Run and drop every command registered for `device_id`.
	RunCleanup {
		device_id: String,
	},
	ListCleanup,
	/// Run every pending command, then exit.
	Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonResponse {
	Pong { pid: u32 },
	Cleanup { list: Vec<CleanupEntry> },
	Ran { count: usize },
	Ok,
	Error { code: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupEntry {
	pub owner_pid: Option<u32>,
	pub command: CleanupCommand,
	pub registered_at: u64,
}
