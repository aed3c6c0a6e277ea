//! Device capability trait and host-backed implementations.
//!
//! A [`Device`] is the per-device handle the debug bridge drives: shell
//! execution, a live log stream, app/process queries and small marker files.
//! [`DeviceLocator`] resolves a user-supplied identifier to a handle.

mod adb;
mod host;
mod ios;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

pub use adb::{AdbDevice, classify_serial, parse_adb_devices, parse_inspector_sockets};
use async_trait::async_trait;
use devbridge_protocol::{ConnectionType, Platform};
pub use host::HostDevices;
pub use ios::{IosDevice, ProxyNotificationCenter, parse_installed_bundles};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::notification::NotificationCenter;
use crate::process::resolve_tool;

/// Live stream of device log lines. Dropping the receiver stops the stream.
pub type LogLines = mpsc::Receiver<String>;

/// Connection state reported by the platform daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
	Connected,
	/// Attached but the host is not trusted/authorized.
	Unauthorized,
	Offline,
}

/// An app process visible to the debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningApp {
	pub app_id: String,
}

/// Per-device capabilities used by the debug bridge.
#[async_trait]
pub trait Device: Send + Sync {
	/// Serial number or UDID.
	fn id(&self) -> &str;

	fn platform(&self) -> Platform;

	fn connection_type(&self) -> ConnectionType;

	async fn status(&self) -> Result<DeviceStatus>;

	/// Runs a platform tool command against this device and returns stdout.
	async fn exec(&self, args: &[&str]) -> Result<String>;

	/// Subscribes to the device log.
	async fn log_lines(&self) -> Result<LogLines>;

	/// Apps currently running with an inspector endpoint.
	async fn running_apps(&self) -> Result<Vec<RunningApp>>;

	/// Returns `true` when `app_id` is running and was built debuggable.
	async fn is_app_running(&self, app_id: &str) -> Result<bool> {
		Ok(self.running_apps().await?.iter().any(|app| app.app_id == app_id))
	}

	async fn is_installed(&self, app_id: &str) -> Result<bool>;

	/// Writes a small file on the device.
	async fn push_file(&self, device_path: &str, contents: &[u8]) -> Result<()>;

	/// Reads a small file; `None` when it does not exist.
	async fn read_file(&self, device_path: &str) -> Result<Option<Vec<u8>>>;

	/// Removes a file; succeeds when it is already absent.
	async fn remove_file(&self, device_path: &str) -> Result<()>;

	/// Stops and relaunches `app_id`.
	async fn restart_app(&self, app_id: &str) -> Result<()>;

	/// Notification pub/sub, where the platform has one.
	fn notifications(&self) -> Option<Arc<dyn NotificationCenter>> {
		None
	}
}

/// Resolves device identifiers to handles.
#[async_trait]
pub trait DeviceLocator: Send + Sync {
	async fn find(&self, identifier: &str) -> Result<Option<Arc<dyn Device>>>;
}

/// Locations of the host tools used to reach devices.
#[derive(Debug, Clone, Default)]
pub struct ToolPaths {
	/// Explicit `adb` binary.
	pub adb: Option<PathBuf>,
	/// Directory holding the libimobiledevice tools (`idevice_id`, `iproxy`, ...).
	pub imobiledevice_dir: Option<PathBuf>,
}

impl ToolPaths {
	pub fn adb(&self) -> Result<PathBuf> {
		resolve_tool("adb", self.adb.as_deref())
	}

	pub fn imobiledevice(&self, tool: &str) -> Result<PathBuf> {
		match &self.imobiledevice_dir {
			Some(dir) => Ok(dir.join(tool)),
			None => resolve_tool(tool, None),
		}
	}
}

/// Spawns a long-running command and forwards its stdout line by line.
pub(crate) fn spawn_line_stream<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> Result<LogLines> {
	let mut child = tokio::process::Command::new(program)
		.args(args)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::null())
		.kill_on_drop(true)
		.spawn()
		.map_err(|err| match err.kind() {
			std::io::ErrorKind::NotFound => Error::ToolNotFound {
				program: program.display().to_string(),
			},
			_ => Error::Io(err),
		})?;

	let stdout = child
		.stdout
		.take()
		.ok_or_else(|| Error::Io(std::io::Error::other("log process has no stdout")))?;
	let (tx, rx) = mpsc::channel(256);
	let label = program.display().to_string();

	tokio::spawn(async move {
		let mut lines = BufReader::new(stdout).lines();
		loop {
			match lines.next_line().await {
				Ok(Some(line)) => {
					if tx.send(line).await.is_err() {
						break;
					}
				}
				Ok(None) => break,
				Err(err) => {
					debug!(target = "devbridge.device", program = %label, error = %err, "log stream read failed");
					break;
				}
			}
		}
		// Dropping the child kills it.
		drop(child);
	});

	Ok(rx)
}
