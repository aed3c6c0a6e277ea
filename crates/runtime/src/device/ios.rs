//! iOS devices reached through the libimobiledevice tools.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use devbridge_protocol::{ConnectionType, Platform};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Device, DeviceStatus, LogLines, RunningApp, ToolPaths, spawn_line_stream};
use crate::error::{Error, Result};
use crate::notification::{NotificationCallback, NotificationCenter, SubscriptionId};
use crate::process;

/// How long a fresh `observe` child must stay up before its subscription counts as live.
///
/// The proxy prints nothing once it has registered with the device, so
/// surviving this window is the only readiness signal available.
const OBSERVER_SETTLE: Duration = Duration::from_millis(250);

/// A physical iOS device addressed by UDID.
pub struct IosDevice {
	udid: String,
	tools: ToolPaths,
	connection: ConnectionType,
	notifications: Arc<ProxyNotificationCenter>,
}

impl IosDevice {
	pub fn new(udid: impl Into<String>, tools: ToolPaths, connection: ConnectionType) -> Self {
		let udid = udid.into();
		let notifications = Arc::new(ProxyNotificationCenter::new(udid.clone(), tools.clone(), connection));
		Self {
			udid,
			tools,
			connection,
			notifications,
		}
	}

	fn device_args<'a>(&'a self, rest: &[&'a str]) -> Vec<&'a str> {
		let mut args = vec!["-u", self.udid.as_str()];
		if self.connection == ConnectionType::Wifi {
			args.push("-n");
		}
		args.extend_from_slice(rest);
		args
	}

	async fn tool(&self, tool: &str, rest: &[&str]) -> Result<String> {
		let program = self.tools.imobiledevice(tool)?;
		Ok(process::run(&program, &self.device_args(rest)).await?.stdout)
	}
}

#[async_trait]
impl Device for IosDevice {
	fn id(&self) -> &str {
		&self.udid
	}

	fn platform(&self) -> Platform {
		Platform::Ios
	}

	fn connection_type(&self) -> ConnectionType {
		self.connection
	}

	async fn status(&self) -> Result<DeviceStatus> {
		match self.tool("ideviceinfo", &["-k", "DeviceName"]).await {
			Ok(_) => Ok(DeviceStatus::Connected),
			Err(err @ Error::ToolNotFound { .. }) => Err(err),
			Err(err) => {
				let stderr = err.stderr().unwrap_or_default().to_ascii_lowercase();
				if stderr.contains("pair") || stderr.contains("trust") {
					Ok(DeviceStatus::Unauthorized)
				} else {
					Ok(DeviceStatus::Offline)
				}
			}
		}
	}

	/// The first argument names the libimobiledevice tool; the device selector is added.
	async fn exec(&self, args: &[&str]) -> Result<String> {
		let Some((tool, rest)) = args.split_first() else {
			return Err(Error::Unsupported {
				platform: Platform::Ios,
				operation: "empty command",
			});
		};
		self.tool(tool, rest).await
	}

	async fn log_lines(&self) -> Result<LogLines> {
		let program = self.tools.imobiledevice("idevicesyslog")?;
		spawn_line_stream(&program, &self.device_args(&[]))
	}

	async fn running_apps(&self) -> Result<Vec<RunningApp>> {
		Err(Error::Unsupported {
			platform: Platform::Ios,
			operation: "listing running apps",
		})
	}

	async fn is_installed(&self, app_id: &str) -> Result<bool> {
		let listing = self.tool("ideviceinstaller", &["-l"]).await?;
		Ok(parse_installed_bundles(&listing).iter().any(|bundle| bundle == app_id))
	}

	async fn push_file(&self, _device_path: &str, _contents: &[u8]) -> Result<()> {
		Err(Error::Unsupported {
			platform: Platform::Ios,
			operation: "writing device files",
		})
	}

	async fn read_file(&self, _device_path: &str) -> Result<Option<Vec<u8>>> {
		Err(Error::Unsupported {
			platform: Platform::Ios,
			operation: "reading device files",
		})
	}

	async fn remove_file(&self, _device_path: &str) -> Result<()> {
		Err(Error::Unsupported {
			platform: Platform::Ios,
			operation: "removing device files",
		})
	}

	async fn restart_app(&self, app_id: &str) -> Result<()> {
		let program = self.tools.imobiledevice("idevicedebug")?;
		let pid = process::spawn_detached(&program, &self.device_args(&["run", app_id]))?;
		debug!(target = "devbridge.device", udid = %self.udid, app = app_id, pid, "relaunched app");
		Ok(())
	}

	fn notifications(&self) -> Option<Arc<dyn NotificationCenter>> {
		Some(self.notifications.clone())
	}
}

/// Bundle identifiers from `ideviceinstaller -l` output.
pub fn parse_installed_bundles(listing: &str) -> Vec<String> {
	listing
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty() && !line.starts_with("CFBundleIdentifier") && !line.starts_with("Total:"))
		.filter_map(|line| {
			let id = line.split([',', ' ']).next()?.trim();
			(!id.is_empty() && id != "-").then(|| id.to_string())
		})
		.collect()
}

/// Notification center backed by `idevicenotificationproxy`.
///
/// Every subscription is one `observe` child process; unsubscribing aborts the
/// reader task, which kills the child.
pub struct ProxyNotificationCenter {
	udid: String,
	tools: ToolPaths,
	connection: ConnectionType,
	observers: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,
	next_id: AtomicU64,
}

impl ProxyNotificationCenter {
	pub fn new(udid: String, tools: ToolPaths, connection: ConnectionType) -> Self {
		Self {
			udid,
			tools,
			connection,
			observers: Mutex::new(HashMap::new()),
			next_id: AtomicU64::new(1),
		}
	}

	fn args<'a>(&'a self, verb: &'a str, name: &'a str) -> Vec<&'a str> {
		let mut args = vec!["-u", self.udid.as_str()];
		if self.connection == ConnectionType::Wifi {
			args.push("-n");
		}
		args.push(verb);
		args.push(name);
		args
	}
}

#[async_trait]
impl NotificationCenter for ProxyNotificationCenter {
	async fn post(&self, name: &str) -> Result<()> {
		let program = self.tools.imobiledevice("idevicenotificationproxy")?;
		process::run(&program, &self.args("post", name))
			.await
			.map(|_| ())
			.map_err(|err| Error::Notification(err.to_string()))
	}

	async fn subscribe(&self, name: &str, callback: NotificationCallback) -> Result<SubscriptionId> {
		let program = self.tools.imobiledevice("idevicenotificationproxy")?;
		let mut child = tokio::process::Command::new(&program)
			.args(self.args("observe", name))
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.kill_on_drop(true)
			.spawn()
			.map_err(|err| Error::Notification(format!("failed to observe {name}: {err}")))?;
		let stdout = child
			.stdout
			.take()
			.ok_or_else(|| Error::Notification("observer has no stdout".into()))?;
		observer_settled(&mut child, name, OBSERVER_SETTLE).await?;

		let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
		let watched = name.to_string();
		let task = tokio::spawn(async move {
			let _child = child;
			let mut lines = BufReader::new(stdout).lines();
			while let Ok(Some(line)) = lines.next_line().await {
				if line.contains(&watched) {
					callback();
				}
			}
		});
		self.observers.lock().insert(id, task);
		Ok(id)
	}

	fn unsubscribe(&self, id: SubscriptionId) {
		if let Some(task) = self.observers.lock().remove(&id) {
			task.abort();
		}
	}
}

/// Waits out `settle`; an observer that exits within it never registered.
async fn observer_settled(child: &mut Child, name: &str, settle: Duration) -> Result<()> {
	match tokio::time::timeout(settle, child.wait()).await {
		Err(_) => Ok(()),
		Ok(Ok(status)) => Err(Error::Notification(format!("observer for {name} exited early ({status})"))),
		Ok(Err(err)) => Err(Error::Notification(format!("observer for {name} failed: {err}"))),
	}
}

impl Drop for ProxyNotificationCenter {
	fn drop(&mut self) {
		for (_, task) in self.observers.lock().drain() {
			task.abort();
		}
	}
}
