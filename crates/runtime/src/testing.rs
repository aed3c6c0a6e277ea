//! In-memory devices for exercising the debug bridge without hardware.
//!
//! [`FakeDevice`] emulates the adb forward table through [`Device::exec`]
//! (`forward --list`, `forward tcp:P <remote>`, `forward --remove tcp:P`),
//! keeps small files in memory and records every command and restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devbridge_protocol::{ConnectionType, Platform};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::device::{Device, DeviceLocator, DeviceStatus, LogLines, RunningApp};
use crate::error::{Error, Result};
use crate::notification::{LocalNotificationCenter, NotificationCenter};

#[derive(Default)]
struct FakeState {
	status: Option<DeviceStatus>,
	running: Vec<String>,
	installed: Vec<String>,
	forwards: Vec<(u16, String)>,
	files: HashMap<String, Vec<u8>>,
	commands: Vec<Vec<String>>,
	restarts: Vec<String>,
	log_senders: Vec<mpsc::Sender<String>>,
	file_on_restart: Vec<(String, Duration)>,
	post_on_restart: Vec<(String, Duration)>,
	log_on_restart: Vec<(String, Duration)>,
	fail_restart: bool,
	fail_forward: bool,
}

/// Scriptable [`Device`].
pub struct FakeDevice {
	id: String,
	platform: Platform,
	connection: ConnectionType,
	state: Arc<Mutex<FakeState>>,
	center: LocalNotificationCenter,
}

impl FakeDevice {
	pub fn android(id: &str) -> Self {
		Self::new(id, Platform::Android)
	}

	pub fn ios(id: &str) -> Self {
		Self::new(id, Platform::Ios)
	}

	fn new(id: &str, platform: Platform) -> Self {
		Self {
			id: id.to_string(),
			platform,
			connection: ConnectionType::Usb,
			state: Arc::new(Mutex::new(FakeState::default())),
			center: LocalNotificationCenter::new(),
		}
	}

	pub fn with_connection(mut self, connection: ConnectionType) -> Self {
		self.connection = connection;
		self
	}

	pub fn with_running(self, app_id: &str) -> Self {
		self.set_running(app_id, true);
		self
	}

	pub fn with_installed(self, app_id: &str) -> Self {
		self.state.lock().installed.push(app_id.to_string());
		self
	}

	/// Seeds the forward table as if another process had created the entry.
	pub fn with_forward(self, local_port: u16, remote: &str) -> Self {
		self.state.lock().forwards.push((local_port, remote.to_string()));
		self
	}

	pub fn set_status(&self, status: DeviceStatus) {
		self.state.lock().status = Some(status);
	}

	pub fn set_running(&self, app_id: &str, running: bool) {
		let mut st = self.state.lock();
		st.running.retain(|a| a != app_id);
		if running {
			st.running.push(app_id.to_string());
		}
	}

	/// Makes every restart fail.
	pub fn fail_restart(&self) {
		self.state.lock().fail_restart = true;
	}

	/// Makes `forward tcp:P` fail.
	pub fn fail_forward(&self) {
		self.state.lock().fail_forward = true;
	}

	/// Creates `path` on the device `delay` after each restart.
	pub fn create_file_on_restart(&self, path: &str, delay: Duration) {
		self.state.lock().file_on_restart.push((path.to_string(), delay));
	}

	/// Delivers notification `name` `delay` after each restart.
	pub fn post_on_restart(&self, name: &str, delay: Duration) {
		self.state.lock().post_on_restart.push((name.to_string(), delay));
	}

	/// Writes `line` to the device log `delay` after each restart.
	pub fn log_on_restart(&self, line: &str, delay: Duration) {
		self.state.lock().log_on_restart.push((line.to_string(), delay));
	}

	/// Writes `line` to the device log the moment the host posts notification `name`.
	pub fn log_on_post(&self, name: &str, line: &str) {
		let state = Arc::clone(&self.state);
		let line = line.to_string();
		self.center.on_post(name, Arc::new(move || write_log(&state, &line)));
	}

	pub fn put_file(&self, path: &str, contents: &[u8]) {
		self.state.lock().files.insert(path.to_string(), contents.to_vec());
	}

	pub fn file(&self, path: &str) -> Option<Vec<u8>> {
		self.state.lock().files.get(path).cloned()
	}

	/// Sends a line to every open log stream.
	pub fn emit_log(&self, line: &str) {
		write_log(&self.state, line);
	}

	/// Open log streams.
	pub fn log_subscribers(&self) -> usize {
		let mut st = self.state.lock();
		st.log_senders.retain(|tx| !tx.is_closed());
		st.log_senders.len()
	}

	/// Current forward table as `(local_port, remote)` pairs.
	pub fn forwards(&self) -> Vec<(u16, String)> {
		self.state.lock().forwards.clone()
	}

	pub fn commands(&self) -> Vec<Vec<String>> {
		self.state.lock().commands.clone()
	}

	pub fn restarts(&self) -> Vec<String> {
		self.state.lock().restarts.clone()
	}

	/// The in-process notification center backing an iOS fake.
	pub fn center(&self) -> LocalNotificationCenter {
		self.center.clone()
	}

	fn forward_table(&self) -> String {
		self.state
			.lock()
			.forwards
			.iter()
			.map(|(port, remote)| format!("{} tcp:{port} {remote}\n", self.id))
			.collect()
	}

	fn adb_forward(&self, args: &[&str]) -> Result<String> {
		match args {
			["forward", "--list"] => Ok(self.forward_table()),
			["forward", "--remove", local] => {
				let port = parse_tcp(local)?;
				let mut st = self.state.lock();
				let before = st.forwards.len();
				st.forwards.retain(|(p, _)| *p != port);
				if st.forwards.len() == before {
					return Err(failed(args, format!("error: listener '{local}' not found")));
				}
				Ok(String::new())
			}
			["forward", local, remote] => {
				let port = parse_tcp(local)?;
				let mut st = self.state.lock();
				if st.fail_forward {
					return Err(failed(args, format!("error: cannot bind listener: {local}")));
				}
				st.forwards.retain(|(p, _)| *p != port);
				st.forwards.push((port, remote.to_string()));
				Ok(String::new())
			}
			_ => Ok(String::new()),
		}
	}
}

fn write_log(state: &Mutex<FakeState>, line: &str) {
	let mut st = state.lock();
	st.log_senders.retain(|tx| !tx.is_closed());
	for tx in &st.log_senders {
		let _ = tx.try_send(line.to_string());
	}
}

fn parse_tcp(spec: &str) -> Result<u16> {
	spec.strip_prefix("tcp:")
		.and_then(|p| p.parse().ok())
		.ok_or_else(|| failed(&["forward", spec], format!("error: bad forward spec '{spec}'")))
}

fn failed(args: &[&str], stderr: String) -> Error {
	Error::CommandFailed {
		command: format!("adb {}", args.join(" ")),
		code: Some(1),
		stderr,
	}
}

#[async_trait]
impl Device for FakeDevice {
	fn id(&self) -> &str {
		&self.id
	}

	fn platform(&self) -> Platform {
		self.platform
	}

	fn connection_type(&self) -> ConnectionType {
		self.connection
	}

	async fn status(&self) -> Result<DeviceStatus> {
		Ok(self.state.lock().status.unwrap_or(DeviceStatus::Connected))
	}

	async fn exec(&self, args: &[&str]) -> Result<String> {
		self.state
			.lock()
			.commands
			.push(args.iter().map(|a| a.to_string()).collect());
		if self.platform == Platform::Android && args.first() == Some(&"forward") {
			return self.adb_forward(args);
		}
		Ok(String::new())
	}

	async fn log_lines(&self) -> Result<LogLines> {
		let (tx, rx) = mpsc::channel(64);
		self.state.lock().log_senders.push(tx);
		Ok(rx)
	}

	async fn running_apps(&self) -> Result<Vec<RunningApp>> {
		Ok(self
			.state
			.lock()
			.running
			.iter()
			.map(|app_id| RunningApp { app_id: app_id.clone() })
			.collect())
	}

	async fn is_installed(&self, app_id: &str) -> Result<bool> {
		let st = self.state.lock();
		Ok(st.installed.iter().chain(st.running.iter()).any(|a| a == app_id))
	}

	async fn push_file(&self, device_path: &str, contents: &[u8]) -> Result<()> {
		self.put_file(device_path, contents);
		Ok(())
	}

	async fn read_file(&self, device_path: &str) -> Result<Option<Vec<u8>>> {
		Ok(self.file(device_path))
	}

	async fn remove_file(&self, device_path: &str) -> Result<()> {
		self.state.lock().files.remove(device_path);
		Ok(())
	}

	async fn restart_app(&self, app_id: &str) -> Result<()> {
		let (files, posts, logs) = {
			let mut st = self.state.lock();
			st.restarts.push(app_id.to_string());
			if st.fail_restart {
				return Err(Error::CommandFailed {
					command: format!("restart {app_id}"),
					code: Some(1),
					stderr: "restart refused".into(),
				});
			}
			if !st.running.iter().any(|a| a == app_id) {
				st.running.push(app_id.to_string());
			}
			(
				st.file_on_restart.clone(),
				st.post_on_restart.clone(),
				st.log_on_restart.clone(),
			)
		};

		for (path, delay) in files {
			let state = Arc::clone(&self.state);
			tokio::spawn(async move {
				tokio::time::sleep(delay).await;
				state.lock().files.insert(path, Vec::new());
			});
		}
		for (name, delay) in posts {
			let center = self.center.clone();
			tokio::spawn(async move {
				tokio::time::sleep(delay).await;
				center.deliver(&name);
			});
		}
		for (line, delay) in logs {
			let state = Arc::clone(&self.state);
			tokio::spawn(async move {
				tokio::time::sleep(delay).await;
				write_log(&state, &line);
			});
		}
		Ok(())
	}

	fn notifications(&self) -> Option<Arc<dyn NotificationCenter>> {
		match self.platform {
			Platform::Ios => Some(Arc::new(self.center.clone())),
			Platform::Android => None,
		}
	}
}

/// Locator over a fixed set of devices.
#[derive(Default, Clone)]
pub struct FakeLocator {
	devices: HashMap<String, Arc<dyn Device>>,
}

impl FakeLocator {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, device: Arc<dyn Device>) -> Self {
		self.devices.insert(device.id().to_string(), device);
		self
	}
}

#[async_trait]
impl DeviceLocator for FakeLocator {
	async fn find(&self, identifier: &str) -> Result<Option<Arc<dyn Device>>> {
		Ok(self.devices.get(identifier).cloned())
	}
}
