//! Android devices reached through `adb`.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use devbridge_protocol::{ConnectionType, Platform};

use super::{Device, DeviceStatus, LogLines, RunningApp, spawn_line_stream};
use crate::error::Result;
use crate::process::{self, CommandOutput};

/// Socket name suffix the Android runtime uses for its inspector server.
const INSPECTOR_SOCKET_SUFFIX: &str = "-inspectorServer";

/// An adb-attached device or emulator.
#[derive(Debug, Clone)]
pub struct AdbDevice {
	serial: String,
	adb: PathBuf,
	connection: ConnectionType,
}

impl AdbDevice {
	pub fn new(serial: impl Into<String>, adb: PathBuf) -> Self {
		let serial = serial.into();
		let connection = classify_serial(&serial);
		Self { serial, adb, connection }
	}

	async fn adb(&self, args: &[&str]) -> Result<CommandOutput> {
		let mut full = vec!["-s", self.serial.as_str()];
		full.extend_from_slice(args);
		process::run(&self.adb, &full).await
	}
}

#[async_trait]
impl Device for AdbDevice {
	fn id(&self) -> &str {
		&self.serial
	}

	fn platform(&self) -> Platform {
		Platform::Android
	}

	fn connection_type(&self) -> ConnectionType {
		self.connection
	}

	async fn status(&self) -> Result<DeviceStatus> {
		let output = process::run(&self.adb, &["devices"]).await?;
		Ok(parse_adb_devices(&output.stdout)
			.into_iter()
			.find(|(serial, _)| serial == &self.serial)
			.map(|(_, status)| status)
			.unwrap_or(DeviceStatus::Offline))
	}

	async fn exec(&self, args: &[&str]) -> Result<String> {
		Ok(self.adb(args).await?.stdout)
	}

	async fn log_lines(&self) -> Result<LogLines> {
		spawn_line_stream(&self.adb, &["-s", self.serial.as_str(), "logcat", "-v", "raw"])
	}

	async fn running_apps(&self) -> Result<Vec<RunningApp>> {
		let table = self.exec(&["shell", "cat", "/proc/net/unix"]).await?;
		Ok(parse_inspector_sockets(&table)
			.into_iter()
			.map(|app_id| RunningApp { app_id })
			.collect())
	}

	async fn is_installed(&self, app_id: &str) -> Result<bool> {
		let output = self.exec(&["shell", "pm", "list", "packages", app_id]).await?;
		Ok(output
			.lines()
			.filter_map(|line| line.trim().strip_prefix("package:"))
			.any(|pkg| pkg == app_id))
	}

	async fn push_file(&self, device_path: &str, contents: &[u8]) -> Result<()> {
		let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
		let local = std::env::temp_dir().join(format!("devbridge-{}-{nanos}", std::process::id()));
		tokio::fs::write(&local, contents).await?;
		let local_str = local.to_string_lossy().into_owned();
		let result = self.adb(&["push", local_str.as_str(), device_path]).await;
		let _ = tokio::fs::remove_file(&local).await;
		result.map(|_| ())
	}

	async fn read_file(&self, device_path: &str) -> Result<Option<Vec<u8>>> {
		let args = ["-s", self.serial.as_str(), "shell", "cat", device_path];
		let output = process::run_unchecked(&self.adb, &args).await?;
		if output.code != Some(0) || output.stdout.contains("No such file or directory") {
			return Ok(None);
		}
		Ok(Some(output.stdout.into_bytes()))
	}

	async fn remove_file(&self, device_path: &str) -> Result<()> {
		self.adb(&["shell", "rm", "-f", device_path]).await.map(|_| ())
	}

	async fn restart_app(&self, app_id: &str) -> Result<()> {
		self.adb(&["shell", "am", "force-stop", app_id]).await?;
		self.adb(&["shell", "monkey", "-p", app_id, "-c", "android.intent.category.LAUNCHER", "1"])
			.await
			.map(|_| ())
	}
}

/// Infers how an adb serial is attached.
pub fn classify_serial(serial: &str) -> ConnectionType {
	if serial.starts_with("emulator-") {
		ConnectionType::Local
	} else if serial.contains(':') || serial.contains("._adb-tls-connect.") {
		ConnectionType::Wifi
	} else {
		ConnectionType::Usb
	}
}

/// Parses `adb devices` output into serial/status pairs.
pub fn parse_adb_devices(output: &str) -> Vec<(String, DeviceStatus)> {
	output
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
		.filter_map(|line| {
			let mut parts = line.split_whitespace();
			let serial = parts.next()?;
			let state = parts.next()?;
			let status = match state {
				"device" => DeviceStatus::Connected,
				"unauthorized" => DeviceStatus::Unauthorized,
				_ => DeviceStatus::Offline,
			};
			Some((serial.to_string(), status))
		})
		.collect()
}

/// Extracts app ids from `/proc/net/unix` rows naming `@<appId>-inspectorServer`.
pub fn parse_inspector_sockets(table: &str) -> Vec<String> {
	let mut apps: Vec<String> = Vec::new();
	for line in table.lines() {
		let Some(name) = line.split_whitespace().last() else {
			continue;
		};
		let Some(app) = name.strip_prefix('@').and_then(|n| n.strip_suffix(INSPECTOR_SOCKET_SUFFIX)) else {
			continue;
		};
		if !app.is_empty() && !apps.iter().any(|a| a == app) {
			apps.push(app.to_string());
		}
	}
	apps
}
