//! Session, option and result types shared across the workspace.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Identifies one debug session.
///
/// Every piece of per-session state (discovered ports, timers, forwards,
/// notification waiters) is keyed by this pair and never shared across keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
	pub device_id: String,
	pub app_id: String,
}

impl SessionKey {
	pub fn new(device_id: impl Into<String>, app_id: impl Into<String>) -> Self {
		Self {
			device_id: device_id.into(),
			app_id: app_id.into(),
		}
	}
}

impl fmt::Display for SessionKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.device_id, self.app_id)
	}
}

/// Mobile platform of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
	Android,
	Ios,
}

impl fmt::Display for Platform {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Platform::Android => write!(f, "android"),
			Platform::Ios => write!(f, "ios"),
		}
	}
}

impl FromStr for Platform {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"android" => Ok(Platform::Android),
			"ios" => Ok(Platform::Ios),
			_ => Err(format!("unknown platform: {s}")),
		}
	}
}

/// How the host reaches a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
	/// Cable attached (adb over USB, usbmuxd).
	Usb,
	/// Network-only pairing.
	Wifi,
	/// Emulator or simulator running on this host.
	Local,
}

impl ConnectionType {
	/// Returns `true` for transports the iOS inspector tunnel can ride on.
	pub fn is_usb_or_local(self) -> bool {
		matches!(self, ConnectionType::Usb | ConnectionType::Local)
	}
}

/// Options accepted by `debug`.
///
/// `debug_brk` and `start` are mutually exclusive; see [`DebugOptions::conflict`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebugOptions {
	/// Restart the app and pause it until a debugger attaches.
	pub debug_brk: bool,
	/// Attach to the already running app without restarting it.
	pub start: bool,
	/// Stop an existing debug session instead of starting one.
	pub stop: bool,
	/// Spawn a client process (inspector app) when the platform path supports it.
	pub client: bool,
	/// Use the native inspector client instead of a DevTools frontend.
	pub inspector: bool,
	/// Produce a Chrome DevTools URL.
	pub chrome: bool,
	/// Use the hosted HTTPS DevTools frontend.
	pub use_http_url: bool,
	/// Use the DevTools frontend bundled with the browser.
	pub use_bundled_dev_tools: bool,
	/// DevTools frontend commit to pin; a default is used when absent.
	pub dev_tools_commit: Option<String>,
	/// Return as soon as the endpoint is ready instead of holding the session.
	pub justlaunch: bool,
}

impl Default for DebugOptions {
	fn default() -> Self {
		Self {
			debug_brk: false,
			start: false,
			stop: false,
			client: true,
			inspector: false,
			chrome: true,
			use_http_url: false,
			use_bundled_dev_tools: false,
			dev_tools_commit: None,
			justlaunch: false,
		}
	}
}

impl DebugOptions {
	/// Describes the first conflicting option pair, if any.
	pub fn conflict(&self) -> Option<&'static str> {
		if self.debug_brk && self.start {
			return Some("--debug-brk and --start cannot be used together");
		}
		if self.use_http_url && self.use_bundled_dev_tools {
			return Some("--use-http-url and --use-bundled-devtools cannot be used together");
		}
		None
	}
}

/// Endpoint handed back by `debug`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugResult {
	/// DevTools URL, ready to open when present.
	pub url: Option<String>,
	/// Local port the debugger endpoint is reachable on. `None` when discovery degraded.
	pub port: Option<u16>,
}

/// Inspector port announced by (or queried from) a running app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredPort {
	pub port: u16,
	pub discovered_at: SystemTime,
}

impl DiscoveredPort {
	pub fn now(port: u16) -> Self {
		Self {
			port,
			discovered_at: SystemTime::now(),
		}
	}
}

/// One row of a device's forward table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortForward {
	pub local_port: u16,
	pub remote_socket_name: String,
	pub device_id: String,
}
