//! Tunables for discovery, handshake and bridging.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// DevTools front-end revision used when the caller does not pin one.
pub const DEFAULT_DEVTOOLS_COMMIT: &str = "02e6bde1bbe34e43b309d4ef774b1168d25fd024";

/// Debug bridge configuration.
///
/// Every field has a default, so a config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DebugConfig {
	/// Poll interval while waiting for an iOS port announcement.
	pub discovery_interval_ms: u64,
	pub discovery_attempts: u32,
	/// How long after an app start a port announcement is expected.
	pub app_start_watch_ms: u64,
	/// Poll interval for the Android debugger-started marker.
	pub marker_poll_interval_ms: u64,
	pub marker_poll_attempts: u32,
	/// Timeout of each leg of an attach race.
	pub race_leg_timeout_ms: u64,
	/// How long to wait for the user to launch the app in debug-brk mode.
	pub app_launch_timeout_ms: u64,
	/// Wait for `ReadyForAttach` after posting `AttachRequest`.
	pub ready_after_request_ms: u64,
	pub bridge_retry_interval_ms: u64,
	/// Gives up connecting to the device socket after this long. Unbounded when unset.
	pub bridge_connect_deadline_ms: Option<u64>,
	/// First local port probed for new forwards.
	pub base_port: u16,
	/// Device port of the legacy iOS inspector socket.
	pub ios_inspector_port: u16,
	pub devtools_commit: String,
	/// Host operating system, as in `std::env::consts::OS`.
	pub host_os: String,
	/// Use the legacy handshake + frame bridge for Chrome sessions on iOS.
	pub ios_legacy_bridge: bool,
	/// Continue when the attach race times out instead of failing.
	pub best_effort_attach: bool,
	/// Inspector client command. `{socket}`, `{app}` and `{device}` are substituted.
	pub inspector_client: Vec<String>,
	/// Directory on Android devices holding the debug-brk markers.
	pub android_marker_dir: String,
}

impl Default for DebugConfig {
	fn default() -> Self {
		Self {
			discovery_interval_ms: 500,
			discovery_attempts: 10,
			app_start_watch_ms: 5_000,
			marker_poll_interval_ms: 500,
			marker_poll_attempts: 12,
			race_leg_timeout_ms: 2_000,
			app_launch_timeout_ms: 60_000,
			ready_after_request_ms: 5_000,
			bridge_retry_interval_ms: 1_000,
			bridge_connect_deadline_ms: None,
			base_port: 40_000,
			ios_inspector_port: 18_181,
			devtools_commit: DEFAULT_DEVTOOLS_COMMIT.to_string(),
			host_os: std::env::consts::OS.to_string(),
			ios_legacy_bridge: false,
			best_effort_attach: false,
			inspector_client: ["open", "-n", "-a", "NativeScript Inspector", "--args", "{socket}", "{app}"]
				.into_iter()
				.map(String::from)
				.collect(),
			android_marker_dir: "/data/local/tmp".to_string(),
		}
	}
}

impl DebugConfig {
	pub fn discovery_interval(&self) -> Duration {
		Duration::from_millis(self.discovery_interval_ms)
	}

	pub fn app_start_watch(&self) -> Duration {
		Duration::from_millis(self.app_start_watch_ms)
	}

	pub fn marker_poll_interval(&self) -> Duration {
		Duration::from_millis(self.marker_poll_interval_ms)
	}

	pub fn race_leg_timeout(&self) -> Duration {
		Duration::from_millis(self.race_leg_timeout_ms)
	}

	pub fn app_launch_timeout(&self) -> Duration {
		Duration::from_millis(self.app_launch_timeout_ms)
	}

	pub fn ready_after_request(&self) -> Duration {
		Duration::from_millis(self.ready_after_request_ms)
	}

	pub fn bridge_retry_interval(&self) -> Duration {
		Duration::from_millis(self.bridge_retry_interval_ms)
	}

	pub fn bridge_connect_deadline(&self) -> Option<Duration> {
		self.bridge_connect_deadline_ms.map(Duration::from_millis)
	}

	/// Device path of the marker asking the runtime to break on start.
	pub fn debug_break_marker(&self, app_id: &str) -> String {
		format!("{}/{app_id}-debugbreak", self.android_marker_dir)
	}

	/// Device path the runtime creates once it waits for a debugger.
	pub fn debugger_started_marker(&self, app_id: &str) -> String {
		format!("{}/{app_id}-debugger-started", self.android_marker_dir)
	}
}
