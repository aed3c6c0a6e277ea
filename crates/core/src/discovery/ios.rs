//! iOS discovery: the runtime announces its inspector port in the device log.

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use devbridge_protocol::{DiscoveredPort, SessionKey};
use devbridge_runtime::Device;
use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{DiscoveryBudget, PortDiscoveryStrategy};
use crate::error::Result;

static ANNOUNCEMENT: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"NativeScript debugger has opened inspector socket on port (\d+) for (\S+?)\.?\s*$")
		.expect("announcement pattern is valid")
});

/// Extracts `(port, app_id)` from a runtime announcement line.
pub fn parse_announcement(line: &str) -> Option<(u16, String)> {
	let caps = ANNOUNCEMENT.captures(line)?;
	let port = caps.get(1)?.as_str().parse().ok()?;
	Some((port, caps.get(2)?.as_str().to_string()))
}

#[derive(Default)]
struct DiscoveryState {
	ports: DashMap<SessionKey, DiscoveredPort>,
	/// App-start watchdogs, tagged with a generation so a stale one never removes its successor.
	watchdogs: DashMap<SessionKey, (u64, JoinHandle<()>)>,
	/// One log scanner per device.
	streams: DashMap<String, JoinHandle<()>>,
	/// Sessions that asked for the scanner ahead of their handshake.
	watching: DashSet<SessionKey>,
	generation: AtomicU64,
}

/// Scans device logs for inspector port announcements.
///
/// State is keyed by [`SessionKey`]; sessions never see each other's entries.
pub struct IosLogDiscovery {
	state: Arc<DiscoveryState>,
	app_start_watch: Duration,
}

impl IosLogDiscovery {
	pub fn new(app_start_watch: Duration) -> Self {
		Self {
			state: Arc::new(DiscoveryState::default()),
			app_start_watch,
		}
	}

	/// Port announced for `key`, if any.
	pub fn discovered(&self, key: &SessionKey) -> Option<DiscoveredPort> {
		self.state.ports.get(key).map(|entry| entry.value().clone())
	}

	/// Whether an app-start watchdog is pending for `key`.
	pub fn has_watchdog(&self, key: &SessionKey) -> bool {
		self.state.watchdogs.contains_key(key)
	}

	async fn watch_device(&self, device: &dyn Device) -> Result<()> {
		let live = self
			.state
			.streams
			.get(device.id())
			.is_some_and(|task| !task.is_finished());
		if live {
			return Ok(());
		}

		let mut lines = device.log_lines().await?;
		let device_id = device.id().to_string();
		let state = Arc::clone(&self.state);
		let task = tokio::spawn(async move {
			while let Some(line) = lines.recv().await {
				let Some((port, app_id)) = parse_announcement(&line) else {
					continue;
				};
				let key = SessionKey::new(device_id.clone(), app_id);
				debug!(target = "devbridge.discovery", device = %key.device_id, app = %key.app_id, port, "inspector port announced");
				state.ports.insert(key.clone(), DiscoveredPort::now(port));
				if let Some((_, (_, watchdog))) = state.watchdogs.remove(&key) {
					watchdog.abort();
				}
			}
		});

		if let Some(previous) = self.state.streams.insert(device.id().to_string(), task) {
			previous.abort();
		}
		Ok(())
	}

	fn release_device_if_idle(&self, device_id: &str) {
		let in_use = self.state.ports.iter().any(|e| e.key().device_id == device_id)
			|| self.state.watchdogs.iter().any(|e| e.key().device_id == device_id)
			|| self.state.watching.iter().any(|key| key.device_id == device_id);
		if !in_use {
			if let Some((_, task)) = self.state.streams.remove(device_id) {
				task.abort();
			}
		}
	}
}

#[async_trait]
impl PortDiscoveryStrategy for IosLogDiscovery {
	async fn discover_port(&self, device: &dyn Device, app_id: &str, budget: DiscoveryBudget) -> Result<Option<u16>> {
		let key = SessionKey::new(device.id(), app_id);
		for _ in 0..budget.attempts {
			self.watch_device(device).await?;
			if let Some(found) = self.state.ports.get(&key) {
				return Ok(Some(found.port));
			}
			tokio::time::sleep(budget.interval).await;
		}
		if let Some(found) = self.state.ports.get(&key) {
			return Ok(Some(found.port));
		}

		warn!(
			target = "devbridge.discovery",
			device = device.id(),
			app = app_id,
			waited_ms = budget.total().as_millis() as u64,
			"inspector port was not announced; continuing without it"
		);
		Ok(None)
	}

	async fn prepare(&self, device: &dyn Device, app_id: &str) -> Result<()> {
		self.state.watching.insert(SessionKey::new(device.id(), app_id));
		self.watch_device(device).await
	}

	fn on_app_starting(&self, key: &SessionKey) {
		self.state.ports.remove(key);

		let generation = self.state.generation.fetch_add(1, Ordering::Relaxed);
		let state = Arc::clone(&self.state);
		let watched = key.clone();
		let wait = self.app_start_watch;
		let task = tokio::spawn(async move {
			tokio::time::sleep(wait).await;
			if !state.ports.contains_key(&watched) {
				warn!(
					target = "devbridge.discovery",
					device = %watched.device_id,
					app = %watched.app_id,
					waited_ms = wait.as_millis() as u64,
					"app started but announced no inspector port"
				);
			}
			state.watchdogs.remove_if(&watched, |_, (g, _)| *g == generation);
		});

		if let Some((_, previous)) = self.state.watchdogs.insert(key.clone(), (generation, task)) {
			previous.abort();
		}
	}

	fn clear(&self, key: &SessionKey) {
		self.state.ports.remove(key);
		self.state.watching.remove(key);
		if let Some((_, (_, watchdog))) = self.state.watchdogs.remove(key) {
			watchdog.abort();
		}
		self.release_device_if_idle(&key.device_id);
	}
}

impl Drop for IosLogDiscovery {
	fn drop(&mut self) {
		for entry in self.state.streams.iter() {
			entry.value().abort();
		}
		for entry in self.state.watchdogs.iter() {
			entry.value().1.abort();
		}
	}
}
