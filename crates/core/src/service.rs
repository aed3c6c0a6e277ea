//! Debug session orchestrator.
//!
//! [`DebugService::start_debug`] checks every precondition before touching the
//! device, then dispatches on platform:
//!
//! - **Android**: optional debug-brk restart with marker polling, then port
//!   discovery through the adb forward table.
//! - **iOS**: attach handshake, then either log-based port discovery and a
//!   usbmux forward (DevTools) or the legacy inspector socket behind a local
//!   WebSocket bridge / raw Unix-socket proxy.
//!
//! All state lives in per-[`SessionKey`] contexts; stopping one session never
//! touches another.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use devbridge_protocol::{DebugOptions, DebugResult, Platform, SessionKey};
use devbridge_runtime::process::{resolve_tool, spawn_detached};
use devbridge_runtime::{Device, DeviceLocator, DeviceStatus};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::bridge::{BridgeEvent, DeviceEndpoint, RawSocketProxy, RetryPolicy, WebSocketBridge};
use crate::cleanup::{CleanupRegistry, NoopCleanup};
use crate::config::DebugConfig;
use crate::devtools::{ChromeDevTools, DevToolsUrlBuilder};
use crate::discovery::{AndroidPortDiscovery, DiscoveryBudget, IosLogDiscovery, PortDiscoveryStrategy};
use crate::error::{Error, Result};
use crate::handshake::{AttachMode, AttachOutcome, HandshakeCoordinator};
use crate::session::{SessionContext, SessionEvent, SessionState};
use crate::tunnel::{AdbTunnel, PortProbe, TunnelBackend, TunnelManager, UsbmuxTunnel};

const EVENT_CAPACITY: usize = 64;

/// Configures a [`DebugService`].
pub struct DebugServiceBuilder {
	locator: Arc<dyn DeviceLocator>,
	config: DebugConfig,
	cleanup: Arc<dyn CleanupRegistry>,
	android_tunnel: Arc<dyn TunnelBackend>,
	ios_tunnel: Arc<dyn TunnelBackend>,
	devtools: Option<Arc<dyn DevToolsUrlBuilder>>,
	probe: Option<PortProbe>,
}

impl DebugServiceBuilder {
	pub fn config(mut self, config: DebugConfig) -> Self {
		self.config = config;
		self
	}

	pub fn cleanup(mut self, cleanup: Arc<dyn CleanupRegistry>) -> Self {
		self.cleanup = cleanup;
		self
	}

	pub fn android_tunnel(mut self, backend: Arc<dyn TunnelBackend>) -> Self {
		self.android_tunnel = backend;
		self
	}

	pub fn ios_tunnel(mut self, backend: Arc<dyn TunnelBackend>) -> Self {
		self.ios_tunnel = backend;
		self
	}

	pub fn devtools(mut self, devtools: Arc<dyn DevToolsUrlBuilder>) -> Self {
		self.devtools = Some(devtools);
		self
	}

	/// Overrides the local port bindability check used by both tunnel managers.
	pub fn port_probe(mut self, probe: PortProbe) -> Self {
		self.probe = Some(probe);
		self
	}

	pub fn build(self) -> DebugService {
		let config = self.config;
		let tunnels = |backend: Arc<dyn TunnelBackend>| {
			let manager = TunnelManager::new(backend, Arc::clone(&self.cleanup), config.base_port);
			Arc::new(match &self.probe {
				Some(probe) => manager.with_probe(Arc::clone(probe)),
				None => manager,
			})
		};
		let android_tunnels = tunnels(self.android_tunnel);
		let ios_tunnels = tunnels(self.ios_tunnel);
		let devtools = self
			.devtools
			.unwrap_or_else(|| Arc::new(ChromeDevTools::new(config.devtools_commit.clone())));
		let (events, _) = broadcast::channel(EVENT_CAPACITY);

		DebugService {
			inner: Arc::new(Inner {
				locator: self.locator,
				android_discovery: AndroidPortDiscovery::new(Arc::clone(&android_tunnels)),
				ios_discovery: IosLogDiscovery::new(config.app_start_watch()),
				android_tunnels,
				ios_tunnels,
				devtools,
				sessions: DashMap::new(),
				events,
				config,
			}),
		}
	}
}

/// Starts and stops debug sessions.
#[derive(Clone)]
pub struct DebugService {
	inner: Arc<Inner>,
}

struct Inner {
	locator: Arc<dyn DeviceLocator>,
	config: DebugConfig,
	devtools: Arc<dyn DevToolsUrlBuilder>,
	android_tunnels: Arc<TunnelManager>,
	ios_tunnels: Arc<TunnelManager>,
	android_discovery: AndroidPortDiscovery,
	ios_discovery: IosLogDiscovery,
	sessions: DashMap<SessionKey, Arc<SessionContext>>,
	events: broadcast::Sender<SessionEvent>,
}

impl DebugService {
	pub fn builder(locator: Arc<dyn DeviceLocator>) -> DebugServiceBuilder {
		DebugServiceBuilder {
			locator,
			config: DebugConfig::default(),
			cleanup: Arc::new(NoopCleanup),
			android_tunnel: Arc::new(AdbTunnel::default()),
			ios_tunnel: Arc::new(UsbmuxTunnel::default()),
			devtools: None,
			probe: None,
		}
	}

	pub fn config(&self) -> &DebugConfig {
		&self.inner.config
	}

	/// Starts a debug session for `app_id` on `device_id`.
	///
	/// Fails before any side effect when a precondition does not hold. A
	/// result without a port means discovery ran out of time; that case is
	/// logged, not returned as an error.
	pub async fn start_debug(&self, device_id: &str, app_id: &str, options: &DebugOptions) -> Result<DebugResult> {
		if let Some(conflict) = options.conflict() {
			return Err(Error::Validation(conflict.to_string()));
		}
		if options.stop {
			self.stop_debug(device_id).await?;
			return Ok(DebugResult::default());
		}

		let key = SessionKey::new(device_id, app_id);
		let device = self
			.inner
			.locator
			.find(device_id)
			.await?
			.ok_or_else(|| Error::connectivity(&key, "Device not found"))?;
		self.inner.check_preconditions(&key, device.as_ref(), options).await?;

		if let Some(previous) = self.inner.sessions.get(&key).map(|s| Arc::clone(s.value())) {
			if previous.state() != SessionState::Stopped {
				info!(target = "devbridge.session", session = %key, "replacing running session");
				self.inner.teardown(&previous).await;
			}
		}

		let session = Arc::new(SessionContext::new(key.clone(), device));
		self.inner.sessions.insert(key.clone(), Arc::clone(&session));
		session.advance(SessionState::Discovering);
		self.inner.emit(SessionEvent::Discovering { key: key.clone() });
		info!(target = "devbridge.session", device = device_id, app = app_id, platform = %session.platform(), "starting debug session");

		let outcome = tokio::select! {
			outcome = self.inner.run_platform(&session, options) => outcome,
			_ = session.cancelled() => Err(Error::connectivity(&key, "Debug session was stopped while starting")),
		};

		match outcome {
			Ok(result) => {
				if result.port.is_some() || session.has_bridge() {
					session.advance(SessionState::Bridged);
					self.inner.emit(SessionEvent::Bridged {
						key: key.clone(),
						url: result.url.clone(),
						port: result.port,
					});
				}
				Ok(result)
			}
			Err(err) => {
				warn!(target = "devbridge.session", session = %key, error = %err, "debug session failed to start");
				self.inner.teardown(&session).await;
				Err(err)
			}
		}
	}

	/// Stops every session on `device_id`: bridges, waiters, timers and forwards.
	pub async fn stop_debug(&self, device_id: &str) -> Result<()> {
		let sessions: Vec<Arc<SessionContext>> = self
			.inner
			.sessions
			.iter()
			.filter(|entry| entry.key().device_id == device_id && entry.value().state() != SessionState::Stopped)
			.map(|entry| Arc::clone(entry.value()))
			.collect();

		if sessions.is_empty() {
			debug!(target = "devbridge.session", device = device_id, "no debug session to stop");
		}
		for session in sessions {
			self.inner.teardown(&session).await;
		}
		Ok(())
	}

	/// Session lifecycle events for every key.
	pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
		self.inner.events.subscribe()
	}

	/// Current state of the session for `key`, if one was ever started.
	pub fn session_state(&self, key: &SessionKey) -> Option<SessionState> {
		self.inner.sessions.get(key).map(|session| session.state())
	}
}

impl Inner {
	fn emit(&self, event: SessionEvent) {
		let _ = self.events.send(event);
	}

	fn budget(&self) -> DiscoveryBudget {
		DiscoveryBudget {
			interval: self.config.discovery_interval(),
			attempts: self.config.discovery_attempts,
		}
	}

	fn retry(&self) -> RetryPolicy {
		RetryPolicy {
			interval: self.config.bridge_retry_interval(),
			deadline: self.config.bridge_connect_deadline(),
		}
	}

	/// DevTools URL for `port`, unless the caller opted out of one.
	fn devtools_url(&self, options: &DebugOptions, port: u16) -> Option<String> {
		options.chrome.then(|| self.devtools.build(options, port))
	}

	fn tunnels(&self, platform: Platform) -> &TunnelManager {
		match platform {
			Platform::Android => &self.android_tunnels,
			Platform::Ios => &self.ios_tunnels,
		}
	}

	fn discovery(&self, platform: Platform) -> &dyn PortDiscoveryStrategy {
		match platform {
			Platform::Android => &self.android_discovery,
			Platform::Ios => &self.ios_discovery,
		}
	}

	async fn check_preconditions(&self, key: &SessionKey, device: &dyn Device, options: &DebugOptions) -> Result<()> {
		match device.status().await? {
			DeviceStatus::Connected => {}
			DeviceStatus::Unauthorized => {
				return Err(Error::connectivity(
					key,
					"Device is not trusted; accept the debugging prompt on the device",
				));
			}
			DeviceStatus::Offline => return Err(Error::connectivity(key, "Device is not connected")),
		}

		let platform = device.platform();
		let host = self.config.host_os.as_str();
		if !platform_supported(platform, host) {
			return Err(Error::Validation(format!(
				"Debugging {platform} devices is not supported on {host}"
			)));
		}
		if platform == Platform::Ios {
			if !device.connection_type().is_usb_or_local() {
				return Err(Error::Validation(format!(
					"Device {} is only reachable over Wi-Fi; connect it with a cable to debug",
					key.device_id
				)));
			}
			if options.inspector && options.client && host != "macos" {
				return Err(Error::Validation("The inspector client can only be started on macOS".into()));
			}
		}

		if !device.is_installed(&key.app_id).await? {
			return Err(Error::connectivity(key, "App is not installed"));
		}
		// debug-brk relaunches the app itself. On iOS the handshake's availability
		// query is the running check; asking here would post it twice.
		if platform == Platform::Android && !options.debug_brk && !device.is_app_running(&key.app_id).await? {
			return Err(Error::connectivity(
				key,
				"App is not running or was not built with debugging enabled",
			));
		}
		Ok(())
	}

	async fn run_platform(self: &Arc<Self>, session: &Arc<SessionContext>, options: &DebugOptions) -> Result<DebugResult> {
		match session.platform() {
			Platform::Android => self.debug_android(session, options).await,
			Platform::Ios if options.inspector || self.config.ios_legacy_bridge => {
				self.debug_ios_legacy(session, options).await
			}
			Platform::Ios => self.debug_ios(session, options).await,
		}
	}

	async fn debug_android(self: &Arc<Self>, session: &Arc<SessionContext>, options: &DebugOptions) -> Result<DebugResult> {
		let device = session.device.as_ref();
		let app_id = session.key.app_id.as_str();

		if options.debug_brk {
			self.restart_with_debug_break(device, app_id).await?;
		}

		let discover = {
			let inner = Arc::clone(self);
			let device = Arc::clone(&session.device);
			let app_id = app_id.to_string();
			let budget = self.budget();
			async move { inner.android_discovery.discover_port(device.as_ref(), &app_id, budget).await }
		};
		let Some(port) = self.hold_forward(session, discover).await? else {
			return Ok(DebugResult::default());
		};

		let url = self.devtools_url(options, port);
		info!(target = "devbridge.session", session = %session.key, port, url = ?url, "android inspector ready");
		Ok(DebugResult { url, port: Some(port) })
	}

	/// Relaunches an Android app so that it waits for the debugger.
	///
	/// A missing debugger-started marker only warns: the runtime may still catch up.
	async fn restart_with_debug_break(&self, device: &dyn Device, app_id: &str) -> Result<()> {
		let started = self.config.debugger_started_marker(app_id);
		device.remove_file(&started).await?;
		device.push_file(&self.config.debug_break_marker(app_id), b"").await?;
		device.restart_app(app_id).await?;

		let interval = self.config.marker_poll_interval();
		for attempt in 1..=self.config.marker_poll_attempts {
			tokio::time::sleep(interval).await;
			if device.read_file(&started).await?.is_some() {
				debug!(target = "devbridge.session", device = device.id(), app = app_id, attempt, "runtime is waiting for the debugger");
				return Ok(());
			}
		}

		warn!(
			target = "devbridge.session",
			device = device.id(),
			app = app_id,
			waited_ms = (interval * self.config.marker_poll_attempts).as_millis() as u64,
			"debugger-started marker never appeared; attaching anyway"
		);
		Ok(())
	}

	async fn handshake(&self, session: &SessionContext, options: &DebugOptions) -> Result<()> {
		let device = session.device.as_ref();
		let key = &session.key;
		let center = device
			.notifications()
			.ok_or_else(|| Error::connectivity(key, "Device offers no notification channel for the attach handshake"))?;
		let coordinator = HandshakeCoordinator::new(center, key.app_id.clone(), (&self.config).into());

		if options.debug_brk {
			self.ios_discovery.on_app_starting(key);
			let relaunch = async {
				if let Err(err) = device.restart_app(&key.app_id).await {
					warn!(target = "devbridge.handshake", session = %key, error = %err, "could not relaunch the app; start it manually");
				}
				Ok::<(), Error>(())
			};
			let outcome = coordinator.attach_at_launch(relaunch).await?;
			self.check_attach(key, AttachMode::Launch, outcome, options)
		} else {
			let outcome = coordinator.attach_running().await?;
			self.check_attach(key, AttachMode::Running, outcome, options)
		}
	}

	/// An explicit `start` asks for an app that is already running, so it never settles for best effort.
	fn check_attach(&self, key: &SessionKey, mode: AttachMode, outcome: AttachOutcome, options: &DebugOptions) -> Result<()> {
		match (outcome, mode) {
			(AttachOutcome::Ready, _) => Ok(()),
			(AttachOutcome::AlreadyAttached, _) => Err(Error::connectivity(key, "A debugger is already connected")),
			(AttachOutcome::TimedOut, AttachMode::Launch) => Err(Error::Timeout {
				ms: self.config.app_launch_timeout_ms,
				condition: format!("{} to launch and accept the debugger", key.app_id),
			}),
			(AttachOutcome::TimedOut, AttachMode::Running) if self.config.best_effort_attach && !options.start => {
				warn!(target = "devbridge.handshake", session = %key, "attach handshake timed out; continuing");
				Ok(())
			}
			(AttachOutcome::TimedOut, AttachMode::Running) => Err(Error::connectivity(
				key,
				"App is not running or was not built with debugging enabled",
			)),
		}
	}

	/// Log-announced inspector port behind a usbmux forward.
	async fn debug_ios(self: &Arc<Self>, session: &Arc<SessionContext>, options: &DebugOptions) -> Result<DebugResult> {
		let device = session.device.as_ref();
		let key = &session.key;
		// The runtime announces as soon as it accepts the attach, so the scanner must already be up.
		self.ios_discovery.prepare(device, &key.app_id).await?;
		self.handshake(session, options).await?;

		let Some(device_port) = self.ios_discovery.discover_port(device, &key.app_id, self.budget()).await? else {
			return Ok(DebugResult::default());
		};
		let Some(port) = self.hold_forward(session, self.ios_forward(session, format!("tcp:{device_port}"))).await? else {
			return Ok(DebugResult::default());
		};

		let url = self.devtools_url(options, port);
		info!(target = "devbridge.session", session = %key, device_port, port, url = ?url, "ios inspector ready");
		Ok(DebugResult { url, port: Some(port) })
	}

	/// Fixed inspector socket relayed through a local bridge.
	async fn debug_ios_legacy(self: &Arc<Self>, session: &Arc<SessionContext>, options: &DebugOptions) -> Result<DebugResult> {
		self.handshake(session, options).await?;

		let key = &session.key;
		let remote = format!("tcp:{}", self.config.ios_inspector_port);
		let Some(local) = self.hold_forward(session, self.ios_forward(session, remote)).await? else {
			return Ok(DebugResult::default());
		};
		let endpoint = DeviceEndpoint::local_port(local);
		let (events_tx, events_rx) = mpsc::unbounded_channel();

		if options.inspector {
			let path = std::env::temp_dir().join(format!(
				"devbridge-{}-{}.sock",
				socket_safe(&key.device_id),
				socket_safe(&key.app_id)
			));
			let proxy = RawSocketProxy::start(key.clone(), endpoint, path.clone(), self.retry(), events_tx).await?;
			session.set_bridge(proxy);
			self.watch_bridge(session, events_rx);
			if options.client {
				self.spawn_inspector_client(key, &path)?;
			}
			info!(target = "devbridge.session", session = %key, path = %path.display(), "inspector socket ready");
			return Ok(DebugResult::default());
		}

		let bridge = WebSocketBridge::start(key.clone(), endpoint, 0, self.retry(), events_tx).await?;
		let port = bridge.port();
		session.set_bridge(bridge);
		self.watch_bridge(session, events_rx);

		let url = port.and_then(|port| self.devtools_url(options, port));
		Ok(DebugResult { url, port })
	}

	fn ios_forward(&self, session: &SessionContext, remote: String) -> impl Future<Output = Result<Option<u16>>> + Send + use<> {
		let tunnels = Arc::clone(&self.ios_tunnels);
		let device = Arc::clone(&session.device);
		async move { tunnels.ensure_forward(device.as_ref(), &remote).await.map(Some) }
	}

	/// Runs `open` to completion on its own task and hands the port to `session`.
	///
	/// A start abandoned midway (the session was stopped) must not strand a
	/// forward: when the session is already gone by the time the forward
	/// exists, it is removed again here.
	async fn hold_forward<F>(self: &Arc<Self>, session: &Arc<SessionContext>, open: F) -> Result<Option<u16>>
	where
		F: Future<Output = Result<Option<u16>>> + Send + 'static,
	{
		let inner = Arc::clone(self);
		let session = Arc::clone(session);
		let task = tokio::spawn(async move {
			let Some(port) = open.await? else {
				return Ok(None);
			};
			if session.own_forward(port) {
				return Ok(Some(port));
			}
			debug!(target = "devbridge.session", session = %session.key, local_port = port, "session stopped while forwarding; releasing");
			let tunnels = inner.tunnels(session.platform());
			if let Err(err) = tunnels.remove_forward(session.device.as_ref(), port).await {
				warn!(target = "devbridge.session", session = %session.key, local_port = port, error = %err, "could not remove forward");
			}
			Err(Error::connectivity(&session.key, "Debug session was stopped while starting"))
		});
		task.await.map_err(std::io::Error::from)?
	}

	fn spawn_inspector_client(&self, key: &SessionKey, socket: &Path) -> Result<()> {
		let argv: Vec<String> = self
			.config
			.inspector_client
			.iter()
			.map(|arg| {
				arg.replace("{socket}", &socket.to_string_lossy())
					.replace("{app}", &key.app_id)
					.replace("{device}", &key.device_id)
			})
			.collect();
		let Some((program, args)) = argv.split_first() else {
			return Err(Error::Validation("No inspector client command is configured".into()));
		};
		let program = resolve_tool(program, None)?;
		let pid = spawn_detached(&program, args)?;
		info!(target = "devbridge.session", session = %key, pid, "inspector client started");
		Ok(())
	}

	/// Ends the session when its bridge ends, relaying failures as events.
	fn watch_bridge(self: &Arc<Self>, session: &Arc<SessionContext>, mut events: mpsc::UnboundedReceiver<BridgeEvent>) {
		let inner = Arc::clone(self);
		let session = Arc::clone(session);
		tokio::spawn(async move {
			let Some(event) = events.recv().await else {
				return;
			};
			match event {
				BridgeEvent::Failed { message } => {
					warn!(target = "devbridge.session", session = %session.key, error = %message, "debugger connection failed");
					inner.emit(SessionEvent::ConnectionError {
						key: session.key.clone(),
						message,
					});
				}
				BridgeEvent::Closed { reason } => {
					info!(target = "devbridge.session", session = %session.key, reason = %reason, "debugger connection closed");
				}
			}
			inner.teardown(&session).await;
		});
	}

	/// Releases everything `session` owns. Safe to call repeatedly.
	async fn teardown(&self, session: &SessionContext) {
		let first = session.advance(SessionState::Stopped);
		session.cancel();

		if let Some(bridge) = session.take_bridge() {
			bridge.shutdown().await;
		}
		let platform = session.platform();
		self.discovery(platform).clear(&session.key);
		let tunnels = self.tunnels(platform);
		for port in session.take_forwards() {
			if let Err(err) = tunnels.remove_forward(session.device.as_ref(), port).await {
				warn!(target = "devbridge.session", session = %session.key, local_port = port, error = %err, "could not remove forward");
			}
		}

		if first {
			info!(target = "devbridge.session", session = %session.key, "debug session stopped");
			self.emit(SessionEvent::Stopped {
				key: session.key.clone(),
			});
		}
	}
}

/// Host operating systems that can drive each platform's tooling.
fn platform_supported(platform: Platform, host_os: &str) -> bool {
	match platform {
		Platform::Android => matches!(host_os, "macos" | "linux" | "windows"),
		Platform::Ios => matches!(host_os, "macos" | "linux"),
	}
}

fn socket_safe(name: &str) -> String {
	name.chars()
		.map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
		.collect()
}
