//! Local-port-to-device tunnels.
//!
//! The device side owns the forward table. [`TunnelManager`] re-reads it on
//! every decision, so forwards created by another invocation are reused and
//! never duplicated.

mod adb;
mod usbmux;

use std::collections::HashSet;
use std::sync::Arc;

pub use adb::{AdbTunnel, parse_forward_list};
use async_trait::async_trait;
use dashmap::DashMap;
use devbridge_protocol::PortForward;
use devbridge_runtime::Device;
use tracing::{debug, info, warn};
pub use usbmux::{HostProcesses, ProcessTable, UsbmuxTunnel, parse_iproxy_table};

use crate::cleanup::{CleanupCommand, CleanupRegistry};
use crate::error::{Error, Result};

/// Platform mechanism behind a forward table.
#[async_trait]
pub trait TunnelBackend: Send + Sync {
	/// Forwards currently live for `device`.
	async fn list_forwards(&self, device: &dyn Device) -> Result<Vec<PortForward>>;

	async fn create_forward(&self, device: &dyn Device, local_port: u16, remote: &str) -> Result<()>;

	/// Removes a forward. Succeeds when it is already gone.
	async fn remove_forward(&self, device: &dyn Device, local_port: u16) -> Result<()>;

	/// Standalone, idempotent host command that removes the forward.
	fn removal_command(&self, device: &dyn Device, local_port: u16, remote: &str) -> CleanupCommand;
}

/// Returns `true` when a local port can be bound.
pub type PortProbe = Arc<dyn Fn(u16) -> bool + Send + Sync>;

/// Allocates, reuses and removes forwards for one platform.
pub struct TunnelManager {
	backend: Arc<dyn TunnelBackend>,
	cleanup: Arc<dyn CleanupRegistry>,
	base_port: u16,
	probe: PortProbe,
	allocation: tokio::sync::Mutex<()>,
	registered: DashMap<(String, u16), CleanupCommand>,
}

impl TunnelManager {
	pub fn new(backend: Arc<dyn TunnelBackend>, cleanup: Arc<dyn CleanupRegistry>, base_port: u16) -> Self {
		Self {
			backend,
			cleanup,
			base_port,
			probe: Arc::new(devbridge_runtime::port_available),
			allocation: tokio::sync::Mutex::new(()),
			registered: DashMap::new(),
		}
	}

	/// Replaces the bindability check used during allocation.
	pub fn with_probe(mut self, probe: PortProbe) -> Self {
		self.probe = probe;
		self
	}

	/// Local port already forwarded to `remote` on `device`, if any.
	pub async fn find_forward(&self, device: &dyn Device, remote: &str) -> Result<Option<u16>> {
		let table = self.backend.list_forwards(device).await?;
		Ok(table
			.iter()
			.find(|f| f.device_id == device.id() && f.remote_socket_name == remote)
			.map(|f| f.local_port))
	}

	/// Returns the local port forwarded to `remote`, creating the forward if needed.
	pub async fn ensure_forward(&self, device: &dyn Device, remote: &str) -> Result<u16> {
		let _guard = self.allocation.lock().await;

		let table = self.backend.list_forwards(device).await?;
		if let Some(existing) = table
			.iter()
			.find(|f| f.device_id == device.id() && f.remote_socket_name == remote)
		{
			debug!(
				target = "devbridge.tunnel",
				device = device.id(),
				remote,
				local_port = existing.local_port,
				"reusing forward"
			);
			return Ok(existing.local_port);
		}

		let taken: HashSet<u16> = table.iter().map(|f| f.local_port).collect();
		let local_port = self.allocate(&taken)?;
		self.backend.create_forward(device, local_port, remote).await?;
		info!(target = "devbridge.tunnel", device = device.id(), remote, local_port, "created forward");

		let command = self.backend.removal_command(device, local_port, remote);
		if let Err(err) = self.cleanup.register(&command).await {
			warn!(
				target = "devbridge.tunnel",
				command = %command,
				error = %err,
				"could not register cleanup; forward will outlive a crash"
			);
		}
		self.registered.insert((device.id().to_string(), local_port), command);
		Ok(local_port)
	}

	/// Tears down the forward on `local_port` and unregisters its cleanup.
	pub async fn remove_forward(&self, device: &dyn Device, local_port: u16) -> Result<()> {
		let command = match self.registered.remove(&(device.id().to_string(), local_port)) {
			Some((_, command)) => Some(command),
			None => self
				.backend
				.list_forwards(device)
				.await?
				.into_iter()
				.find(|f| f.device_id == device.id() && f.local_port == local_port)
				.map(|f| self.backend.removal_command(device, local_port, &f.remote_socket_name)),
		};

		self.backend.remove_forward(device, local_port).await?;
		debug!(target = "devbridge.tunnel", device = device.id(), local_port, "removed forward");

		if let Some(command) = command {
			if let Err(err) = self.cleanup.unregister(&command).await {
				warn!(target = "devbridge.tunnel", command = %command, error = %err, "could not unregister cleanup");
			}
		}
		Ok(())
	}

	fn allocate(&self, taken: &HashSet<u16>) -> Result<u16> {
		(self.base_port..=u16::MAX)
			.find(|port| !taken.contains(port) && (self.probe)(*port))
			.ok_or_else(|| Error::Validation(format!("No free local port at or above {}", self.base_port)))
	}
}
