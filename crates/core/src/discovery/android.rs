//! Android discovery: the inspector is an abstract Unix socket reached through adb.

use std::sync::Arc;

use async_trait::async_trait;
use devbridge_runtime::Device;
use tracing::debug;

use super::{DiscoveryBudget, PortDiscoveryStrategy};
use crate::error::Result;
use crate::tunnel::TunnelManager;

/// Remote socket the Android runtime listens on for `app_id`.
pub fn inspector_socket_name(app_id: &str) -> String {
	format!("localabstract:{app_id}-inspectorServer")
}

/// Looks the port up in the forward table and forwards it when absent.
pub struct AndroidPortDiscovery {
	tunnels: Arc<TunnelManager>,
}

impl AndroidPortDiscovery {
	pub fn new(tunnels: Arc<TunnelManager>) -> Self {
		Self { tunnels }
	}
}

#[async_trait]
impl PortDiscoveryStrategy for AndroidPortDiscovery {
	async fn discover_port(&self, device: &dyn Device, app_id: &str, _budget: DiscoveryBudget) -> Result<Option<u16>> {
		let remote = inspector_socket_name(app_id);
		let port = self.tunnels.ensure_forward(device, &remote).await?;
		debug!(target = "devbridge.discovery", device = device.id(), app = app_id, port, "android inspector port");
		Ok(Some(port))
	}
}
