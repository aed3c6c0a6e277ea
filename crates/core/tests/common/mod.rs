#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devbridge::testing::RecordingCleanup;
use devbridge::{CleanupCommand, DebugConfig, DebugService, Result, SessionEvent, TunnelBackend};
use devbridge_protocol::PortForward;
use devbridge_runtime::Device;
use devbridge_runtime::testing::{FakeDevice, FakeLocator};
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Forward table kept in memory, standing in for usbmux.
#[derive(Default)]
pub struct MemoryTunnel {
	forwards: Mutex<Vec<PortForward>>,
}

impl MemoryTunnel {
	pub fn seeded(device_id: &str, local_port: u16, remote: &str) -> Self {
		let tunnel = Self::default();
		tunnel.forwards.lock().push(PortForward {
			local_port,
			remote_socket_name: remote.to_string(),
			device_id: device_id.to_string(),
		});
		tunnel
	}

	pub fn forwards(&self) -> Vec<PortForward> {
		self.forwards.lock().clone()
	}
}

#[async_trait]
impl TunnelBackend for MemoryTunnel {
	async fn list_forwards(&self, device: &dyn Device) -> Result<Vec<PortForward>> {
		Ok(self
			.forwards
			.lock()
			.iter()
			.filter(|f| f.device_id == device.id())
			.cloned()
			.collect())
	}

	async fn create_forward(&self, device: &dyn Device, local_port: u16, remote: &str) -> Result<()> {
		self.forwards.lock().push(PortForward {
			local_port,
			remote_socket_name: remote.to_string(),
			device_id: device.id().to_string(),
		});
		Ok(())
	}

	async fn remove_forward(&self, device: &dyn Device, local_port: u16) -> Result<()> {
		self.forwards
			.lock()
			.retain(|f| !(f.device_id == device.id() && f.local_port == local_port));
		Ok(())
	}

	fn removal_command(&self, device: &dyn Device, local_port: u16, _remote: &str) -> CleanupCommand {
		CleanupCommand::new(device.id(), "unforward", vec![local_port.to_string()])
	}
}

pub struct Harness {
	pub service: DebugService,
	pub cleanup: Arc<RecordingCleanup>,
	pub ios_tunnel: Arc<MemoryTunnel>,
}

/// Service over `devices`, with every local port above `min_port` bindable.
pub fn harness(devices: &[Arc<FakeDevice>], config: DebugConfig, ios_tunnel: MemoryTunnel, min_port: u16) -> Harness {
	harness_with_cleanup(devices, config, ios_tunnel, min_port, RecordingCleanup::new())
}

pub fn harness_with_cleanup(
	devices: &[Arc<FakeDevice>],
	config: DebugConfig,
	ios_tunnel: MemoryTunnel,
	min_port: u16,
	cleanup: RecordingCleanup,
) -> Harness {
	let locator = devices
		.iter()
		.fold(FakeLocator::new(), |locator, device| locator.with(Arc::clone(device) as Arc<dyn Device>));
	let cleanup = Arc::new(cleanup);
	let ios_tunnel = Arc::new(ios_tunnel);
	let service = DebugService::builder(Arc::new(locator))
		.config(config)
		.cleanup(Arc::clone(&cleanup) as _)
		.ios_tunnel(Arc::clone(&ios_tunnel) as _)
		.port_probe(Arc::new(move |port: u16| port >= min_port))
		.build();
	Harness {
		service,
		cleanup,
		ios_tunnel,
	}
}

/// Next event, failing the test if none arrives within five seconds.
pub async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
	tokio::time::timeout(Duration::from_secs(5), events.recv())
		.await
		.expect("no session event within five seconds")
		.expect("event channel closed")
}
