//! Locates devices attached to this host.

use std::sync::Arc;

use async_trait::async_trait;
use devbridge_protocol::ConnectionType;
use tracing::debug;

use super::{AdbDevice, Device, DeviceLocator, IosDevice, ToolPaths, parse_adb_devices};
use crate::error::{Error, Result};
use crate::process;

/// Queries adb and libimobiledevice for an identifier.
///
/// A platform whose tools are missing is skipped, so an Android-only host can
/// still resolve Android serials.
#[derive(Debug, Clone, Default)]
pub struct HostDevices {
	tools: ToolPaths,
}

impl HostDevices {
	pub fn new(tools: ToolPaths) -> Self {
		Self { tools }
	}

	async fn find_android(&self, identifier: &str) -> Result<Option<Arc<dyn Device>>> {
		let adb = match self.tools.adb() {
			Ok(path) => path,
			Err(Error::ToolNotFound { .. }) => {
				debug!(target = "devbridge.device", "adb not installed, skipping Android lookup");
				return Ok(None);
			}
			Err(err) => return Err(err),
		};
		let output = process::run(&adb, &["devices"]).await?;
		let found = parse_adb_devices(&output.stdout)
			.into_iter()
			.any(|(serial, _)| serial == identifier);
		Ok(found.then(|| Arc::new(AdbDevice::new(identifier, adb)) as Arc<dyn Device>))
	}

	async fn find_ios(&self, identifier: &str) -> Result<Option<Arc<dyn Device>>> {
		let idevice_id = match self.tools.imobiledevice("idevice_id") {
			Ok(path) => path,
			Err(Error::ToolNotFound { .. }) => {
				debug!(target = "devbridge.device", "idevice_id not installed, skipping iOS lookup");
				return Ok(None);
			}
			Err(err) => return Err(err),
		};
		for (flag, connection) in [("-l", ConnectionType::Usb), ("-n", ConnectionType::Wifi)] {
			let output = match process::run(&idevice_id, &[flag]).await {
				Ok(output) => output,
				Err(err) => {
					debug!(target = "devbridge.device", flag, error = %err, "idevice_id listing failed");
					continue;
				}
			};
			if parse_udids(&output.stdout).iter().any(|udid| udid == identifier) {
				let device = IosDevice::new(identifier, self.tools.clone(), connection);
				return Ok(Some(Arc::new(device)));
			}
		}
		Ok(None)
	}
}

#[async_trait]
impl DeviceLocator for HostDevices {
	async fn find(&self, identifier: &str) -> Result<Option<Arc<dyn Device>>> {
		if let Some(device) = self.find_android(identifier).await? {
			return Ok(Some(device));
		}
		self.find_ios(identifier).await
	}
}

/// UDIDs from `idevice_id` output. Newer releases append ` (USB)` or ` (Network)`.
fn parse_udids(output: &str) -> Vec<String> {
	output
		.lines()
		.filter_map(|line| line.split_whitespace().next())
		.map(str::to_string)
		.collect()
}
