//! Inspector port discovery.
//!
//! One strategy per platform, chosen by [`Platform`] at the orchestrator:
//! Android asks the forward table (creating the forward when missing), iOS
//! scans the device log for the runtime's announcement.
//!
//! [`Platform`]: devbridge_protocol::Platform

mod android;
mod ios;

use std::time::Duration;

pub use android::{AndroidPortDiscovery, inspector_socket_name};
use async_trait::async_trait;
use devbridge_protocol::SessionKey;
use devbridge_runtime::Device;
pub use ios::{IosLogDiscovery, parse_announcement};

use crate::error::Result;

/// How long a discovery may poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryBudget {
	pub interval: Duration,
	pub attempts: u32,
}

impl DiscoveryBudget {
	pub fn total(&self) -> Duration {
		self.interval * self.attempts
	}
}

/// Resolves the live inspector port for one app.
#[async_trait]
pub trait PortDiscoveryStrategy: Send + Sync {
	/// Returns the port, or `None` when the budget ran out. Running out is not an error.
	async fn discover_port(&self, device: &dyn Device, app_id: &str, budget: DiscoveryBudget) -> Result<Option<u16>>;

	/// Starts listening for `app_id` before anything on the device can announce a port.
	async fn prepare(&self, _device: &dyn Device, _app_id: &str) -> Result<()> {
		Ok(())
	}

	/// The app for `key` is (re)starting; any port found before is stale.
	fn on_app_starting(&self, _key: &SessionKey) {}

	/// Drops all state held for `key`.
	fn clear(&self, _key: &SessionKey) {}
}
