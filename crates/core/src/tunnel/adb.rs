//! adb TCP-to-socket forwards.

use async_trait::async_trait;
use devbridge_protocol::PortForward;
use devbridge_runtime::Device;

use super::TunnelBackend;
use crate::cleanup::CleanupCommand;
use crate::error::Result;

/// Forwards managed with `adb forward`.
#[derive(Debug, Clone)]
pub struct AdbTunnel {
	/// Program named in cleanup commands.
	adb_program: String,
}

impl Default for AdbTunnel {
	fn default() -> Self {
		Self::new("adb")
	}
}

impl AdbTunnel {
	pub fn new(adb_program: impl Into<String>) -> Self {
		Self {
			adb_program: adb_program.into(),
		}
	}
}

#[async_trait]
impl TunnelBackend for AdbTunnel {
	async fn list_forwards(&self, device: &dyn Device) -> Result<Vec<PortForward>> {
		let output = device.exec(&["forward", "--list"]).await?;
		Ok(parse_forward_list(&output))
	}

	async fn create_forward(&self, device: &dyn Device, local_port: u16, remote: &str) -> Result<()> {
		let local = format!("tcp:{local_port}");
		device.exec(&["forward", local.as_str(), remote]).await?;
		Ok(())
	}

	async fn remove_forward(&self, device: &dyn Device, local_port: u16) -> Result<()> {
		let local = format!("tcp:{local_port}");
		match device.exec(&["forward", "--remove", local.as_str()]).await {
			Ok(_) => Ok(()),
			Err(err) if err.stderr().is_some_and(|s| s.contains("not found")) => Ok(()),
			Err(err) => Err(err.into()),
		}
	}

	fn removal_command(&self, device: &dyn Device, local_port: u16, _remote: &str) -> CleanupCommand {
		CleanupCommand::new(
			device.id(),
			self.adb_program.clone(),
			vec![
				"-s".into(),
				device.id().into(),
				"forward".into(),
				"--remove".into(),
				format!("tcp:{local_port}"),
			],
		)
	}
}

/// Parses `adb forward --list` rows: `<serial> tcp:<port> <remote>`.
pub fn parse_forward_list(output: &str) -> Vec<PortForward> {
	output
		.lines()
		.filter_map(|line| {
			let mut parts = line.split_whitespace();
			let device_id = parts.next()?;
			let local_port = parts.next()?.strip_prefix("tcp:")?.parse().ok()?;
			let remote = parts.next()?;
			Some(PortForward {
				local_port,
				remote_socket_name: remote.to_string(),
				device_id: device_id.to_string(),
			})
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn forward_rows_are_parsed() {
		let output = "emulator-5554 tcp:40010 localabstract:com.app-inspectorServer\n\
		              R58M tcp:9222 localabstract:chrome_devtools_remote\n\
		              garbage\n";
		let forwards = parse_forward_list(output);
		assert_eq!(forwards.len(), 2);
		assert_eq!(forwards[0].device_id, "emulator-5554");
		assert_eq!(forwards[0].local_port, 40010);
		assert_eq!(forwards[0].remote_socket_name, "localabstract:com.app-inspectorServer");
		assert_eq!(forwards[1].local_port, 9222);
	}
}
