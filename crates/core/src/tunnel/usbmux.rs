//! iOS forwards through usbmuxd, one detached `iproxy` per forward.
//!
//! There is no daemon-side table to query, so the host process list is the
//! table: every live `iproxy <local> <device> -u <udid>` is a forward.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use devbridge_protocol::PortForward;
use devbridge_runtime::Device;
use devbridge_runtime::process::{self, resolve_tool};

use super::TunnelBackend;
use crate::cleanup::CleanupCommand;
use crate::error::{Error, Result};

/// Host process operations the iOS tunnel depends on.
#[async_trait]
pub trait ProcessTable: Send + Sync {
	/// `ps -Ao pid=,args=` style listing.
	async fn snapshot(&self) -> Result<String>;

	/// Starts a detached process and returns its pid.
	fn spawn(&self, program: &str, args: &[String]) -> Result<u32>;

	/// Kills processes whose command line matches `pattern`. No match is success.
	async fn kill_matching(&self, pattern: &str) -> Result<()>;
}

/// The real process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostProcesses;

#[async_trait]
impl ProcessTable for HostProcesses {
	async fn snapshot(&self) -> Result<String> {
		let ps = resolve_tool("ps", None)?;
		Ok(process::run(&ps, &["-Ao", "pid=,args="]).await?.stdout)
	}

	fn spawn(&self, program: &str, args: &[String]) -> Result<u32> {
		let program = resolve_tool(program, Some(Path::new(program)).filter(|p| p.is_absolute()))?;
		Ok(process::spawn_detached(&program, args)?)
	}

	async fn kill_matching(&self, pattern: &str) -> Result<()> {
		let pkill = resolve_tool("pkill", None)?;
		let output = process::run_unchecked(&pkill, &["-f", pattern]).await?;
		// pkill exits 1 when nothing matched.
		match output.code {
			Some(0) | Some(1) => Ok(()),
			code => Err(devbridge_runtime::Error::CommandFailed {
				command: format!("pkill -f {pattern}"),
				code,
				stderr: output.stderr,
			}
			.into()),
		}
	}
}

/// Forwards backed by `iproxy`.
pub struct UsbmuxTunnel {
	iproxy: String,
	processes: Arc<dyn ProcessTable>,
}

impl UsbmuxTunnel {
	pub fn new(iproxy: impl Into<String>, processes: Arc<dyn ProcessTable>) -> Self {
		Self {
			iproxy: iproxy.into(),
			processes,
		}
	}
}

impl Default for UsbmuxTunnel {
	fn default() -> Self {
		Self::new("iproxy", Arc::new(HostProcesses))
	}
}

fn kill_pattern(local_port: u16, device_port: &str, udid: &str) -> String {
	format!("iproxy {local_port} {device_port} -u {udid}")
}

fn device_port(remote: &str) -> Result<&str> {
	remote
		.strip_prefix("tcp:")
		.filter(|p| p.parse::<u16>().is_ok())
		.ok_or_else(|| Error::Validation(format!("iOS forwards need a tcp:<port> remote, got {remote}")))
}

#[async_trait]
impl TunnelBackend for UsbmuxTunnel {
	async fn list_forwards(&self, device: &dyn Device) -> Result<Vec<PortForward>> {
		let table = self.processes.snapshot().await?;
		Ok(parse_iproxy_table(&table)
			.into_iter()
			.filter(|f| f.device_id == device.id())
			.collect())
	}

	async fn create_forward(&self, device: &dyn Device, local_port: u16, remote: &str) -> Result<()> {
		let port = device_port(remote)?;
		let args = vec![local_port.to_string(), port.to_string(), "-u".into(), device.id().to_string()];
		self.processes.spawn(&self.iproxy, &args)?;
		Ok(())
	}

	async fn remove_forward(&self, device: &dyn Device, local_port: u16) -> Result<()> {
		let live = self.list_forwards(device).await?;
		for forward in live.iter().filter(|f| f.local_port == local_port) {
			let port = device_port(&forward.remote_socket_name)?;
			self.processes
				.kill_matching(&kill_pattern(local_port, port, device.id()))
				.await?;
		}
		Ok(())
	}

	fn removal_command(&self, device: &dyn Device, local_port: u16, remote: &str) -> CleanupCommand {
		let port = remote.strip_prefix("tcp:").unwrap_or(remote);
		CleanupCommand::new(
			device.id(),
			"pkill",
			vec!["-f".into(), kill_pattern(local_port, port, device.id())],
		)
	}
}

/// Extracts forwards from a `pid args` process listing.
///
/// Understands the positional form `iproxy <local> <device> -u <udid>` and the
/// newer `iproxy <local>:<device> -u <udid>`.
pub fn parse_iproxy_table(table: &str) -> Vec<PortForward> {
	table
		.lines()
		.filter_map(|line| {
			let tokens: Vec<&str> = line.split_whitespace().collect();
			let start = tokens
				.iter()
				.position(|t| Path::new(t).file_name().is_some_and(|name| name == "iproxy"))?;
			let rest = &tokens[start + 1..];
			let (local, device, after) = match rest.first()?.split_once(':') {
				Some((local, device)) => (local, device, &rest[1..]),
				None => (*rest.first()?, *rest.get(1)?, rest.get(2..)?),
			};
			let local_port: u16 = local.parse().ok()?;
			let device_port: u16 = device.parse().ok()?;
			let udid = after
				.windows(2)
				.find(|pair| pair[0] == "-u" || pair[0] == "--udid")
				.map(|pair| pair[1])?;
			Some(PortForward {
				local_port,
				remote_socket_name: format!("tcp:{device_port}"),
				device_id: udid.to_string(),
			})
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use parking_lot::Mutex;

	use devbridge_runtime::testing::FakeDevice;

	use super::*;

	#[derive(Default)]
	struct FakeProcesses {
		rows: Mutex<Vec<(u32, String)>>,
		killed: Mutex<Vec<String>>,
	}

	#[async_trait]
	impl ProcessTable for FakeProcesses {
		async fn snapshot(&self) -> Result<String> {
			Ok(self
				.rows
				.lock()
				.iter()
				.map(|(pid, args)| format!("{pid:>6} {args}\n"))
				.collect())
		}

		fn spawn(&self, program: &str, args: &[String]) -> Result<u32> {
			let mut rows = self.rows.lock();
			let pid = 1000 + rows.len() as u32;
			rows.push((pid, format!("{program} {}", args.join(" "))));
			Ok(pid)
		}

		async fn kill_matching(&self, pattern: &str) -> Result<()> {
			self.rows.lock().retain(|(_, args)| !args.contains(pattern));
			self.killed.lock().push(pattern.to_string());
			Ok(())
		}
	}

	#[test]
	fn both_iproxy_syntaxes_parse() {
		let table = "  101 /usr/local/bin/iproxy 40000 18181 -u 00008030-001A\n\
		             102 iproxy 40001:9229 --udid 00008101-0002\n\
		             103 /usr/bin/ssh host\n\
		             104 iproxy 40002 18181\n";
		let forwards = parse_iproxy_table(table);
		assert_eq!(forwards.len(), 2);
		assert_eq!(forwards[0].local_port, 40000);
		assert_eq!(forwards[0].remote_socket_name, "tcp:18181");
		assert_eq!(forwards[0].device_id, "00008030-001A");
		assert_eq!(forwards[1].local_port, 40001);
		assert_eq!(forwards[1].remote_socket_name, "tcp:9229");
	}

	#[tokio::test]
	async fn forwards_are_processes() {
		let processes = Arc::new(FakeProcesses::default());
		let tunnel = UsbmuxTunnel::new("iproxy", processes.clone());
		let device = FakeDevice::ios("udid-1");

		tunnel.create_forward(&device, 40000, "tcp:18181").await.unwrap();
		let live = tunnel.list_forwards(&device).await.unwrap();
		assert_eq!(live.len(), 1);
		assert_eq!(live[0].remote_socket_name, "tcp:18181");

		tunnel.remove_forward(&device, 40000).await.unwrap();
		assert!(tunnel.list_forwards(&device).await.unwrap().is_empty());
		assert_eq!(*processes.killed.lock(), vec!["iproxy 40000 18181 -u udid-1".to_string()]);

		// Second removal finds nothing and kills nothing.
		tunnel.remove_forward(&device, 40000).await.unwrap();
		assert_eq!(processes.killed.lock().len(), 1);
	}

	#[test]
	fn removal_command_is_pkill() {
		let tunnel = UsbmuxTunnel::new("iproxy", Arc::new(FakeProcesses::default()));
		let device = FakeDevice::ios("udid-1");
		let cmd = tunnel.removal_command(&device, 40000, "tcp:18181");
		assert_eq!(cmd.program, "pkill");
		assert_eq!(cmd.args, vec!["-f".to_string(), "iproxy 40000 18181 -u udid-1".to_string()]);
	}

	#[tokio::test]
	async fn non_tcp_remote_is_rejected() {
		let tunnel = UsbmuxTunnel::new("iproxy", Arc::new(FakeProcesses::default()));
		let device = FakeDevice::ios("udid-1");
		let err = tunnel
			.create_forward(&device, 40000, "localabstract:x")
			.await
			.unwrap_err();
		assert!(matches!(err, Error::Validation(_)));
	}
}
