//! Cleanup watchdog daemon.
//!
//! Tunnels outlive a crashed CLI unless something else removes them. Every
//! forward's removal command is registered here together with the pid of the
//! process that created it; the daemon runs the command once that process is
//! gone, or when asked to stop a device.

mod protocol;
mod server;
#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use devbridge::{CleanupCommand, CleanupRegistry};
pub use protocol::{CleanupEntry, DaemonRequest, DaemonResponse};
pub use server::{CommandRunner, Daemon, HostRunner, Incoming, Liveness};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info};

const STARTUP_WAIT: Duration = Duration::from_secs(2);
const STARTUP_POLL: Duration = Duration::from_millis(100);

/// Returns the daemon socket path for the current user.
///
/// Uses `$XDG_RUNTIME_DIR/devbridge-daemon.sock` if available (already user-permissioned),
/// otherwise falls back to `/tmp/devbridge-daemon-{uid}.sock`.
pub fn socket_path() -> PathBuf {
	if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
		return PathBuf::from(xdg_runtime).join("devbridge-daemon.sock");
	}

	let uid = unsafe { libc::getuid() };
	PathBuf::from(format!("/tmp/devbridge-daemon-{uid}.sock"))
}

/// Daemon PID file, next to the socket.
pub fn pid_path() -> PathBuf {
	socket_path().with_extension("pid")
}

/// Pid of the daemon behind `socket`, or `None` when nothing listens there.
pub async fn ping(socket: &Path) -> Result<Option<u32>> {
	match send_request(socket, DaemonRequest::Ping).await {
		Ok(DaemonResponse::Pong { pid }) => Ok(Some(pid)),
		Ok(other) => Err(anyhow!("unexpected daemon response: {other:?}")),
		Err(err) if err.downcast_ref::<std::io::Error>().is_some_and(is_not_running) => Ok(None),
		Err(err) => Err(err),
	}
}

/// Sends one request and reads its response.
pub async fn send_request(socket: &Path, request: DaemonRequest) -> Result<DaemonResponse> {
	let stream = UnixStream::connect(socket).await?;
	send_request_stream(stream, &request).await
}

fn is_not_running(err: &std::io::Error) -> bool {
	matches!(
		err.kind(),
		std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
	)
}

async fn send_request_stream<S>(mut stream: S, request: &DaemonRequest) -> Result<DaemonResponse>
where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
	let payload = serde_json::to_string(request).context("Failed to serialize daemon request")?;
	stream
		.write_all(format!("{payload}\n").as_bytes())
		.await
		.context("Failed writing daemon request")?;
	stream.flush().await.context("Failed flushing daemon request")?;

	let mut reader = BufReader::new(stream);
	let mut line = String::new();
	reader
		.read_line(&mut line)
		.await
		.context("Failed reading daemon response")?;
	let response = serde_json::from_str(&line).context("Failed parsing daemon response")?;
	Ok(response)
}

/// Starts `devbridge daemon start --foreground` detached and waits until it answers.
pub async fn spawn_background(socket: &Path) -> Result<u32> {
	// A fresh process rather than a fork keeps the tokio runtime sane.
	let exe = std::env::current_exe().context("Failed to get executable path")?;
	let child = std::process::Command::new(&exe)
		.args(["daemon", "start", "--foreground"])
		.stdin(std::process::Stdio::null())
		.stdout(std::process::Stdio::null())
		.stderr(std::process::Stdio::null())
		.spawn()
		.context("Failed to spawn daemon")?;
	debug!(target = "devbridge.daemon", pid = child.id(), "spawned daemon");

	let deadline = tokio::time::Instant::now() + STARTUP_WAIT;
	loop {
		if let Some(pid) = ping(socket).await? {
			return Ok(pid);
		}
		if tokio::time::Instant::now() >= deadline {
			bail!("Daemon failed to start within {}ms", STARTUP_WAIT.as_millis());
		}
		tokio::time::sleep(STARTUP_POLL).await;
	}
}

/// [`CleanupRegistry`] backed by the watchdog daemon.
pub struct DaemonCleanup {
	socket: PathBuf,
	owner_pid: Option<u32>,
	autostart: bool,
	starting: tokio::sync::Mutex<()>,
}

impl DaemonCleanup {
	/// Commands run when this process exits.
	pub fn new(socket: PathBuf) -> Self {
		Self {
			socket,
			owner_pid: Some(std::process::id()),
			autostart: true,
			starting: tokio::sync::Mutex::new(()),
		}
	}

	/// Commands stay registered after this process exits, until `devbridge stop`.
	pub fn detached(mut self) -> Self {
		self.owner_pid = None;
		self
	}

	/// Never spawns the daemon; registration fails if it is not running.
	pub fn without_autostart(mut self) -> Self {
		self.autostart = false;
		self
	}

	async fn ensure_running(&self) -> Result<()> {
		let _guard = self.starting.lock().await;
		if ping(&self.socket).await?.is_some() {
			return Ok(());
		}
		if !self.autostart {
			bail!("daemon is not running at {}", self.socket.display());
		}
		let pid = spawn_background(&self.socket).await?;
		info!(target = "devbridge.daemon", pid, "started cleanup daemon");
		Ok(())
	}

	async fn expect_ok(&self, request: DaemonRequest) -> Result<()> {
		match send_request(&self.socket, request).await? {
			DaemonResponse::Ok => Ok(()),
			DaemonResponse::Error { code, message } => Err(anyhow!("daemon error {code}: {message}")),
			other => Err(anyhow!("unexpected daemon response: {other:?}")),
		}
	}
}

fn registry_error(err: anyhow::Error) -> devbridge::Error {
	devbridge::Error::Io(std::io::Error::other(format!("cleanup daemon: {err:#}")))
}

#[async_trait]
impl CleanupRegistry for DaemonCleanup {
	async fn register(&self, command: &CleanupCommand) -> devbridge::Result<()> {
		self.ensure_running().await.map_err(registry_error)?;
		self.expect_ok(DaemonRequest::RegisterCleanup {
			owner_pid: self.owner_pid,
			command: command.clone(),
		})
		.await
		.map_err(registry_error)
	}

	async fn unregister(&self, command: &CleanupCommand) -> devbridge::Result<()> {
		// Nothing can be registered with a daemon that is not running.
		if ping(&self.socket).await.map_err(registry_error)?.is_none() {
			return Ok(());
		}
		self.expect_ok(DaemonRequest::UnregisterCleanup {
			command: command.clone(),
		})
		.await
		.map_err(registry_error)
	}
}
