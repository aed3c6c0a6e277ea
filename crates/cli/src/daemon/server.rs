use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use devbridge::CleanupCommand;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use super::protocol::{CleanupEntry, DaemonRequest, DaemonResponse};

const CHECK_INTERVAL: Duration = Duration::from_secs(1);
/// Pause after a failed accept so a persistent error (EMFILE) can't spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Executes cleanup commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
	async fn run(&self, command: &CleanupCommand) -> Result<()>;
}

/// Runs cleanup commands as host processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostRunner;

#[async_trait]
impl CommandRunner for HostRunner {
	async fn run(&self, command: &CleanupCommand) -> Result<()> {
		let output = tokio::process::Command::new(&command.program)
			.args(&command.args)
			.stdin(std::process::Stdio::null())
			.output()
			.await
			.with_context(|| format!("Failed to start `{command}`"))?;
		if !output.status.success() {
			bail!(
				"`{command}` exited with {}: {}",
				output.status,
				String::from_utf8_lossy(&output.stderr).trim()
			);
		}
		Ok(())
	}
}

pub type Liveness = Arc<dyn Fn(u32) -> bool + Send + Sync>;

/// Pending cleanup commands, at most one entry per command.
#[derive(Debug, Default)]
pub(crate) struct Registry {
	entries: Vec<CleanupEntry>,
}

impl Registry {
	/// Adds `command`, or moves an existing entry to the new owner.
	pub(crate) fn register(&mut self, owner_pid: Option<u32>, command: CleanupCommand) {
		if let Some(existing) = self.entries.iter_mut().find(|e| e.command == command) {
			existing.owner_pid = owner_pid;
			return;
		}
		self.entries.push(CleanupEntry {
			owner_pid,
			command,
			registered_at: now_ts(),
		});
	}

	pub(crate) fn unregister(&mut self, command: &CleanupCommand) -> bool {
		let before = self.entries.len();
		self.entries.retain(|e| &e.command != command);
		self.entries.len() != before
	}

	pub(crate) fn take_device(&mut self, device_id: &str) -> Vec<CleanupEntry> {
		self.take_where(|e| e.command.device_id == device_id)
	}

	/// Entries whose owner process has exited.
	pub(crate) fn take_orphans(&mut self, alive: &dyn Fn(u32) -> bool) -> Vec<CleanupEntry> {
		self.take_where(|e| e.owner_pid.is_some_and(|pid| !alive(pid)))
	}

	pub(crate) fn take_all(&mut self) -> Vec<CleanupEntry> {
		std::mem::take(&mut self.entries)
	}

	pub(crate) fn list(&self) -> Vec<CleanupEntry> {
		self.entries.clone()
	}

	fn take_where(&mut self, pred: impl Fn(&CleanupEntry) -> bool) -> Vec<CleanupEntry> {
		let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries).into_iter().partition(|e| pred(e));
		self.entries = kept;
		taken
	}
}

struct DaemonState {
	registry: Mutex<Registry>,
	runner: Arc<dyn CommandRunner>,
	alive: Liveness,
	shutdown_tx: watch::Sender<bool>,
}

impl DaemonState {
	/// Runs `entries`, logging failures. Commands are idempotent, so nothing is retried.
	async fn execute(&self, entries: Vec<CleanupEntry>, reason: &str) -> usize {
		let count = entries.len();
		for entry in entries {
			match self.runner.run(&entry.command).await {
				Ok(()) => info!(target = "devbridge.daemon", command = %entry.command, reason, "cleanup ran"),
				Err(err) => warn!(target = "devbridge.daemon", command = %entry.command, reason, error = %err, "cleanup failed"),
			}
		}
		count
	}

	async fn reap_orphans(&self) {
		let orphans = self.registry.lock().await.take_orphans(self.alive.as_ref());
		if !orphans.is_empty() {
			self.execute(orphans, "owner exited").await;
		}
	}

	async fn run_all(&self, reason: &str) -> usize {
		let entries = self.registry.lock().await.take_all();
		self.execute(entries, reason).await
	}
}

/// Source of client connections.
#[async_trait]
pub trait Incoming: Send + 'static {
	type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

	async fn accept_client(&mut self) -> std::io::Result<Self::Stream>;
}

#[async_trait]
impl Incoming for UnixListener {
	type Stream = UnixStream;

	async fn accept_client(&mut self) -> std::io::Result<UnixStream> {
		self.accept().await.map(|(stream, _)| stream)
	}
}

/// Cleanup watchdog listening on a Unix socket.
pub struct Daemon<L = UnixListener> {
	listener: L,
	socket_path: PathBuf,
	runner: Arc<dyn CommandRunner>,
	alive: Liveness,
	check_interval: Duration,
}

impl Daemon {
	/// Binds `socket_path`, replacing a stale socket file.
	pub async fn bind(socket_path: &Path) -> Result<Self> {
		if socket_path.exists() {
			std::fs::remove_file(socket_path)
				.with_context(|| format!("Failed to remove existing socket: {}", socket_path.display()))?;
		}
		if let Some(parent) = socket_path.parent() {
			if !parent.exists() {
				std::fs::create_dir_all(parent)
					.with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
			}
		}
		let listener = UnixListener::bind(socket_path)
			.with_context(|| format!("Failed to bind daemon socket: {}", socket_path.display()))?;
		info!(target = "devbridge.daemon", socket = %socket_path.display(), "daemon listening");

		Ok(Self {
			listener,
			socket_path: socket_path.to_path_buf(),
			runner: Arc::new(HostRunner),
			alive: Arc::new(devbridge_runtime::pid_is_alive),
			check_interval: CHECK_INTERVAL,
		})
	}
}

impl<L: Incoming> Daemon<L> {
	/// Wraps the connection source, keeping the bound socket path.
	#[cfg(test)]
	pub(crate) fn with_incoming<M: Incoming>(self, wrap: impl FnOnce(L) -> M) -> Daemon<M> {
		Daemon {
			listener: wrap(self.listener),
			socket_path: self.socket_path,
			runner: self.runner,
			alive: self.alive,
			check_interval: self.check_interval,
		}
	}

	pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
		self.runner = runner;
		self
	}

	/// Replaces the owner liveness check.
	pub fn with_liveness(mut self, alive: Liveness) -> Self {
		self.alive = alive;
		self
	}

	pub fn with_check_interval(mut self, interval: Duration) -> Self {
		self.check_interval = interval;
		self
	}

	/// Serves requests until `Shutdown`, SIGTERM or SIGINT.
	pub async fn run(self) -> Result<()> {
		use tokio::signal::unix::{SignalKind, signal};

		let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
		let state = Arc::new(DaemonState {
			registry: Mutex::new(Registry::default()),
			runner: self.runner,
			alive: self.alive,
			shutdown_tx,
		});
		let mut listener = self.listener;

		let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
		let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
		let mut ticker = tokio::time::interval(self.check_interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = shutdown_rx.changed() => {
					if *shutdown_rx.borrow() {
						info!(target = "devbridge.daemon", "shutdown requested via message");
						break;
					}
				}
				_ = sigterm.recv() => {
					info!(target = "devbridge.daemon", "received SIGTERM, shutting down");
					state.run_all("daemon stopping").await;
					break;
				}
				_ = sigint.recv() => {
					info!(target = "devbridge.daemon", "received SIGINT, shutting down");
					state.run_all("daemon stopping").await;
					break;
				}
				_ = ticker.tick() => state.reap_orphans().await,
				accept = listener.accept_client() => match accept {
					Ok(stream) => {
						let state = Arc::clone(&state);
						tokio::spawn(async move {
							if let Err(err) = handle_client(stream, state).await {
								warn!(target = "devbridge.daemon", error = %err, "daemon connection error");
							}
						});
					}
					Err(err) => {
						warn!(target = "devbridge.daemon", error = %err, "daemon accept failed; still serving");
						tokio::time::sleep(ACCEPT_BACKOFF).await;
					}
				},
			}
		}

		let _ = std::fs::remove_file(&self.socket_path);
		Ok(())
	}
}

async fn handle_client<S>(stream: S, state: Arc<DaemonState>) -> Result<()>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	let (read_half, mut write_half) = tokio::io::split(stream);
	let mut reader = BufReader::new(read_half);
	let mut line = String::new();

	loop {
		line.clear();
		let bytes = reader
			.read_line(&mut line)
			.await
			.context("Failed reading daemon request")?;
		if bytes == 0 {
			break;
		}

		let (response, stop) = match serde_json::from_str::<DaemonRequest>(line.trim_end()) {
			Ok(request) => {
				let stop = request == DaemonRequest::Shutdown;
				(handle_request(&state, request).await, stop)
			}
			Err(err) => (
				DaemonResponse::Error {
					code: "invalid_request".to_string(),
					message: err.to_string(),
				},
				false,
			),
		};
		write_response(&mut write_half, &response).await?;

		// Acknowledge before the accept loop exits.
		if stop {
			let _ = state.shutdown_tx.send(true);
			break;
		}
	}

	Ok(())
}

async fn write_response<W>(writer: &mut W, response: &DaemonResponse) -> Result<()>
where
	W: tokio::io::AsyncWrite + Unpin,
{
	let payload = serde_json::to_string(response).context("Failed to serialize response")?;
	writer
		.write_all(format!("{payload}\n").as_bytes())
		.await
		.context("Failed writing daemon response")?;
	writer.flush().await.context("Failed flushing daemon response")?;
	Ok(())
}

async fn handle_request(state: &DaemonState, request: DaemonRequest) -> DaemonResponse {
	match request {
		DaemonRequest::Ping => DaemonResponse::Pong {
			pid: std::process::id(),
		},
		DaemonRequest::RegisterCleanup { owner_pid, command } => {
			debug!(target = "devbridge.daemon", command = %command, owner_pid, "cleanup registered");
			state.registry.lock().await.register(owner_pid, command);
			DaemonResponse::Ok
		}
		DaemonRequest::UnregisterCleanup { command } => {
			let removed = state.registry.lock().await.unregister(&command);
			debug!(target = "devbridge.daemon", command = %command, removed, "cleanup unregistered");
			DaemonResponse::Ok
		}
		DaemonRequest::RunCleanup { device_id } => {
			let entries = state.registry.lock().await.take_device(&device_id);
			let count = state.execute(entries, "stop requested").await;
			DaemonResponse::Ran { count }
		}
		DaemonRequest::ListCleanup => DaemonResponse::Cleanup {
			list: state.registry.lock().await.list(),
		},
		DaemonRequest::Shutdown => {
			let count = state.run_all("daemon stopping").await;
			debug!(target = "devbridge.daemon", count, "pending cleanup ran before shutdown");
			DaemonResponse::Ok
		}
	}
}

fn now_ts() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}
