//! Relays between a device inspector socket and a local debugger client.
//!
//! The device socket may not be listening yet when a bridge starts, so
//! connecting is retried on a fixed interval. Clients are held until the device
//! side is up. When either side closes, only this bridge shuts down.

mod raw;
mod websocket;

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use devbridge_protocol::SessionKey;
pub use raw::RawSocketProxy;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
pub use websocket::WebSocketBridge;

use crate::error::{Error, Result};

/// Byte stream to the device inspector.
pub trait DeviceIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DeviceIo for T {}

/// Where the device inspector is reachable from this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEndpoint {
	/// A forwarded local TCP port.
	Tcp(SocketAddr),
	Unix(PathBuf),
}

impl DeviceEndpoint {
	pub fn local_port(port: u16) -> Self {
		DeviceEndpoint::Tcp(SocketAddr::from(([127, 0, 0, 1], port)))
	}

	async fn connect(&self) -> std::io::Result<Box<dyn DeviceIo>> {
		Ok(match self {
			DeviceEndpoint::Tcp(addr) => {
				let stream = TcpStream::connect(addr).await?;
				stream.set_nodelay(true)?;
				Box::new(stream)
			}
			DeviceEndpoint::Unix(path) => Box::new(UnixStream::connect(path).await?),
		})
	}
}

impl fmt::Display for DeviceEndpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DeviceEndpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
			DeviceEndpoint::Unix(path) => write!(f, "unix://{}", path.display()),
		}
	}
}

/// Device connection retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub interval: Duration,
	/// Unbounded when `None`.
	pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(1),
			deadline: None,
		}
	}
}

/// Why a bridge ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
	/// One side closed cleanly.
	Closed { reason: String },
	/// Malformed data or a broken socket.
	Failed { message: String },
}

/// Client-facing side of a running bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEndpoint {
	WebSocket { port: u16 },
	UnixSocket { path: PathBuf },
}

/// A running bridge. Dropping the handle does not stop it; call [`BridgeHandle::shutdown`].
pub struct BridgeHandle {
	endpoint: BridgeEndpoint,
	shutdown: Arc<watch::Sender<bool>>,
	task: JoinHandle<()>,
}

impl BridgeHandle {
	/// WebSocket port, for WebSocket bridges.
	pub fn port(&self) -> Option<u16> {
		match self.endpoint {
			BridgeEndpoint::WebSocket { port } => Some(port),
			BridgeEndpoint::UnixSocket { .. } => None,
		}
	}

	/// Signals the bridge to stop and waits for it.
	pub async fn shutdown(self) {
		self.shutdown.send_replace(true);
		let _ = self.task.await;
	}

	/// Signals the bridge to stop without waiting.
	pub fn close(&self) {
		self.shutdown.send_replace(true);
	}
}

/// Shared plumbing handed to a bridge's tasks.
#[derive(Clone)]
pub(crate) struct BridgeContext {
	pub key: SessionKey,
	pub device: DeviceEndpoint,
	pub retry: RetryPolicy,
	pub shutdown: Arc<watch::Sender<bool>>,
	pub events: mpsc::UnboundedSender<BridgeEvent>,
}

impl BridgeContext {
	pub(crate) fn new(
		key: SessionKey,
		device: DeviceEndpoint,
		retry: RetryPolicy,
		events: mpsc::UnboundedSender<BridgeEvent>,
	) -> Self {
		let (shutdown, _) = watch::channel(false);
		Self {
			key,
			device,
			retry,
			shutdown: Arc::new(shutdown),
			events,
		}
	}

	/// Reports the end of the bridge and stops it.
	pub(crate) fn finish(&self, event: BridgeEvent) {
		debug!(target = "devbridge.bridge", session = %self.key, ?event, "bridge finished");
		let _ = self.events.send(event);
		self.shutdown.send_replace(true);
	}

	pub(crate) fn handle(&self, endpoint: BridgeEndpoint, task: JoinHandle<()>) -> BridgeHandle {
		BridgeHandle {
			endpoint,
			shutdown: Arc::clone(&self.shutdown),
			task,
		}
	}

	/// Connects to the device, retrying until it listens, the deadline passes or the bridge stops.
	pub(crate) async fn connect_device(&self) -> Result<Box<dyn DeviceIo>> {
		let mut shutdown = self.shutdown.subscribe();
		let started = Instant::now();
		let mut attempt = 0u32;
		loop {
			attempt += 1;
			match self.device.connect().await {
				Ok(stream) => {
					debug!(target = "devbridge.bridge", session = %self.key, endpoint = %self.device, attempt, "device socket connected");
					return Ok(stream);
				}
				Err(err) => {
					debug!(target = "devbridge.bridge", session = %self.key, endpoint = %self.device, attempt, error = %err, "device socket not ready");
				}
			}

			if let Some(deadline) = self.retry.deadline {
				if started.elapsed() + self.retry.interval > deadline {
					return Err(Error::Timeout {
						ms: deadline.as_millis() as u64,
						condition: format!("device socket {}", self.device),
					});
				}
			}

			if *shutdown.borrow() {
				return Err(self.stopped());
			}
			tokio::select! {
				_ = tokio::time::sleep(self.retry.interval) => {}
				_ = shutdown.changed() => return Err(self.stopped()),
			}
		}
	}

	fn stopped(&self) -> Error {
		Error::Protocol {
			key: self.key.clone(),
			message: "bridge stopped before the device socket connected".into(),
		}
	}
}

#[cfg(test)]
mod tests;
