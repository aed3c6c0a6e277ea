//! Raw Unix-socket proxy for native inspector clients.
//!
//! Bytes pass through untouched; the client speaks the device framing itself.

use std::path::PathBuf;

use devbridge_protocol::SessionKey;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::info;

use super::{BridgeContext, BridgeEndpoint, BridgeEvent, BridgeHandle, DeviceEndpoint, RetryPolicy};
use crate::error::Result;

/// Serves one device inspector on a local Unix socket.
pub struct RawSocketProxy;

impl RawSocketProxy {
	/// Binds `socket_path`, replacing a stale socket file. The file is removed when the proxy ends.
	pub async fn start(
		key: SessionKey,
		device: DeviceEndpoint,
		socket_path: PathBuf,
		retry: RetryPolicy,
		events: mpsc::UnboundedSender<BridgeEvent>,
	) -> Result<BridgeHandle> {
		let ctx = BridgeContext::new(key, device, retry, events);
		let _ = tokio::fs::remove_file(&socket_path).await;
		let listener = UnixListener::bind(&socket_path)?;
		info!(target = "devbridge.bridge", session = %ctx.key, path = %socket_path.display(), "inspector proxy listening");

		let task_ctx = ctx.clone();
		let path = socket_path.clone();
		let task = tokio::spawn(async move {
			let event = proxy(&listener, &task_ctx).await;
			let _ = tokio::fs::remove_file(&path).await;
			task_ctx.finish(event);
		});

		Ok(ctx.handle(BridgeEndpoint::UnixSocket { path: socket_path }, task))
	}
}

async fn proxy(listener: &UnixListener, ctx: &BridgeContext) -> BridgeEvent {
	let mut stop = ctx.shutdown.subscribe();

	let accepted = tokio::select! {
		accepted = listener.accept() => accepted,
		_ = stop.wait_for(|stopped| *stopped) => {
			return BridgeEvent::Closed { reason: "bridge stopped".into() };
		}
	};
	let mut client = match accepted {
		Ok((client, _)) => client,
		Err(err) => {
			return BridgeEvent::Failed {
				message: format!("accept failed: {err}"),
			};
		}
	};

	let mut device = match ctx.connect_device().await {
		Ok(device) => device,
		Err(err) => {
			return BridgeEvent::Failed {
				message: err.to_string(),
			};
		}
	};
	info!(target = "devbridge.bridge", session = %ctx.key, "inspector client attached");

	tokio::select! {
		copied = tokio::io::copy_bidirectional(&mut client, &mut device) => match copied {
			Ok((to_device, to_client)) => BridgeEvent::Closed {
				reason: format!("connection closed after {to_device} bytes up, {to_client} bytes down"),
			},
			Err(err) => BridgeEvent::Failed {
				message: format!("proxy: {err}"),
			},
		},
		_ = stop.wait_for(|stopped| *stopped) => BridgeEvent::Closed { reason: "bridge stopped".into() },
	}
}
