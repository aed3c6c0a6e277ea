//! WebSocket endpoint for DevTools-style clients.
//!
//! Device frames (big-endian length + UTF-16LE) become WebSocket text
//! messages and back. One client per bridge.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use devbridge_protocol::SessionKey;
use devbridge_runtime::{FrameReader, FrameWriter};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{BridgeContext, BridgeEndpoint, BridgeEvent, BridgeHandle, DeviceEndpoint, DeviceIo, RetryPolicy};
use crate::error::Result;

#[derive(Clone)]
struct WsState {
	ctx: BridgeContext,
	claimed: Arc<AtomicBool>,
}

/// Serves one device inspector as a local WebSocket.
pub struct WebSocketBridge;

impl WebSocketBridge {
	/// Listens on `127.0.0.1:listen_port` (`0` picks a free port).
	///
	/// Returns once listening; the device connection happens when a client arrives.
	pub async fn start(
		key: SessionKey,
		device: DeviceEndpoint,
		listen_port: u16,
		retry: RetryPolicy,
		events: mpsc::UnboundedSender<BridgeEvent>,
	) -> Result<BridgeHandle> {
		let ctx = BridgeContext::new(key, device, retry, events);
		let listener = TcpListener::bind(("127.0.0.1", listen_port)).await?;
		let port = listener.local_addr()?.port();

		let state = WsState {
			ctx: ctx.clone(),
			claimed: Arc::new(AtomicBool::new(false)),
		};
		let app = Router::new()
			.route("/", get(upgrade))
			.route("/{*path}", get(upgrade))
			.with_state(state);

		let mut stop = ctx.shutdown.subscribe();
		let server_ctx = ctx.clone();
		let task = tokio::spawn(async move {
			let served = axum::serve(listener, app)
				.with_graceful_shutdown(async move {
					let _ = stop.wait_for(|stopped| *stopped).await;
				})
				.await;
			if let Err(err) = served {
				server_ctx.finish(BridgeEvent::Failed {
					message: format!("websocket server failed: {err}"),
				});
			}
		});

		info!(target = "devbridge.bridge", session = %ctx.key, port, device = %ctx.device, "websocket bridge listening");
		Ok(ctx.handle(BridgeEndpoint::WebSocket { port }, task))
	}
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
	if state.claimed.swap(true, Ordering::SeqCst) {
		return (StatusCode::CONFLICT, "a debugger is already attached to this session").into_response();
	}

	// The upgrade stalls here until the device socket accepts.
	let device = match state.ctx.connect_device().await {
		Ok(device) => device,
		Err(err) => {
			warn!(target = "devbridge.bridge", session = %state.ctx.key, error = %err, "device socket unreachable");
			state.ctx.finish(BridgeEvent::Failed {
				message: err.to_string(),
			});
			return (StatusCode::BAD_GATEWAY, err.to_string()).into_response();
		}
	};

	let ctx = state.ctx;
	ws.on_upgrade(move |socket| relay(socket, device, ctx))
}

async fn relay(socket: WebSocket, device: Box<dyn DeviceIo>, ctx: BridgeContext) {
	info!(target = "devbridge.bridge", session = %ctx.key, "debugger client attached");

	let (device_read, device_write) = tokio::io::split(device);
	let mut reader = FrameReader::new(device_read);
	let mut writer = FrameWriter::new(device_write);
	let (mut ws_tx, mut ws_rx) = socket.split();
	let mut stop = ctx.shutdown.subscribe();

	let device_to_client = async {
		loop {
			match reader.next_text().await {
				Ok(Some(text)) => {
					if ws_tx.send(Message::Text(text.into())).await.is_err() {
						return BridgeEvent::Closed {
							reason: "debugger client disconnected".into(),
						};
					}
				}
				Ok(None) => {
					return BridgeEvent::Closed {
						reason: "device closed the inspector socket".into(),
					};
				}
				Err(err) => {
					return BridgeEvent::Failed {
						message: format!("device stream: {err}"),
					};
				}
			}
		}
	};

	let client_to_device = async {
		while let Some(message) = ws_rx.next().await {
			match message {
				Ok(Message::Text(text)) => {
					if let Err(err) = writer.send_text(text.as_str()).await {
						return BridgeEvent::Failed {
							message: format!("device write: {err}"),
						};
					}
				}
				Ok(Message::Close(_)) => break,
				Ok(_) => {}
				Err(err) => {
					return BridgeEvent::Closed {
						reason: format!("debugger client error: {err}"),
					};
				}
			}
		}
		BridgeEvent::Closed {
			reason: "debugger client disconnected".into(),
		}
	};

	let event = tokio::select! {
		event = device_to_client => event,
		event = client_to_device => event,
		_ = stop.wait_for(|stopped| *stopped) => BridgeEvent::Closed { reason: "bridge stopped".into() },
	};

	let _ = ws_tx.send(Message::Close(None)).await;
	let _ = writer.close().await;
	ctx.finish(event);
}
