use std::time::Duration;

use devbridge_protocol::{FrameDecoder, encode_frame};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::*;

fn key(app: &str) -> SessionKey {
	SessionKey::new("phone", app)
}

fn fast_retry() -> RetryPolicy {
	RetryPolicy {
		interval: Duration::from_millis(50),
		deadline: None,
	}
}

async fn device_listener() -> (TcpListener, u16) {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let port = listener.local_addr().unwrap().port();
	(listener, port)
}

async fn read_frame(device: &mut TcpStream) -> String {
	let mut decoder = FrameDecoder::new();
	let mut buf = [0u8; 256];
	loop {
		let n = device.read(&mut buf).await.unwrap();
		assert!(n > 0, "device socket closed before a frame arrived");
		if let Some(text) = decoder.push(&buf[..n]).unwrap().into_iter().next() {
			return text;
		}
	}
}

async fn next_text<S>(client: &mut S) -> String
where
	S: futures_util::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
	loop {
		match client.next().await {
			Some(Ok(Message::Text(text))) => return text.to_string(),
			Some(Ok(_)) => continue,
			other => panic!("expected a text message, got {other:?}"),
		}
	}
}

#[tokio::test]
async fn websocket_relays_both_directions() {
	let (device_side, device_port) = device_listener().await;
	let (events_tx, mut events) = mpsc::unbounded_channel();
	let bridge = WebSocketBridge::start(key("app"), DeviceEndpoint::local_port(device_port), 0, fast_retry(), events_tx)
		.await
		.unwrap();
	let port = bridge.port().unwrap();

	let (mut client, _) = connect_async(format!("ws://127.0.0.1:{port}/")).await.unwrap();
	let (mut device, _) = device_side.accept().await.unwrap();

	// Device -> client: one frame, one text message, split across writes.
	let frame = encode_frame(r#"{"method":"Debugger.paused","params":{"reason":"ünïcode"}}"#).unwrap();
	let (head, tail) = frame.split_at(5);
	device.write_all(head).await.unwrap();
	device.flush().await.unwrap();
	tokio::time::sleep(Duration::from_millis(20)).await;
	device.write_all(tail).await.unwrap();
	assert_eq!(
		next_text(&mut client).await,
		r#"{"method":"Debugger.paused","params":{"reason":"ünïcode"}}"#
	);

	// Client -> device: one text message becomes one frame.
	client.send(Message::Text(r#"{"id":1,"method":"Debugger.enable"}"#.into())).await.unwrap();
	assert_eq!(read_frame(&mut device).await, r#"{"id":1,"method":"Debugger.enable"}"#);

	// Device EOF tears the bridge down.
	drop(device);
	let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
	assert!(matches!(event, BridgeEvent::Closed { .. }));
	tokio::time::timeout(Duration::from_secs(5), bridge.shutdown()).await.unwrap();
}

#[tokio::test]
async fn upgrade_waits_for_device_socket() {
	// Reserve a port, then release it so nothing listens yet.
	let (reserved, device_port) = device_listener().await;
	drop(reserved);

	let (events_tx, _events) = mpsc::unbounded_channel();
	let bridge = WebSocketBridge::start(key("app"), DeviceEndpoint::local_port(device_port), 0, fast_retry(), events_tx)
		.await
		.unwrap();
	let port = bridge.port().unwrap();

	let connecting = tokio::spawn(async move { connect_async(format!("ws://127.0.0.1:{port}/")).await });
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert!(!connecting.is_finished());

	let device_side = TcpListener::bind(("127.0.0.1", device_port)).await.unwrap();
	let (mut device, _) = device_side.accept().await.unwrap();
	let (mut client, _) = connecting.await.unwrap().unwrap();

	device.write_all(&encode_frame("ready").unwrap()).await.unwrap();
	assert_eq!(next_text(&mut client).await, "ready");
	bridge.shutdown().await;
}

#[tokio::test]
async fn malformed_frame_fails_only_its_session() {
	let (broken_side, broken_port) = device_listener().await;
	let (healthy_side, healthy_port) = device_listener().await;
	let (broken_tx, mut broken_events) = mpsc::unbounded_channel();
	let (healthy_tx, mut healthy_events) = mpsc::unbounded_channel();

	let broken = WebSocketBridge::start(key("a"), DeviceEndpoint::local_port(broken_port), 0, fast_retry(), broken_tx)
		.await
		.unwrap();
	let healthy = WebSocketBridge::start(key("b"), DeviceEndpoint::local_port(healthy_port), 0, fast_retry(), healthy_tx)
		.await
		.unwrap();

	let (mut broken_client, _) = connect_async(format!("ws://127.0.0.1:{}/", broken.port().unwrap()))
		.await
		.unwrap();
	let (mut healthy_client, _) = connect_async(format!("ws://127.0.0.1:{}/", healthy.port().unwrap()))
		.await
		.unwrap();
	let (mut broken_device, _) = broken_side.accept().await.unwrap();
	let (mut healthy_device, _) = healthy_side.accept().await.unwrap();

	// Odd payload length cannot be UTF-16LE.
	broken_device.write_all(&[0, 0, 0, 3, 1, 2, 3]).await.unwrap();
	let event = tokio::time::timeout(Duration::from_secs(5), broken_events.recv())
		.await
		.unwrap()
		.unwrap();
	assert!(matches!(event, BridgeEvent::Failed { .. }));

	// The broken client sees its connection end.
	let ended = tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			match broken_client.next().await {
				Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
				Some(Ok(_)) => {}
			}
		}
	})
	.await;
	assert!(ended.is_ok());

	// The other session keeps relaying.
	healthy_device.write_all(&encode_frame("still here").unwrap()).await.unwrap();
	assert_eq!(next_text(&mut healthy_client).await, "still here");
	assert!(healthy_events.try_recv().is_err());

	healthy.shutdown().await;
	broken.shutdown().await;
}

#[tokio::test]
async fn connect_deadline_rejects_the_client() {
	let (reserved, device_port) = device_listener().await;
	drop(reserved);

	let (events_tx, mut events) = mpsc::unbounded_channel();
	let retry = RetryPolicy {
		interval: Duration::from_millis(50),
		deadline: Some(Duration::from_millis(200)),
	};
	let bridge = WebSocketBridge::start(key("app"), DeviceEndpoint::local_port(device_port), 0, retry, events_tx)
		.await
		.unwrap();

	let result = connect_async(format!("ws://127.0.0.1:{}/", bridge.port().unwrap())).await;
	assert!(result.is_err());
	let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
	assert!(matches!(event, BridgeEvent::Failed { ref message } if message.contains("Timed out")));
	bridge.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_prompt_while_waiting_for_device() {
	let (reserved, device_port) = device_listener().await;
	drop(reserved);
	let (events_tx, _events) = mpsc::unbounded_channel();
	let bridge = WebSocketBridge::start(
		key("app"),
		DeviceEndpoint::local_port(device_port),
		0,
		RetryPolicy::default(),
		events_tx,
	)
	.await
	.unwrap();
	let port = bridge.port().unwrap();
	let _pending = tokio::spawn(async move { connect_async(format!("ws://127.0.0.1:{port}/")).await });
	tokio::time::sleep(Duration::from_millis(100)).await;

	tokio::time::timeout(Duration::from_secs(3), bridge.shutdown()).await.unwrap();
}

#[tokio::test]
async fn raw_proxy_passes_bytes_through() {
	let (device_side, device_port) = device_listener().await;
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("inspector.sock");
	let (events_tx, mut events) = mpsc::unbounded_channel();

	let proxy = RawSocketProxy::start(
		key("app"),
		DeviceEndpoint::local_port(device_port),
		path.clone(),
		fast_retry(),
		events_tx,
	)
	.await
	.unwrap();
	assert_eq!(proxy.port(), None);
	assert!(path.exists());

	let mut client = tokio::net::UnixStream::connect(&path).await.unwrap();
	let (mut device, _) = device_side.accept().await.unwrap();

	client.write_all(&[0, 0, 0, 2, b'x', 0]).await.unwrap();
	let mut up = [0u8; 6];
	device.read_exact(&mut up).await.unwrap();
	assert_eq!(up, [0, 0, 0, 2, b'x', 0]);

	device.write_all(b"raw").await.unwrap();
	let mut down = [0u8; 3];
	client.read_exact(&mut down).await.unwrap();
	assert_eq!(&down, b"raw");

	drop(client);
	drop(device);
	let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
	assert!(matches!(event, BridgeEvent::Closed { .. }));
	proxy.shutdown().await;
	assert!(!path.exists());
}
