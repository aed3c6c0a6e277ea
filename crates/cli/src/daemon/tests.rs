use std::sync::{Arc, Mutex};
use std::time::Duration;

use devbridge::{CleanupCommand, CleanupRegistry};
use tokio::net::UnixListener;

use super::server::Registry;
use super::*;

#[derive(Default)]
struct RecordingRunner {
	ran: Mutex<Vec<CleanupCommand>>,
}

impl RecordingRunner {
	fn ran(&self) -> Vec<CleanupCommand> {
		self.ran.lock().unwrap().clone()
	}
}

#[async_trait]
impl CommandRunner for RecordingRunner {
	async fn run(&self, command: &CleanupCommand) -> Result<()> {
		self.ran.lock().unwrap().push(command.clone());
		Ok(())
	}
}

const DEAD_OWNER: u32 = 999_999;

fn unforward(device: &str, port: u16) -> CleanupCommand {
	CleanupCommand::new(
		device,
		"adb",
		vec!["-s".into(), device.into(), "forward".into(), "--remove".into(), format!("tcp:{port}")],
	)
}

struct TestDaemon {
	_dir: tempfile::TempDir,
	socket: PathBuf,
	runner: Arc<RecordingRunner>,
	task: tokio::task::JoinHandle<Result<()>>,
}

async fn start_daemon() -> TestDaemon {
	let dir = tempfile::tempdir().unwrap();
	let socket = dir.path().join("daemon.sock");
	let runner = Arc::new(RecordingRunner::default());
	let daemon = Daemon::bind(&socket)
		.await
		.unwrap()
		.with_runner(Arc::clone(&runner) as Arc<dyn CommandRunner>)
		.with_liveness(Arc::new(|pid: u32| pid != DEAD_OWNER))
		.with_check_interval(Duration::from_millis(20));
	let task = tokio::spawn(daemon.run());
	TestDaemon {
		_dir: dir,
		socket,
		runner,
		task,
	}
}

async fn list(socket: &Path) -> Vec<CleanupEntry> {
	match send_request(socket, DaemonRequest::ListCleanup).await.unwrap() {
		DaemonResponse::Cleanup { list } => list,
		other => panic!("unexpected response: {other:?}"),
	}
}

#[test]
fn registry_keeps_one_entry_per_command() {
	let mut registry = Registry::default();
	registry.register(Some(1), unforward("emu", 40000));
	registry.register(Some(2), unforward("emu", 40000));
	registry.register(None, unforward("phone", 40001));

	let entries = registry.list();
	assert_eq!(entries.len(), 2);
	assert_eq!(entries[0].owner_pid, Some(2));

	let orphans = registry.take_orphans(&|pid| pid != 2);
	assert!(orphans.is_empty(), "entries without an owner are never orphans");
	let orphans = registry.take_orphans(&|_| false);
	assert_eq!(orphans.len(), 1);
	assert_eq!(registry.take_all().len(), 1);
}

#[tokio::test]
async fn register_list_unregister_over_socket() {
	let daemon = start_daemon().await;

	assert_eq!(ping(&daemon.socket).await.unwrap(), Some(std::process::id()));

	let command = unforward("emu", 40000);
	let response = send_request(
		&daemon.socket,
		DaemonRequest::RegisterCleanup {
			owner_pid: Some(std::process::id()),
			command: command.clone(),
		},
	)
	.await
	.unwrap();
	assert_eq!(response, DaemonResponse::Ok);
	assert_eq!(list(&daemon.socket).await[0].command, command);

	send_request(&daemon.socket, DaemonRequest::UnregisterCleanup { command })
		.await
		.unwrap();
	assert!(list(&daemon.socket).await.is_empty());
	assert!(daemon.runner.ran().is_empty());
}

#[tokio::test]
async fn run_cleanup_only_touches_the_device() {
	let daemon = start_daemon().await;
	for command in [unforward("emu-1", 40000), unforward("emu-1", 40001), unforward("emu-2", 40000)] {
		send_request(
			&daemon.socket,
			DaemonRequest::RegisterCleanup {
				owner_pid: None,
				command,
			},
		)
		.await
		.unwrap();
	}

	let response = send_request(
		&daemon.socket,
		DaemonRequest::RunCleanup {
			device_id: "emu-1".into(),
		},
	)
	.await
	.unwrap();

	assert_eq!(response, DaemonResponse::Ran { count: 2 });
	assert!(daemon.runner.ran().iter().all(|c| c.device_id == "emu-1"));
	let remaining = list(&daemon.socket).await;
	assert_eq!(remaining.len(), 1);
	assert_eq!(remaining[0].command.device_id, "emu-2");
}

#[tokio::test]
async fn dead_owner_triggers_cleanup() {
	let daemon = start_daemon().await;
	send_request(
		&daemon.socket,
		DaemonRequest::RegisterCleanup {
			owner_pid: Some(DEAD_OWNER),
			command: unforward("emu", 40000),
		},
	)
	.await
	.unwrap();
	send_request(
		&daemon.socket,
		DaemonRequest::RegisterCleanup {
			owner_pid: Some(std::process::id()),
			command: unforward("emu", 40001),
		},
	)
	.await
	.unwrap();

	tokio::time::timeout(Duration::from_secs(5), async {
		while daemon.runner.ran().is_empty() {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("orphaned cleanup never ran");

	assert_eq!(daemon.runner.ran(), vec![unforward("emu", 40000)]);
	assert_eq!(list(&daemon.socket).await.len(), 1);
}

#[tokio::test]
async fn shutdown_runs_everything_pending() {
	let daemon = start_daemon().await;
	send_request(
		&daemon.socket,
		DaemonRequest::RegisterCleanup {
			owner_pid: Some(std::process::id()),
			command: unforward("emu", 40000),
		},
	)
	.await
	.unwrap();

	let response = send_request(&daemon.socket, DaemonRequest::Shutdown).await.unwrap();
	assert_eq!(response, DaemonResponse::Ok);

	tokio::time::timeout(Duration::from_secs(5), daemon.task)
		.await
		.expect("daemon did not exit")
		.unwrap()
		.unwrap();
	assert_eq!(daemon.runner.ran().len(), 1);
	assert!(!daemon.socket.exists());
	assert_eq!(ping(&daemon.socket).await.unwrap(), None);
}

#[tokio::test]
async fn malformed_request_gets_error_response() {
	let daemon = start_daemon().await;
	let mut stream = UnixStream::connect(&daemon.socket).await.unwrap();
	stream.write_all(b"{\"type\":\"launch_rockets\"}\n").await.unwrap();

	let mut reader = BufReader::new(stream);
	let mut line = String::new();
	reader.read_line(&mut line).await.unwrap();
	let response: DaemonResponse = serde_json::from_str(&line).unwrap();
	assert!(matches!(response, DaemonResponse::Error { ref code, .. } if code == "invalid_request"));
}

#[tokio::test]
async fn daemon_cleanup_registers_through_the_socket() {
	let daemon = start_daemon().await;
	let registry = DaemonCleanup::new(daemon.socket.clone()).without_autostart();
	let command = unforward("emu", 40000);

	registry.register(&command).await.unwrap();
	let entries = list(&daemon.socket).await;
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].owner_pid, Some(std::process::id()));

	registry.unregister(&command).await.unwrap();
	assert!(list(&daemon.socket).await.is_empty());
}

#[tokio::test]
async fn daemon_cleanup_without_daemon() {
	let dir = tempfile::tempdir().unwrap();
	let registry = DaemonCleanup::new(dir.path().join("absent.sock")).without_autostart().detached();
	let command = unforward("emu", 40000);

	assert!(registry.register(&command).await.is_err());
	registry.unregister(&command).await.unwrap();
}

/// Fails its first accept the way a listener does when descriptors run out.
struct ExhaustedOnce {
	inner: UnixListener,
	failed: bool,
}

#[async_trait]
impl Incoming for ExhaustedOnce {
	type Stream = UnixStream;

	async fn accept_client(&mut self) -> std::io::Result<UnixStream> {
		if !self.failed {
			self.failed = true;
			return Err(std::io::Error::from_raw_os_error(libc::EMFILE));
		}
		self.inner.accept_client().await
	}
}

#[tokio::test]
async fn accept_failure_keeps_serving_and_cleans_up_on_shutdown() {
	let dir = tempfile::tempdir().unwrap();
	let socket = dir.path().join("daemon.sock");
	let runner = Arc::new(RecordingRunner::default());
	let daemon = Daemon::bind(&socket)
		.await
		.unwrap()
		.with_runner(Arc::clone(&runner) as Arc<dyn CommandRunner>)
		.with_incoming(|inner| ExhaustedOnce { inner, failed: false });
	let task = tokio::spawn(daemon.run());

	assert_eq!(ping(&socket).await.unwrap(), Some(std::process::id()));
	send_request(
		&socket,
		DaemonRequest::RegisterCleanup {
			owner_pid: Some(std::process::id()),
			command: unforward("emu", 40000),
		},
	)
	.await
	.unwrap();
	send_request(&socket, DaemonRequest::Shutdown).await.unwrap();

	tokio::time::timeout(Duration::from_secs(5), task)
		.await
		.expect("daemon did not exit")
		.unwrap()
		.unwrap();
	assert_eq!(runner.ran().len(), 1);
	assert!(!socket.exists());
}
