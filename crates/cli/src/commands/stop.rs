use std::time::Instant;

use crate::daemon::{self, DaemonRequest, DaemonResponse};
use crate::error::{CliError, Result};
use crate::output::{DiagnosticLevel, OutputFormat, ResultBuilder, StopData, print_result};

/// Runs every cleanup command the watchdog holds for `device`.
pub async fn run(device: &str, format: OutputFormat) -> Result<()> {
	let started = Instant::now();
	let socket = daemon::socket_path();

	if daemon::ping(&socket).await?.is_none() {
		let result = ResultBuilder::new("stop")
			.started_at(started)
			.data(StopData {
				device: device.to_string(),
				daemon_running: false,
				cleaned: 0,
			})
			.diagnostic(DiagnosticLevel::Info, "cleanup daemon is not running; nothing registered")
			.build();
		print_result(&result, format);
		return Ok(());
	}

	let request = DaemonRequest::RunCleanup {
		device_id: device.to_string(),
	};
	let cleaned = match daemon::send_request(&socket, request).await? {
		DaemonResponse::Ran { count } => count,
		DaemonResponse::Error { code, message } => return Err(CliError::Daemon(format!("{code}: {message}"))),
		other => return Err(CliError::Daemon(format!("unexpected response: {other:?}"))),
	};

	let result = ResultBuilder::new("stop")
		.started_at(started)
		.data(StopData {
			device: device.to_string(),
			daemon_running: true,
			cleaned,
		})
		.build();
	print_result(&result, format);
	Ok(())
}
