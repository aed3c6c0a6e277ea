use crate::daemon::{self, Daemon, DaemonRequest, DaemonResponse};
use crate::error::{CliError, Result};
use crate::output::{DaemonData, DiagnosticLevel, OutputFormat, ResultBuilder, print_result};

fn report(command: &str, data: DaemonData, note: Option<&str>, format: OutputFormat) {
	let mut builder = ResultBuilder::new(command).data(data);
	if let Some(note) = note {
		builder = builder.diagnostic(DiagnosticLevel::Info, note);
	}
	print_result(&builder.build(), format);
}

fn unexpected(response: DaemonResponse) -> CliError {
	match response {
		DaemonResponse::Error { code, message } => CliError::Daemon(format!("{code}: {message}")),
		other => CliError::Daemon(format!("unexpected response: {other:?}")),
	}
}

pub async fn start(foreground: bool, format: OutputFormat) -> Result<()> {
	let socket = daemon::socket_path();
	let pid_path = daemon::pid_path();
	let mut data = DaemonData {
		socket: socket.display().to_string(),
		..DaemonData::default()
	};

	if let Some(pid) = daemon::ping(&socket).await? {
		if foreground {
			return Err(CliError::Daemon(format!(
				"already running as pid {pid}; use `devbridge daemon stop` first"
			)));
		}
		data.running = true;
		data.pid = Some(pid);
		report("daemon start", data, Some("daemon already running"), format);
		return Ok(());
	}

	if foreground {
		let server = Daemon::bind(&socket).await?;
		data.running = true;
		data.changed = true;
		data.pid = Some(std::process::id());
		report("daemon start", data, None, format);
		server.run().await?;
		let _ = std::fs::remove_file(&pid_path);
		return Ok(());
	}

	let pid = daemon::spawn_background(&socket).await?;
	std::fs::write(&pid_path, pid.to_string())?;
	data.running = true;
	data.changed = true;
	data.pid = Some(pid);
	report("daemon start", data, None, format);
	Ok(())
}

/// Stops the daemon. It runs every pending cleanup command before exiting.
pub async fn stop(format: OutputFormat) -> Result<()> {
	let socket = daemon::socket_path();
	let mut data = DaemonData {
		socket: socket.display().to_string(),
		..DaemonData::default()
	};

	let Some(pid) = daemon::ping(&socket).await? else {
		report("daemon stop", data, Some("daemon not running"), format);
		return Ok(());
	};

	match daemon::send_request(&socket, DaemonRequest::Shutdown).await? {
		DaemonResponse::Ok => {}
		other => return Err(unexpected(other)),
	}
	let _ = std::fs::remove_file(daemon::pid_path());

	data.pid = Some(pid);
	data.changed = true;
	report("daemon stop", data, None, format);
	Ok(())
}

pub async fn status(format: OutputFormat) -> Result<()> {
	let socket = daemon::socket_path();
	let mut data = DaemonData {
		socket: socket.display().to_string(),
		..DaemonData::default()
	};

	let Some(pid) = daemon::ping(&socket).await? else {
		report("daemon status", data, None, format);
		return Ok(());
	};

	data.pending = match daemon::send_request(&socket, DaemonRequest::ListCleanup).await? {
		DaemonResponse::Cleanup { list } => list,
		other => return Err(unexpected(other)),
	};
	data.running = true;
	data.pid = Some(pid);
	report("daemon status", data, None, format);
	Ok(())
}
