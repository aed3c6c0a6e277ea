//! Host process and port helpers.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::debug;

use crate::error::{Error, Result};

/// Captured output of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
	pub stdout: String,
	pub stderr: String,
	pub code: Option<i32>,
}

/// Resolves `program` from an explicit override or `PATH`.
pub fn resolve_tool(program: &str, explicit: Option<&Path>) -> Result<PathBuf> {
	if let Some(path) = explicit {
		return Ok(path.to_path_buf());
	}
	which::which(program).map_err(|_| Error::ToolNotFound {
		program: program.to_string(),
	})
}

/// Runs `program` to completion and fails on a non-zero exit.
pub async fn run<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> Result<CommandOutput> {
	let output = run_unchecked(program, args).await?;
	if output.code != Some(0) {
		return Err(Error::CommandFailed {
			command: describe(program, args),
			code: output.code,
			stderr: output.stderr.trim().to_string(),
		});
	}
	Ok(output)
}

/// Runs `program` to completion, returning its output whatever the exit status.
pub async fn run_unchecked<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> Result<CommandOutput> {
	debug!(target = "devbridge.process", command = %describe(program, args), "running");
	let output = tokio::process::Command::new(program)
		.args(args)
		.stdin(Stdio::null())
		.output()
		.await
		.map_err(|err| match err.kind() {
			std::io::ErrorKind::NotFound => Error::ToolNotFound {
				program: program.display().to_string(),
			},
			_ => Error::Io(err),
		})?;

	Ok(CommandOutput {
		stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
		stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		code: output.status.code(),
	})
}

/// Spawns `program` in its own process group so it outlives this process.
///
/// A reaper thread waits on the child so it never lingers as a zombie while we run.
pub fn spawn_detached<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> Result<u32> {
	let mut cmd = std::process::Command::new(program);
	cmd.args(args).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

	#[cfg(unix)]
	std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

	let mut child = cmd.spawn().map_err(|err| match err.kind() {
		std::io::ErrorKind::NotFound => Error::ToolNotFound {
			program: program.display().to_string(),
		},
		_ => Error::Io(err),
	})?;
	let pid = child.id();
	debug!(target = "devbridge.process", pid, command = %describe(program, args), "spawned detached");

	std::thread::Builder::new()
		.name(format!("reap-{pid}"))
		.spawn(move || match child.wait() {
			Ok(status) => debug!(target = "devbridge.process", pid, %status, "detached process exited"),
			Err(err) => debug!(target = "devbridge.process", pid, error = %err, "could not wait on detached process"),
		})?;
	Ok(pid)
}

/// Returns `true` when a process with `pid` appears alive.
pub fn pid_is_alive(pid: u32) -> bool {
	#[cfg(unix)]
	{
		if pid == 0 {
			return false;
		}
		if PathBuf::from("/proc").join(pid.to_string()).exists() {
			return true;
		}
		let Ok(raw) = i32::try_from(pid) else {
			return false;
		};
		// Signal 0 only checks for existence and permission.
		let rc = unsafe { libc::kill(raw, 0) };
		rc == 0 || pid == std::process::id()
	}

	#[cfg(not(unix))]
	{
		pid == std::process::id()
	}
}

/// Returns `true` when `port` can be bound on localhost.
pub fn port_available(port: u16) -> bool {
	std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

fn describe<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> String {
	let mut out = program.display().to_string();
	for arg in args {
		out.push(' ');
		out.push_str(&arg.as_ref().to_string_lossy());
	}
	out
}
