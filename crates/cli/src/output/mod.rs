//! Structured output envelope for all CLI commands.
//!
//! ## Output Contract
//!
//! Every command produces a result envelope on stdout:
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "ok": true,
//!   "command": "debug",
//!   "data": { "url": "devtools://...", "port": 40000 },
//!   "timings": { "durationMs": 812 }
//! }
//! ```
//!
//! On failure:
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "ok": false,
//!   "command": "debug",
//!   "error": {
//!     "code": "CONNECTIVITY_ERROR",
//!     "message": "App is not running or was not built with debugging enabled (device emulator-5554, app org.demo)"
//!   }
//! }
//! ```

#[cfg(test)]
mod tests;

use std::io::{self, Write};
use std::time::{Duration, Instant};

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::daemon::CleanupEntry;

/// Bumped on breaking envelope changes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
	/// TOON, compact and token-efficient
	#[default]
	Toon,
	Json,
	/// One JSON document per line
	Ndjson,
	/// Human-readable summary
	Text,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T: Serialize> {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub schema_version: Option<u32>,

	pub ok: bool,

	/// Command name (e.g., "debug", "stop", "daemon status")
	pub command: String,

	/// Present on success only.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,

	/// Present on failure only.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub timings: Option<Timings>,

	/// Degraded-but-successful outcomes: undiscovered port, daemon not running.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
	pub code: ErrorCode,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Stable failure classes, one per [`devbridge::ErrorCategory`] plus CLI-local ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// Invalid options, unsupported platform or host, bad configuration
	ValidationError,
	/// Device or app unreachable, untrusted, not installed or not running
	ConnectivityError,
	/// A required wait ran out
	Timeout,
	/// Malformed device traffic
	ProtocolError,
	/// The cleanup watchdog could not be reached or refused a request
	DaemonError,
	IoError,
	InternalError,
}

impl ErrorCode {
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorCode::ValidationError => "VALIDATION_ERROR",
			ErrorCode::ConnectivityError => "CONNECTIVITY_ERROR",
			ErrorCode::Timeout => "TIMEOUT",
			ErrorCode::ProtocolError => "PROTOCOL_ERROR",
			ErrorCode::DaemonError => "DAEMON_ERROR",
			ErrorCode::IoError => "IO_ERROR",
			ErrorCode::InternalError => "INTERNAL_ERROR",
		}
	}
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
	pub duration_ms: u64,
}

impl From<Duration> for Timings {
	fn from(duration: Duration) -> Self {
		Timings {
			duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
		}
	}
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
	pub level: DiagnosticLevel,
	pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
	Info,
	Warning,
}

pub struct ResultBuilder<T: Serialize> {
	command: String,
	data: Option<T>,
	error: Option<CommandError>,
	started: Instant,
	diagnostics: Vec<Diagnostic>,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			data: None,
			error: None,
			started: Instant::now(),
			diagnostics: Vec::new(),
		}
	}

	/// Measures the reported duration from `start` instead of from construction.
	pub fn started_at(mut self, start: Instant) -> Self {
		self.started = start;
		self
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn error(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
		self.error = Some(CommandError {
			code,
			message: message.into(),
			details: None,
		});
		self
	}

	pub fn diagnostic(mut self, level: DiagnosticLevel, message: impl Into<String>) -> Self {
		self.diagnostics.push(Diagnostic {
			level,
			message: message.into(),
		});
		self
	}

	pub fn build(self) -> CommandResult<T> {
		CommandResult {
			schema_version: Some(SCHEMA_VERSION),
			ok: self.error.is_none() && self.data.is_some(),
			command: self.command,
			data: self.data,
			error: self.error,
			timings: Some(self.started.elapsed().into()),
			diagnostics: self.diagnostics,
		}
	}
}

/// Human-readable rendering of a command payload for `-f text`.
pub trait TextSummary {
	fn summary(&self, out: &mut dyn Write) -> io::Result<()>;
}

impl TextSummary for () {
	fn summary(&self, _out: &mut dyn Write) -> io::Result<()> {
		Ok(())
	}
}

impl TextSummary for serde_json::Value {
	fn summary(&self, out: &mut dyn Write) -> io::Result<()> {
		let Some(fields) = self.as_object() else {
			return writeln!(out, "{self}");
		};
		for (key, value) in fields {
			match value {
				serde_json::Value::String(text) => writeln!(out, "{key}: {text}")?,
				other => writeln!(out, "{key}: {other}")?,
			}
		}
		Ok(())
	}
}

pub fn print_result<T: Serialize + TextSummary>(result: &CommandResult<T>, format: OutputFormat) {
	match format {
		OutputFormat::Toon => {
			if let Ok(value) = serde_json::to_value(result) {
				println!("{}", toon::encode(&value, None));
			}
		}
		OutputFormat::Json => {
			if let Ok(json) = serde_json::to_string_pretty(result) {
				println!("{json}");
			}
		}
		OutputFormat::Ndjson => {
			if let Ok(json) = serde_json::to_string(result) {
				println!("{json}");
			}
		}
		OutputFormat::Text => {
			let mut stdout = io::stdout().lock();
			let _ = write_text(&mut stdout, result);
		}
	}
}

fn write_text<T: Serialize + TextSummary>(out: &mut dyn Write, result: &CommandResult<T>) -> io::Result<()> {
	match (&result.data, &result.error) {
		(_, Some(error)) => writeln!(out, "Error [{}]: {}", error.code, error.message)?,
		(Some(data), None) => data.summary(out)?,
		(None, None) => {}
	}

	for diagnostic in &result.diagnostics {
		let level = match diagnostic.level {
			DiagnosticLevel::Info => "info",
			DiagnosticLevel::Warning => "warning",
		};
		writeln!(out, "[{level}] {}", diagnostic.message)?;
	}
	Ok(())
}

pub fn print_error_stderr(error: &CommandError) {
	eprintln!("{} [{}]: {}", "Error".red().bold(), error.code, error.message);
}

/// `debug` command payload.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugData {
	pub device: String,
	pub app: String,
	pub platform: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub port: Option<u16>,
	/// Whether the command stays attached until interrupted.
	pub attached: bool,
}

impl TextSummary for DebugData {
	fn summary(&self, out: &mut dyn Write) -> io::Result<()> {
		writeln!(out, "Debugging {} on {} ({})", self.app, self.device, self.platform)?;
		match (&self.url, self.port) {
			(Some(url), _) => writeln!(out, "Open in Chrome: {url}")?,
			(None, Some(port)) => writeln!(out, "Debugger listening on localhost:{port}")?,
			(None, None) => {}
		}
		if self.attached {
			writeln!(out, "Press Ctrl+C to stop")?;
		}
		Ok(())
	}
}

/// `stop` command payload.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopData {
	pub device: String,
	pub daemon_running: bool,
	/// Cleanup commands the watchdog executed for the device.
	pub cleaned: usize,
}

impl TextSummary for StopData {
	fn summary(&self, out: &mut dyn Write) -> io::Result<()> {
		match self.cleaned {
			0 => writeln!(out, "Nothing to clean up for {}", self.device),
			1 => writeln!(out, "Removed 1 tunnel for {}", self.device),
			n => writeln!(out, "Removed {n} tunnels for {}", self.device),
		}
	}
}

/// `daemon start|stop|status` payload.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonData {
	pub running: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub pid: Option<u32>,
	pub socket: String,
	/// This invocation started (or stopped) the daemon.
	pub changed: bool,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub pending: Vec<CleanupEntry>,
}

impl TextSummary for DaemonData {
	fn summary(&self, out: &mut dyn Write) -> io::Result<()> {
		match (self.running, self.pid) {
			(true, Some(pid)) => writeln!(out, "Daemon running (pid {pid}) on {}", self.socket)?,
			(true, None) => writeln!(out, "Daemon running on {}", self.socket)?,
			(false, _) => writeln!(out, "Daemon not running")?,
		}
		for entry in &self.pending {
			match entry.owner_pid {
				Some(owner) => writeln!(out, "  {} (owner {owner})", entry.command)?,
				None => writeln!(out, "  {} (detached)", entry.command)?,
			}
		}
		Ok(())
	}
}
