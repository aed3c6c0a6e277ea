#[cfg(test)]
mod tests;

use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand, ValueEnum};
use devbridge_protocol::{DebugOptions, Platform};

use crate::output::OutputFormat;

/// Help colors in cargo's style.
fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
		.valid(AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(name = "devbridge")]
#[command(about = "Attach a debugger to a NativeScript app running on an Android or iOS device")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format: toon (default), json, ndjson, or text
	#[arg(short = 'f', long, global = true, value_enum, default_value = "toon")]
	pub format: OutputFormat,

	/// Configuration file (defaults to <config dir>/devbridge/config.json)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Start a debug session and print the debugger endpoint.
	Debug(DebugArgs),
	/// Remove every tunnel registered for a device.
	Stop(StopArgs),
	/// Manage the cleanup watchdog daemon.
	Daemon(DaemonArgs),
}

impl Commands {
	/// Name reported in the output envelope.
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Debug(_) => "debug",
			Commands::Stop(_) => "stop",
			Commands::Daemon(args) => match args.action {
				DaemonAction::Start { .. } => "daemon start",
				DaemonAction::Stop => "daemon stop",
				DaemonAction::Status => "daemon status",
			},
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CliPlatform {
	Android,
	Ios,
}

impl From<CliPlatform> for Platform {
	fn from(platform: CliPlatform) -> Self {
		match platform {
			CliPlatform::Android => Platform::Android,
			CliPlatform::Ios => Platform::Ios,
		}
	}
}

#[derive(Args, Debug, Clone)]
pub struct DebugArgs {
	/// Device serial (Android) or UDID (iOS).
	#[arg(value_name = "DEVICE")]
	pub device: String,

	/// Application identifier (package name or bundle id).
	#[arg(value_name = "APP")]
	pub app: String,

	/// Expected platform of DEVICE.
	#[arg(long, value_enum)]
	pub platform: Option<CliPlatform>,

	/// Restart the app and pause it until the debugger attaches.
	#[arg(long)]
	pub debug_brk: bool,

	/// Attach to the running app without restarting it.
	#[arg(long)]
	pub start: bool,

	/// Do not launch a debugger client.
	#[arg(long)]
	pub no_client: bool,

	/// Use the native inspector client (iOS).
	#[arg(long)]
	pub inspector: bool,

	/// Produce a Chrome DevTools URL.
	#[arg(long)]
	pub chrome: bool,

	/// Use the hosted https DevTools frontend.
	#[arg(long)]
	pub use_http_url: bool,

	/// Use the DevTools frontend bundled with Chrome.
	#[arg(long = "use-bundled-devtools")]
	pub use_bundled_dev_tools: bool,

	/// DevTools frontend commit to pin in the URL.
	#[arg(long = "devtools-commit", value_name = "SHA")]
	pub dev_tools_commit: Option<String>,

	/// Print the endpoint and exit instead of staying attached.
	#[arg(long)]
	pub justlaunch: bool,
}

impl DebugArgs {
	pub fn options(&self) -> DebugOptions {
		DebugOptions {
			debug_brk: self.debug_brk,
			start: self.start,
			stop: false,
			client: !self.no_client,
			inspector: self.inspector,
			// DevTools is the default frontend; --chrome only states it explicitly.
			chrome: self.chrome || !self.inspector,
			use_http_url: self.use_http_url,
			use_bundled_dev_tools: self.use_bundled_dev_tools,
			dev_tools_commit: self.dev_tools_commit.clone(),
			justlaunch: self.justlaunch,
		}
	}
}

#[derive(Args, Debug, Clone)]
pub struct StopArgs {
	/// Device serial (Android) or UDID (iOS).
	#[arg(value_name = "DEVICE")]
	pub device: String,
}

#[derive(Args, Debug, Clone)]
pub struct DaemonArgs {
	#[command(subcommand)]
	pub action: DaemonAction,
}

#[derive(Subcommand, Debug, Clone)]
pub enum DaemonAction {
	/// Start the daemon.
	Start {
		/// Run in the foreground instead of detaching.
		#[arg(long)]
		foreground: bool,
	},
	/// Run pending cleanup and stop the daemon.
	Stop,
	/// Show daemon state and pending cleanup.
	Status,
}
