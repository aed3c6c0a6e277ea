use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use devbridge::tunnel::HostProcesses;
use devbridge::{AdbTunnel, DebugService, SessionEvent, UsbmuxTunnel};
use devbridge_protocol::{Platform, SessionKey};
use devbridge_runtime::{Device, DeviceLocator, HostDevices};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::cli::DebugArgs;
use crate::config::FileConfig;
use crate::daemon::{self, DaemonCleanup};
use crate::error::{CliError, Result};
use crate::output::{DebugData, DiagnosticLevel, OutputFormat, ResultBuilder, print_result};

pub async fn run(args: DebugArgs, config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
	let started = Instant::now();
	let options = args.options();
	if let Some(conflict) = options.conflict() {
		return Err(CliError::Validation(conflict.to_string()));
	}

	let config = FileConfig::resolve(config_path)?;
	let locator = Arc::new(HostDevices::new(config.tool_paths()));

	let device = locator
		.find(&args.device)
		.await?
		.ok_or_else(|| devbridge::Error::Connectivity {
			device: args.device.clone(),
			app: args.app.clone(),
			message: "Device not found".to_string(),
		})?;
	let platform = device.platform();
	if let Some(expected) = args.platform.map(Platform::from) {
		if expected != platform {
			return Err(CliError::Validation(format!(
				"{} is an {} device, not {}",
				args.device,
				platform_name(platform),
				platform_name(expected)
			)));
		}
	}

	let cleanup = DaemonCleanup::new(daemon::socket_path());
	let cleanup = if options.justlaunch { cleanup.detached() } else { cleanup };

	let service = DebugService::builder(locator)
		.config(config.debug.clone())
		.cleanup(Arc::new(cleanup))
		.android_tunnel(Arc::new(AdbTunnel::new(config.adb_program())))
		.ios_tunnel(Arc::new(UsbmuxTunnel::new(
			config.iproxy_program(),
			Arc::new(HostProcesses),
		)))
		.build();

	// Subscribe before starting so a failure right after bridging is not missed.
	let events = service.subscribe_events();
	let result = service.start_debug(&args.device, &args.app, &options).await?;

	let mut builder = ResultBuilder::new("debug").started_at(started).data(DebugData {
		device: args.device.clone(),
		app: args.app.clone(),
		platform: platform_name(platform).to_string(),
		url: result.url.clone(),
		port: result.port,
		attached: !options.justlaunch,
	});
	if result.port.is_none() && result.url.is_none() {
		builder = builder.diagnostic(
			DiagnosticLevel::Warning,
			"Debugger port was not discovered; the app may not have started its inspector",
		);
	}
	print_result(&builder.build(), format);

	if options.justlaunch {
		return Ok(());
	}

	let key = SessionKey::new(&args.device, &args.app);
	wait_for_end(events, &key).await;
	service.stop_debug(&args.device).await?;
	Ok(())
}

/// Blocks until interrupted or until the session breaks or stops.
async fn wait_for_end(events: tokio::sync::broadcast::Receiver<SessionEvent>, key: &SessionKey) {
	let mut events = BroadcastStream::new(events);
	let ended = async {
		while let Some(event) = events.next().await {
			match event {
				Ok(SessionEvent::ConnectionError { key: k, message }) if &k == key => {
					warn!(target = "devbridge.session", session = %k, %message, "debugger connection lost");
					return;
				}
				Ok(SessionEvent::Stopped { key: k }) if &k == key => return,
				Ok(_) => {}
				Err(err) => warn!(target = "devbridge.session", error = %err, "missed session events"),
			}
		}
	};

	tokio::select! {
		_ = ended => {}
		_ = tokio::signal::ctrl_c() => {
			info!(target = "devbridge.session", session = %key, "interrupted");
		}
	}
}

fn platform_name(platform: Platform) -> &'static str {
	match platform {
		Platform::Android => "android",
		Platform::Ios => "ios",
	}
}
