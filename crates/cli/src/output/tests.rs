use super::*;

fn debug_data() -> DebugData {
	DebugData {
		device: "emulator-5554".into(),
		app: "org.demo".into(),
		platform: "android".into(),
		url: Some("devtools://devtools/remote/serve_file/@abc/inspector.html?experiments=true&ws=localhost:40000".into()),
		port: Some(40000),
		attached: false,
	}
}

fn render<T: Serialize + TextSummary>(result: &CommandResult<T>) -> String {
	let mut buf = Vec::new();
	write_text(&mut buf, result).unwrap();
	String::from_utf8(buf).unwrap()
}

#[test]
fn result_builder_success() {
	let result: CommandResult<DebugData> = ResultBuilder::new("debug").data(debug_data()).build();

	assert!(result.ok);
	assert_eq!(result.command, "debug");
	assert_eq!(result.schema_version, Some(SCHEMA_VERSION));
	assert!(result.error.is_none());
	assert!(result.timings.is_some());
}

#[test]
fn result_builder_error() {
	let result: CommandResult<DebugData> = ResultBuilder::new("debug")
		.error(ErrorCode::ConnectivityError, "Device not found")
		.build();

	assert!(!result.ok);
	assert!(result.data.is_none());
	assert_eq!(result.error.as_ref().unwrap().code, ErrorCode::ConnectivityError);
}

#[test]
fn envelope_uses_camel_case_and_skips_empty_fields() {
	let result = ResultBuilder::new("debug")
		.data(DebugData {
			url: None,
			port: None,
			..debug_data()
		})
		.diagnostic(DiagnosticLevel::Warning, "inspector port was not announced")
		.build();
	let json = serde_json::to_value(&result).unwrap();

	assert_eq!(json["schemaVersion"], 1);
	assert_eq!(json["ok"], true);
	assert!(json["data"].get("url").is_none());
	assert!(json.get("error").is_none());
	assert!(json["timings"]["durationMs"].is_u64());
	assert_eq!(json["diagnostics"][0]["level"], "warning");
}

#[test]
fn error_code_display_matches_serde() {
	for code in [
		ErrorCode::ValidationError,
		ErrorCode::ConnectivityError,
		ErrorCode::Timeout,
		ErrorCode::ProtocolError,
		ErrorCode::DaemonError,
		ErrorCode::IoError,
		ErrorCode::InternalError,
	] {
		let serialized = serde_json::to_value(code).unwrap();
		assert_eq!(serialized, code.to_string());
	}
}

#[test]
fn text_output_for_debug_prefers_url() {
	let text = render(&ResultBuilder::new("debug").data(debug_data()).build());
	assert!(text.starts_with("Debugging org.demo on emulator-5554 (android)\n"));
	assert!(text.contains("Open in Chrome: devtools://"));
	assert!(!text.contains("Ctrl+C"));

	let attached = DebugData {
		url: None,
		attached: true,
		..debug_data()
	};
	let text = render(&ResultBuilder::new("debug").data(attached).build());
	assert!(text.contains("Debugger listening on localhost:40000"));
	assert!(text.contains("Press Ctrl+C to stop"));
}

#[test]
fn text_output_lists_diagnostics_after_error() {
	let result: CommandResult<StopData> = ResultBuilder::new("stop")
		.error(ErrorCode::DaemonError, "watchdog refused the request")
		.diagnostic(DiagnosticLevel::Info, "retry with -v for details")
		.build();

	let text = render(&result);
	assert!(text.starts_with("Error [DAEMON_ERROR]: watchdog refused the request\n"));
	assert!(text.contains("[info] retry with -v for details"));
}

#[test]
fn text_output_for_stop_counts_tunnels() {
	let data = StopData {
		device: "emu".into(),
		daemon_running: true,
		cleaned: 2,
	};
	assert_eq!(render(&ResultBuilder::new("stop").data(data).build()), "Removed 2 tunnels for emu\n");
}
