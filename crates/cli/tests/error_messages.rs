//! The binary reports failures through the result envelope.

use std::path::Path;
use std::process::Command;

use serde_json::json;

fn run(args: &[&str], runtime_dir: &Path) -> (serde_json::Value, String, bool) {
	let output = Command::new(env!("CARGO_BIN_EXE_devbridge"))
		.env("XDG_RUNTIME_DIR", runtime_dir)
		.env_remove("RUST_LOG")
		.args(args)
		.output()
		.expect("failed to execute devbridge");

	let stdout = String::from_utf8_lossy(&output.stdout).to_string();
	let stderr = String::from_utf8_lossy(&output.stderr).to_string();
	let parsed = serde_json::from_str::<serde_json::Value>(&stdout).unwrap_or_else(|_| json!({ "raw": stdout }));
	(parsed, stderr, output.status.success())
}

#[test]
fn conflicting_flags_are_a_validation_error() {
	let dir = tempfile::tempdir().unwrap();
	let (json, stderr, success) = run(
		&["-f", "json", "debug", "emulator-5554", "org.demo", "--debug-brk", "--start"],
		dir.path(),
	);

	assert!(!success);
	assert_eq!(json["ok"], false);
	assert_eq!(json["command"], "debug");
	assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
	let msg = json["error"]["message"].as_str().unwrap_or_default();
	assert!(msg.contains("--debug-brk") && msg.contains("--start"), "got: {msg}");
	assert!(stderr.contains("VALIDATION_ERROR"), "stderr: {stderr}");
}

#[test]
fn missing_config_file_is_a_validation_error() {
	let dir = tempfile::tempdir().unwrap();
	let missing = dir.path().join("absent.json");
	let (json, _stderr, success) = run(
		&[
			"-f",
			"json",
			"--config",
			missing.to_str().unwrap(),
			"debug",
			"emulator-5554",
			"org.demo",
		],
		dir.path(),
	);

	assert!(!success);
	assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
	let msg = json["error"]["message"].as_str().unwrap_or_default();
	assert!(msg.contains("absent.json"), "got: {msg}");
}

#[test]
fn malformed_config_file_names_the_file() {
	let dir = tempfile::tempdir().unwrap();
	let config = dir.path().join("config.json");
	std::fs::write(&config, r#"{ "debug": { "base_port": "not a port" } }"#).unwrap();

	let (json, _stderr, success) = run(
		&["-f", "json", "--config", config.to_str().unwrap(), "debug", "emu", "org.demo"],
		dir.path(),
	);

	assert!(!success);
	assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
	assert!(json["error"]["message"].as_str().unwrap_or_default().contains("config.json"));
}

#[test]
fn stop_without_daemon_succeeds() {
	let dir = tempfile::tempdir().unwrap();
	let (json, _stderr, success) = run(&["-f", "json", "stop", "emulator-5554"], dir.path());

	assert!(success);
	assert_eq!(json["ok"], true);
	assert_eq!(json["data"]["device"], "emulator-5554");
	assert_eq!(json["data"]["daemonRunning"], false);
	assert_eq!(json["data"]["cleaned"], 0);
}

#[test]
fn daemon_status_without_daemon() {
	let dir = tempfile::tempdir().unwrap();
	let (json, _stderr, success) = run(&["-f", "json", "daemon", "status"], dir.path());

	assert!(success);
	assert_eq!(json["command"], "daemon status");
	assert_eq!(json["data"]["running"], false);
}
