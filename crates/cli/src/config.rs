//! File and environment configuration.
//!
//! Precedence, lowest first: built-in defaults, the JSON config file
//! (`<config dir>/devbridge/config.json` or `--config`), `DEVBRIDGE_*`
//! environment variables, command-line flags.

use std::path::{Path, PathBuf};

use devbridge::DebugConfig;
use devbridge_runtime::ToolPaths;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CliError, Result};

pub const ENV_ADB: &str = "DEVBRIDGE_ADB";
pub const ENV_BASE_PORT: &str = "DEVBRIDGE_BASE_PORT";
pub const ENV_DEVTOOLS_COMMIT: &str = "DEVBRIDGE_DEVTOOLS_COMMIT";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
	/// Explicit `adb` binary.
	pub adb: Option<PathBuf>,
	/// Directory holding `idevice_id`, `idevicesyslog`, `iproxy` and friends.
	pub imobiledevice_dir: Option<PathBuf>,
	pub debug: DebugConfig,
}

impl FileConfig {
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join("devbridge").join("config.json"))
	}

	/// Loads `explicit`, or the default file when it exists.
	///
	/// A missing explicit file is an error; a missing default file is not.
	pub fn load(explicit: Option<&Path>) -> Result<Self> {
		let path = match explicit {
			Some(path) => path.to_path_buf(),
			None => match Self::default_path() {
				Some(path) if path.is_file() => path,
				_ => return Ok(Self::default()),
			},
		};

		let raw = std::fs::read_to_string(&path).map_err(|err| CliError::Config {
			path: path.clone(),
			message: err.to_string(),
		})?;
		let config = serde_json::from_str(&raw).map_err(|err| CliError::Config {
			path: path.clone(),
			message: err.to_string(),
		})?;
		debug!(target = "devbridge.config", path = %path.display(), "loaded config file");
		Ok(config)
	}

	/// Applies `DEVBRIDGE_*` overrides read through `var`.
	pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
		if let Some(adb) = var(ENV_ADB) {
			self.adb = Some(PathBuf::from(adb));
		}
		if let Some(port) = var(ENV_BASE_PORT) {
			self.debug.base_port = port
				.trim()
				.parse()
				.map_err(|_| CliError::Validation(format!("{ENV_BASE_PORT} must be a port number, got {port:?}")))?;
		}
		if let Some(commit) = var(ENV_DEVTOOLS_COMMIT) {
			self.debug.devtools_commit = commit;
		}
		Ok(())
	}

	/// File config with the process environment applied.
	pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
		let mut config = Self::load(explicit)?;
		config.apply_env(|name| std::env::var(name).ok())?;
		Ok(config)
	}

	pub fn tool_paths(&self) -> ToolPaths {
		ToolPaths {
			adb: self.adb.clone(),
			imobiledevice_dir: self.imobiledevice_dir.clone(),
		}
	}

	/// Program name written into adb cleanup commands.
	pub fn adb_program(&self) -> String {
		self.adb
			.as_ref()
			.map(|path| path.display().to_string())
			.unwrap_or_else(|| "adb".to_string())
	}

	/// Program used to create iOS forwards.
	pub fn iproxy_program(&self) -> String {
		self.imobiledevice_dir
			.as_ref()
			.map(|dir| dir.join("iproxy").display().to_string())
			.unwrap_or_else(|| "iproxy".to_string())
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;

	#[test]
	fn explicit_file_overrides_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.json");
		std::fs::write(
			&path,
			r#"{"adb": "/opt/android/platform-tools/adb", "debug": {"base_port": 41000, "best_effort_attach": true}}"#,
		)
		.unwrap();

		let config = FileConfig::load(Some(&path)).unwrap();

		assert_eq!(config.adb_program(), "/opt/android/platform-tools/adb");
		assert_eq!(config.debug.base_port, 41000);
		assert!(config.debug.best_effort_attach);
		assert_eq!(config.debug.marker_poll_attempts, DebugConfig::default().marker_poll_attempts);
	}

	#[test]
	fn unknown_keys_are_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.json");
		std::fs::write(&path, r#"{"debug": {"basePort": 41000}}"#).unwrap();

		let err = FileConfig::load(Some(&path)).unwrap_err();
		assert!(matches!(err, CliError::Config { .. }), "{err}");
	}

	#[test]
	fn missing_explicit_file_is_an_error() {
		let dir = tempfile::tempdir().unwrap();
		assert!(FileConfig::load(Some(&dir.path().join("absent.json"))).is_err());
	}

	#[test]
	fn environment_overrides_file() {
		let env: HashMap<&str, &str> = HashMap::from([
			(ENV_ADB, "/usr/local/bin/adb"),
			(ENV_BASE_PORT, "42000"),
			(ENV_DEVTOOLS_COMMIT, "deadbeef"),
		]);
		let mut config = FileConfig::default();
		config.apply_env(|name| env.get(name).map(|v| v.to_string())).unwrap();

		assert_eq!(config.tool_paths().adb, Some(PathBuf::from("/usr/local/bin/adb")));
		assert_eq!(config.debug.base_port, 42000);
		assert_eq!(config.debug.devtools_commit, "deadbeef");
	}

	#[test]
	fn bad_port_override_is_validation_error() {
		let mut config = FileConfig::default();
		let err = config
			.apply_env(|name| (name == ENV_BASE_PORT).then(|| "forty".to_string()))
			.unwrap_err();
		assert!(matches!(err, CliError::Validation(_)));
	}

	#[test]
	fn tool_programs_follow_configured_paths() {
		let config = FileConfig {
			imobiledevice_dir: Some(PathBuf::from("/opt/libimobiledevice/bin")),
			..FileConfig::default()
		};
		assert_eq!(config.adb_program(), "adb");
		assert_eq!(config.iproxy_program(), "/opt/libimobiledevice/bin/iproxy");
	}
}
