//! DevTools front-end URLs.

use devbridge_protocol::DebugOptions;

use crate::config::DEFAULT_DEVTOOLS_COMMIT;

/// Builds the URL a DevTools-capable client opens for a forwarded port.
pub trait DevToolsUrlBuilder: Send + Sync {
	fn build(&self, options: &DebugOptions, port: u16) -> String;
}

/// Chrome DevTools front-end: bundled, pinned to a commit, or hosted.
#[derive(Debug, Clone)]
pub struct ChromeDevTools {
	default_commit: String,
}

impl Default for ChromeDevTools {
	fn default() -> Self {
		Self::new(DEFAULT_DEVTOOLS_COMMIT)
	}
}

impl ChromeDevTools {
	pub fn new(default_commit: impl Into<String>) -> Self {
		Self {
			default_commit: default_commit.into(),
		}
	}
}

impl DevToolsUrlBuilder for ChromeDevTools {
	fn build(&self, options: &DebugOptions, port: u16) -> String {
		let query = format!("inspector.html?experiments=true&ws=localhost:{port}");
		if options.use_bundled_dev_tools {
			return format!("devtools://devtools/bundled/{query}");
		}
		let commit = options.dev_tools_commit.as_deref().unwrap_or(&self.default_commit);
		if options.use_http_url {
			format!("https://chrome-devtools-frontend.appspot.com/serve_file/@{commit}/{query}")
		} else {
			format!("devtools://devtools/remote/serve_file/@{commit}/{query}")
		}
	}
}
