//! Names used by the on-device notification handshake.
//!
//! The runtime inside the app observes and posts app-scoped notifications of
//! the form `<appId>:NativeScript.Debug.<Name>`.

use std::fmt;

/// Handshake notifications exchanged with the app runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
	/// Host asks whether a debugger may attach to the running app.
	AttachAvailabilityQuery,
	/// App reports a debugger is already attached.
	AlreadyConnected,
	/// App has opened its inspector socket and is waiting for the host.
	ReadyForAttach,
	/// App is debuggable and free; the host should request an attach.
	AttachAvailable,
	/// Host requests the app to open its inspector socket.
	AttachRequest,
	/// Host asks the app to pause until the debugger attaches.
	WaitForDebugger,
	/// App has started launching.
	AppLaunching,
}

impl Notification {
	pub fn name(self) -> &'static str {
		match self {
			Notification::AttachAvailabilityQuery => "AttachAvailabilityQuery",
			Notification::AlreadyConnected => "AlreadyConnected",
			Notification::ReadyForAttach => "ReadyForAttach",
			Notification::AttachAvailable => "AttachAvailable",
			Notification::AttachRequest => "AttachRequest",
			Notification::WaitForDebugger => "WaitForDebugger",
			Notification::AppLaunching => "AppLaunching",
		}
	}

	/// Fully qualified name for `app_id`.
	pub fn qualified(self, app_id: &str) -> String {
		format!("{app_id}:NativeScript.Debug.{}", self.name())
	}
}

impl fmt::Display for Notification {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}
