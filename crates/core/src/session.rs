//! Per-session state owned by the orchestrator.

use std::sync::Arc;

use devbridge_protocol::{Platform, SessionKey};
use devbridge_runtime::Device;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::bridge::BridgeHandle;

/// Lifecycle of one debug session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
	Idle,
	Discovering,
	Bridged,
	/// Terminal. Everything the session owned has been released.
	Stopped,
}

/// Progress and failure notifications, tagged with their session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
	Discovering {
		key: SessionKey,
	},
	Bridged {
		key: SessionKey,
		url: Option<String>,
		port: Option<u16>,
	},
	/// The session's connection broke after the endpoint was handed out.
	ConnectionError {
		key: SessionKey,
		message: String,
	},
	Stopped {
		key: SessionKey,
	},
}

impl SessionEvent {
	pub fn key(&self) -> &SessionKey {
		match self {
			SessionEvent::Discovering { key }
			| SessionEvent::Bridged { key, .. }
			| SessionEvent::ConnectionError { key, .. }
			| SessionEvent::Stopped { key } => key,
		}
	}
}

/// Everything one session owns: its device, forwards, bridge and cancellation.
pub(crate) struct SessionContext {
	pub key: SessionKey,
	pub device: Arc<dyn Device>,
	state: Mutex<SessionState>,
	forwards: Mutex<Vec<u16>>,
	bridge: Mutex<Option<BridgeHandle>>,
	cancel: watch::Sender<bool>,
}

impl SessionContext {
	pub fn new(key: SessionKey, device: Arc<dyn Device>) -> Self {
		let (cancel, _) = watch::channel(false);
		Self {
			key,
			device,
			state: Mutex::new(SessionState::Idle),
			forwards: Mutex::new(Vec::new()),
			bridge: Mutex::new(None),
			cancel,
		}
	}

	pub fn platform(&self) -> Platform {
		self.device.platform()
	}

	pub fn state(&self) -> SessionState {
		*self.state.lock()
	}

	/// Moves to `next` if it is later than the current state.
	pub fn advance(&self, next: SessionState) -> bool {
		let mut state = self.state.lock();
		if next > *state {
			*state = next;
			true
		} else {
			false
		}
	}

	/// Records a forward for teardown to release. Refused once the session has stopped.
	pub fn own_forward(&self, local_port: u16) -> bool {
		// Held across the push so teardown can't slip between the check and the record.
		let state = self.state.lock();
		if *state == SessionState::Stopped {
			return false;
		}
		let mut forwards = self.forwards.lock();
		if !forwards.contains(&local_port) {
			forwards.push(local_port);
		}
		true
	}

	pub fn take_forwards(&self) -> Vec<u16> {
		std::mem::take(&mut *self.forwards.lock())
	}

	pub fn set_bridge(&self, bridge: BridgeHandle) {
		if let Some(previous) = self.bridge.lock().replace(bridge) {
			previous.close();
		}
	}

	pub fn has_bridge(&self) -> bool {
		self.bridge.lock().is_some()
	}

	pub fn take_bridge(&self) -> Option<BridgeHandle> {
		self.bridge.lock().take()
	}

	pub fn cancel(&self) {
		self.cancel.send_replace(true);
	}

	/// Resolves once [`SessionContext::cancel`] has been called.
	pub async fn cancelled(&self) {
		let mut rx = self.cancel.subscribe();
		let _ = rx.wait_for(|cancelled| *cancelled).await;
	}
}

#[cfg(test)]
mod tests {
	use devbridge_runtime::testing::FakeDevice;

	use super::*;

	fn session() -> SessionContext {
		SessionContext::new(SessionKey::new("emu", "app"), Arc::new(FakeDevice::android("emu")))
	}

	#[test]
	fn transitions_are_monotonic() {
		let session = session();
		assert!(session.advance(SessionState::Discovering));
		assert!(session.advance(SessionState::Bridged));
		assert!(!session.advance(SessionState::Discovering));
		assert!(session.advance(SessionState::Stopped));
		assert!(!session.advance(SessionState::Stopped));
		assert_eq!(session.state(), SessionState::Stopped);
	}

	#[test]
	fn forwards_are_taken_once() {
		let session = session();
		assert!(session.own_forward(40000));
		assert!(session.own_forward(40000));
		assert_eq!(session.take_forwards(), vec![40000]);
		assert!(session.take_forwards().is_empty());
	}

	#[test]
	fn stopped_session_refuses_forwards() {
		let session = session();
		session.advance(SessionState::Stopped);
		assert!(!session.own_forward(40000));
		assert!(session.take_forwards().is_empty());
	}

	#[tokio::test]
	async fn cancel_wakes_waiters() {
		let session = Arc::new(session());
		let waiter = {
			let session = Arc::clone(&session);
			tokio::spawn(async move { session.cancelled().await })
		};
		session.cancel();
		waiter.await.unwrap();
		// Already cancelled: resolves immediately.
		session.cancelled().await;
	}
}
