//! Doubles for exercising the orchestrator without host tooling.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cleanup::{CleanupCommand, CleanupRegistry};
use crate::error::Result;

/// In-memory registry that remembers what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingCleanup {
	pending: Mutex<Vec<CleanupCommand>>,
	unregistered: Mutex<Vec<CleanupCommand>>,
	register_delay: Duration,
}

impl RecordingCleanup {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every registration take `delay`, like a registry backed by a slow disk.
	pub fn with_register_delay(mut self, delay: Duration) -> Self {
		self.register_delay = delay;
		self
	}

	/// Commands registered and not yet unregistered.
	pub fn pending(&self) -> Vec<CleanupCommand> {
		self.pending.lock().clone()
	}

	pub fn unregistered(&self) -> Vec<CleanupCommand> {
		self.unregistered.lock().clone()
	}
}

#[async_trait]
impl CleanupRegistry for RecordingCleanup {
	async fn register(&self, command: &CleanupCommand) -> Result<()> {
		if !self.register_delay.is_zero() {
			tokio::time::sleep(self.register_delay).await;
		}
		let mut pending = self.pending.lock();
		if !pending.contains(command) {
			pending.push(command.clone());
		}
		Ok(())
	}

	async fn unregister(&self, command: &CleanupCommand) -> Result<()> {
		self.pending.lock().retain(|c| c != command);
		self.unregistered.lock().push(command.clone());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn recording_registry_deduplicates() {
		let registry = RecordingCleanup::new();
		let cmd = CleanupCommand::new("emu", "adb", vec!["forward".into()]);
		registry.register(&cmd).await.unwrap();
		registry.register(&cmd).await.unwrap();
		assert_eq!(registry.pending().len(), 1);

		registry.unregister(&cmd).await.unwrap();
		assert!(registry.pending().is_empty());
		assert_eq!(registry.unregistered(), vec![cmd]);
	}

	#[tokio::test(start_paused = true)]
	async fn registration_can_be_slowed() {
		let registry = RecordingCleanup::new().with_register_delay(Duration::from_millis(200));
		let cmd = CleanupCommand::new("emu", "adb", vec!["forward".into()]);

		let started = tokio::time::Instant::now();
		registry.register(&cmd).await.unwrap();
		assert!(started.elapsed() >= Duration::from_millis(200));
		assert_eq!(registry.pending(), vec![cmd]);
	}
}
