//! Notification handshake that decides when a debugger may attach on iOS.
//!
//! The building block is [`race`]: subscribe every waiter, fire the trigger,
//! take the first notification that arrives. Every waiter is unsubscribed
//! exactly once, whether it won, lost, timed out, or the race was dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use devbridge_protocol::Notification;
use devbridge_runtime::{NotificationCallback, NotificationCenter, SubscriptionId};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::config::DebugConfig;
use crate::error::Result;

/// A subscription with its own deadline.
#[derive(Debug)]
pub struct NotificationWaiter {
	pub name: String,
	pub timeout: Duration,
	id: SubscriptionId,
	settled: bool,
}

/// Owns the subscriptions of one race and releases them on drop.
struct WaiterSet {
	center: Arc<dyn NotificationCenter>,
	waiters: Vec<NotificationWaiter>,
}

impl WaiterSet {
	fn settle(&mut self, index: usize) {
		let waiter = &mut self.waiters[index];
		if !waiter.settled {
			waiter.settled = true;
			self.center.unsubscribe(waiter.id);
		}
	}

	fn settle_all(&mut self) {
		for index in 0..self.waiters.len() {
			self.settle(index);
		}
	}

	/// Earliest pending deadline.
	fn next_deadline(&self, started: Instant) -> Option<(usize, Instant)> {
		self.waiters
			.iter()
			.enumerate()
			.filter(|(_, w)| !w.settled)
			.map(|(i, w)| (i, started + w.timeout))
			.min_by_key(|(_, deadline)| *deadline)
	}
}

impl Drop for WaiterSet {
	fn drop(&mut self) {
		self.settle_all();
	}
}

/// Races `legs` (notification name, timeout) and returns the index of the winner.
///
/// All legs are subscribed before `trigger` runs. `None` means every leg timed out.
pub async fn race<F>(center: &Arc<dyn NotificationCenter>, legs: &[(String, Duration)], trigger: F) -> Result<Option<usize>>
where
	F: Future<Output = Result<()>>,
{
	let (tx, mut rx) = mpsc::unbounded_channel::<usize>();
	let mut set = WaiterSet {
		center: Arc::clone(center),
		waiters: Vec::with_capacity(legs.len()),
	};

	for (index, (name, timeout)) in legs.iter().enumerate() {
		let tx = tx.clone();
		let callback: NotificationCallback = Arc::new(move || {
			let _ = tx.send(index);
		});
		let id = center.subscribe(name, callback).await?;
		set.waiters.push(NotificationWaiter {
			name: name.clone(),
			timeout: *timeout,
			id,
			settled: false,
		});
	}
	drop(tx);

	trigger.await?;

	let started = Instant::now();
	while let Some((expiring, deadline)) = set.next_deadline(started) {
		tokio::select! {
			Some(index) = rx.recv() => {
				if set.waiters[index].settled {
					continue;
				}
				debug!(target = "devbridge.handshake", winner = %set.waiters[index].name, "race settled");
				set.settle_all();
				return Ok(Some(index));
			}
			_ = tokio::time::sleep_until(deadline) => {
				debug!(target = "devbridge.handshake", leg = %set.waiters[expiring].name, "race leg timed out");
				set.settle(expiring);
			}
		}
	}
	Ok(None)
}

/// How the debugger attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachMode {
	/// The app is already running.
	Running,
	/// The app is being launched and waits for the debugger.
	Launch,
}

/// Handshake result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
	Ready,
	/// Another debugger holds the inspector.
	AlreadyAttached,
	TimedOut,
}

#[derive(Debug, Clone, Copy)]
pub struct HandshakeTimeouts {
	pub leg: Duration,
	pub launch: Duration,
	pub ready: Duration,
}

impl From<&DebugConfig> for HandshakeTimeouts {
	fn from(config: &DebugConfig) -> Self {
		Self {
			leg: config.race_leg_timeout(),
			launch: config.app_launch_timeout(),
			ready: config.ready_after_request(),
		}
	}
}

/// Runs the attach handshake for one app.
pub struct HandshakeCoordinator {
	center: Arc<dyn NotificationCenter>,
	app_id: String,
	timeouts: HandshakeTimeouts,
}

impl HandshakeCoordinator {
	pub fn new(center: Arc<dyn NotificationCenter>, app_id: impl Into<String>, timeouts: HandshakeTimeouts) -> Self {
		Self {
			center,
			app_id: app_id.into(),
			timeouts,
		}
	}

	fn name(&self, notification: Notification) -> String {
		notification.qualified(&self.app_id)
	}

	async fn post(&self, notification: Notification) -> Result<()> {
		Ok(self.center.post(&self.name(notification)).await?)
	}

	/// Attaches to an app that is already running.
	pub async fn attach_running(&self) -> Result<AttachOutcome> {
		let leg = self.timeouts.leg;
		let legs = [
			(self.name(Notification::AlreadyConnected), leg),
			(self.name(Notification::ReadyForAttach), leg),
			(self.name(Notification::AttachAvailable), leg),
		];
		let winner = race(&self.center, &legs, self.post(Notification::AttachAvailabilityQuery)).await?;
		match winner {
			Some(0) => Ok(AttachOutcome::AlreadyAttached),
			Some(1) => Ok(AttachOutcome::Ready),
			Some(_) => self.request_attach(leg).await,
			None => Ok(AttachOutcome::TimedOut),
		}
	}

	/// Waits for the app to launch, then attaches before it runs any code.
	///
	/// `launch` runs after the launch notification is observed, so a fast
	/// start cannot be missed.
	pub async fn attach_at_launch<F>(&self, launch: F) -> Result<AttachOutcome>
	where
		F: Future<Output = Result<()>>,
	{
		let legs = [(self.name(Notification::AppLaunching), self.timeouts.launch)];
		if race(&self.center, &legs, launch).await?.is_none() {
			return Ok(AttachOutcome::TimedOut);
		}
		self.post(Notification::WaitForDebugger).await?;
		self.request_attach(self.timeouts.ready).await
	}

	async fn request_attach(&self, timeout: Duration) -> Result<AttachOutcome> {
		let legs = [(self.name(Notification::ReadyForAttach), timeout)];
		match race(&self.center, &legs, self.post(Notification::AttachRequest)).await? {
			Some(_) => Ok(AttachOutcome::Ready),
			None => Ok(AttachOutcome::TimedOut),
		}
	}
}

#[cfg(test)]
mod tests {
	use devbridge_runtime::LocalNotificationCenter;

	use super::*;

	const APP: &str = "org.demo";

	fn timeouts() -> HandshakeTimeouts {
		HandshakeTimeouts {
			leg: Duration::from_secs(2),
			launch: Duration::from_secs(60),
			ready: Duration::from_secs(5),
		}
	}

	fn coordinator(center: &LocalNotificationCenter) -> HandshakeCoordinator {
		HandshakeCoordinator::new(Arc::new(center.clone()), APP, timeouts())
	}

	fn q(n: Notification) -> String {
		n.qualified(APP)
	}

	#[tokio::test(start_paused = true)]
	async fn ready_for_attach_wins_directly() {
		let center = LocalNotificationCenter::new();
		center.reply(q(Notification::AttachAvailabilityQuery), q(Notification::ReadyForAttach), Duration::from_millis(100));

		assert_eq!(coordinator(&center).attach_running().await.unwrap(), AttachOutcome::Ready);
		assert_eq!(center.posted(), vec![q(Notification::AttachAvailabilityQuery)]);
		assert_eq!(center.active_subscriptions(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn attach_available_requests_attach() {
		let center = LocalNotificationCenter::new();
		center.reply(q(Notification::AttachAvailabilityQuery), q(Notification::AttachAvailable), Duration::from_millis(100));
		center.reply(q(Notification::AttachRequest), q(Notification::ReadyForAttach), Duration::from_millis(100));

		assert_eq!(coordinator(&center).attach_running().await.unwrap(), AttachOutcome::Ready);
		assert_eq!(
			center.posted(),
			vec![q(Notification::AttachAvailabilityQuery), q(Notification::AttachRequest)]
		);
		assert_eq!(center.active_subscriptions(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn already_connected_wins() {
		let center = LocalNotificationCenter::new();
		center.reply(q(Notification::AttachAvailabilityQuery), q(Notification::AlreadyConnected), Duration::from_millis(50));

		assert_eq!(
			coordinator(&center).attach_running().await.unwrap(),
			AttachOutcome::AlreadyAttached
		);
	}

	#[tokio::test(start_paused = true)]
	async fn silence_times_out_and_unsubscribes_each_leg_once() {
		let center = LocalNotificationCenter::new();
		let started = Instant::now();

		assert_eq!(coordinator(&center).attach_running().await.unwrap(), AttachOutcome::TimedOut);
		assert!(started.elapsed() >= Duration::from_secs(2));

		let counts = center.unsubscribe_counts();
		assert_eq!(counts.len(), 3);
		assert!(counts.values().all(|&n| n == 1));
	}

	#[tokio::test(start_paused = true)]
	async fn losers_are_unsubscribed_once_and_never_fire() {
		let center = LocalNotificationCenter::new();
		let shared: Arc<dyn NotificationCenter> = Arc::new(center.clone());
		let legs = vec![
			("a".to_string(), Duration::from_secs(2)),
			("b".to_string(), Duration::from_secs(2)),
			("c".to_string(), Duration::from_secs(2)),
		];
		center.reply("go", "b", Duration::from_millis(10));

		let winner = race(&shared, &legs, async {
			shared.post("go").await?;
			Ok::<(), crate::error::Error>(())
		})
		.await
		.unwrap();
		assert_eq!(winner, Some(1));

		let counts = center.unsubscribe_counts();
		assert_eq!(counts.len(), 3);
		assert!(counts.values().all(|&n| n == 1));

		// Late notifications for the losers reach nobody; only the winner ever fired.
		center.deliver("a");
		center.deliver("c");
		assert_eq!(center.active_subscriptions(), 0);
		let fired: usize = counts.keys().map(|id| center.delivered_count(*id)).sum();
		assert_eq!(fired, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn subscriptions_exist_before_trigger() {
		let center = LocalNotificationCenter::new();
		let shared: Arc<dyn NotificationCenter> = Arc::new(center.clone());
		let legs = vec![("fast".to_string(), Duration::from_secs(1))];

		// The trigger answers synchronously; a subscribe-after-post would miss it.
		let probe = center.clone();
		let winner = race(&shared, &legs, async move {
			assert_eq!(probe.active_subscriptions(), 1);
			probe.deliver("fast");
			Ok(())
		})
		.await
		.unwrap();
		assert_eq!(winner, Some(0));
	}

	#[tokio::test(start_paused = true)]
	async fn dropped_race_releases_waiters() {
		let center = LocalNotificationCenter::new();
		let shared: Arc<dyn NotificationCenter> = Arc::new(center.clone());
		let legs = vec![("x".to_string(), Duration::from_secs(60))];

		let outcome = tokio::time::timeout(Duration::from_secs(1), race(&shared, &legs, async { Ok(()) })).await;
		assert!(outcome.is_err());
		assert_eq!(center.active_subscriptions(), 0);
		assert!(center.unsubscribe_counts().values().all(|&n| n == 1));
	}

	#[tokio::test(start_paused = true)]
	async fn launch_mode_sequence() {
		let center = LocalNotificationCenter::new();
		center.reply(q(Notification::AttachRequest), q(Notification::ReadyForAttach), Duration::from_millis(200));
		let launcher = center.clone();

		let outcome = coordinator(&center)
			.attach_at_launch(async move {
				let started = launcher.clone();
				tokio::spawn(async move {
					tokio::time::sleep(Duration::from_secs(3)).await;
					started.deliver(&q(Notification::AppLaunching));
				});
				Ok(())
			})
			.await
			.unwrap();

		assert_eq!(outcome, AttachOutcome::Ready);
		assert_eq!(
			center.posted(),
			vec![q(Notification::WaitForDebugger), q(Notification::AttachRequest)]
		);
	}

	#[tokio::test(start_paused = true)]
	async fn launch_wait_times_out() {
		let center = LocalNotificationCenter::new();
		let outcome = coordinator(&center)
			.attach_at_launch(async { Ok::<(), crate::error::Error>(()) })
			.await
			.unwrap();
		assert_eq!(outcome, AttachOutcome::TimedOut);
		assert!(center.posted().is_empty());
	}
}
