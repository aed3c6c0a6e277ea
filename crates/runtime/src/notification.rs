//! Named, app-scoped notification pub/sub.
//!
//! The iOS attach handshake coordinates with the app runtime by posting and
//! observing notifications. Subscriptions are callback based so that the
//! handshake layer can decide exactly when each one is torn down; every
//! [`NotificationCenter::subscribe`] must be paired with exactly one
//! [`NotificationCenter::unsubscribe`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;

/// Callback fired each time an observed notification is delivered.
pub type NotificationCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle for one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Per-device notification pub/sub.
#[async_trait]
pub trait NotificationCenter: Send + Sync {
	/// Posts `name` to the device.
	async fn post(&self, name: &str) -> Result<()>;

	/// Starts observing `name`. The callback may fire any number of times until unsubscribed.
	async fn subscribe(&self, name: &str, callback: NotificationCallback) -> Result<SubscriptionId>;

	/// Stops observing. Unknown or already removed ids are ignored.
	fn unsubscribe(&self, id: SubscriptionId);
}

#[derive(Default)]
struct LocalState {
	subscribers: HashMap<SubscriptionId, (String, NotificationCallback)>,
	posted: Vec<String>,
	unsubscribed: HashMap<SubscriptionId, usize>,
	delivered: HashMap<SubscriptionId, usize>,
	replies: HashMap<String, Vec<(String, Duration)>>,
	hooks: HashMap<String, Vec<NotificationCallback>>,
}

/// In-process notification center.
///
/// Used for simulators driven from the host and as a scriptable stand-in for
/// an app runtime: [`LocalNotificationCenter::reply`] makes a post of one name
/// trigger a later post of another.
#[derive(Clone, Default)]
pub struct LocalNotificationCenter {
	state: Arc<Mutex<LocalState>>,
	next_id: Arc<AtomicU64>,
}

impl LocalNotificationCenter {
	pub fn new() -> Self {
		Self::default()
	}

	/// When `trigger` is posted, post `response` after `delay`.
	pub fn reply(&self, trigger: impl Into<String>, response: impl Into<String>, delay: Duration) {
		self.state
			.lock()
			.replies
			.entry(trigger.into())
			.or_default()
			.push((response.into(), delay));
	}

	/// Runs `hook` synchronously every time `trigger` is posted, after subscribers.
	///
	/// Unlike a subscription the hook is not counted and can't be removed.
	pub fn on_post(&self, trigger: impl Into<String>, hook: NotificationCallback) {
		self.state.lock().hooks.entry(trigger.into()).or_default().push(hook);
	}

	/// Delivers `name` to current subscribers without recording a host post.
	pub fn deliver(&self, name: &str) {
		let callbacks: Vec<(SubscriptionId, NotificationCallback)> = {
			let mut st = self.state.lock();
			let matched: Vec<(SubscriptionId, NotificationCallback)> = st
				.subscribers
				.iter()
				.filter(|(_, (n, _))| n == name)
				.map(|(id, (_, cb))| (*id, Arc::clone(cb)))
				.collect();
			for (id, _) in &matched {
				*st.delivered.entry(*id).or_default() += 1;
			}
			matched
		};
		for (_, callback) in callbacks {
			callback();
		}
	}

	/// Names posted through [`NotificationCenter::post`], in order.
	pub fn posted(&self) -> Vec<String> {
		self.state.lock().posted.clone()
	}

	/// Number of live subscriptions.
	pub fn active_subscriptions(&self) -> usize {
		self.state.lock().subscribers.len()
	}

	/// How many times `id` was unsubscribed.
	pub fn unsubscribe_count(&self, id: SubscriptionId) -> usize {
		self.state.lock().unsubscribed.get(&id).copied().unwrap_or(0)
	}

	/// Every id ever unsubscribed with its count.
	pub fn unsubscribe_counts(&self) -> HashMap<SubscriptionId, usize> {
		self.state.lock().unsubscribed.clone()
	}

	/// How many callbacks were invoked for `id`.
	pub fn delivered_count(&self, id: SubscriptionId) -> usize {
		self.state.lock().delivered.get(&id).copied().unwrap_or(0)
	}
}

#[async_trait]
impl NotificationCenter for LocalNotificationCenter {
	async fn post(&self, name: &str) -> Result<()> {
		let (replies, hooks) = {
			let mut st = self.state.lock();
			st.posted.push(name.to_string());
			(
				st.replies.get(name).cloned().unwrap_or_default(),
				st.hooks.get(name).cloned().unwrap_or_default(),
			)
		};

		self.deliver(name);
		for hook in hooks {
			hook();
		}

		for (response, delay) in replies {
			let center = self.clone();
			tokio::spawn(async move {
				tokio::time::sleep(delay).await;
				center.deliver(&response);
			});
		}
		Ok(())
	}

	async fn subscribe(&self, name: &str, callback: NotificationCallback) -> Result<SubscriptionId> {
		let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
		self.state.lock().subscribers.insert(id, (name.to_string(), callback));
		Ok(id)
	}

	fn unsubscribe(&self, id: SubscriptionId) {
		let mut st = self.state.lock();
		st.subscribers.remove(&id);
		*st.unsubscribed.entry(id).or_default() += 1;
	}
}
