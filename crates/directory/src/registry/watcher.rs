// Subscription loop: connect, forward snapshots, reconnect with backoff

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{NotifyListener, RegistryError, ServiceDiscovery, SubscriptionQuery};
use crate::config::{BackoffConfig, DirectoryConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchState {
	Connecting,
	Connected,
	Disconnected,
	Closed,
}

impl fmt::Display for WatchState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			WatchState::Connecting => "connecting",
			WatchState::Connected => "connected",
			WatchState::Disconnected => "disconnected",
			WatchState::Closed => "closed",
		};
		f.write_str(s)
	}
}

/// Keeps subscriptions to one discovery backend alive.
///
/// Every subscription runs in its own task until it is unsubscribed or the
/// watcher is shut down. Connection loss is never reported as an error: the
/// listener sees `availability_changed(false)`, keeps whatever it had, and
/// gets a fresh full snapshot once the watch is re-established.
#[derive(Clone)]
pub struct RegistryWatcher {
	inner: Arc<WatcherInner>,
}

struct WatcherInner {
	discovery: Arc<dyn ServiceDiscovery>,
	connect_timeout: Duration,
	backoff: BackoffConfig,
	shutdown: CancellationToken,
	subscriptions: Mutex<HashMap<u64, CancellationToken>>,
	next_id: AtomicU64,
}

impl fmt::Debug for RegistryWatcher {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RegistryWatcher")
			.field("connect_timeout", &self.inner.connect_timeout)
			.field("backoff", &self.inner.backoff)
			.field("subscriptions", &self.subscription_count())
			.finish()
	}
}

impl RegistryWatcher {
	pub fn new(discovery: Arc<dyn ServiceDiscovery>) -> Self {
		Self::from_config(discovery, &DirectoryConfig::default())
	}

	pub fn from_config(discovery: Arc<dyn ServiceDiscovery>, config: &DirectoryConfig) -> Self {
		Self {
			inner: Arc::new(WatcherInner {
				discovery,
				connect_timeout: config.connect_timeout,
				backoff: config.backoff.clone(),
				shutdown: CancellationToken::new(),
				subscriptions: Mutex::new(HashMap::new()),
				next_id: AtomicU64::new(1),
			}),
		}
	}

	pub fn connect_timeout(&self) -> Duration {
		self.inner.connect_timeout
	}

	pub fn subscription_count(&self) -> usize {
		self.inner.subscriptions.lock().len()
	}

	/// Start watching `query`. Must be called from within a tokio runtime.
	pub fn subscribe(&self, query: SubscriptionQuery, listener: Arc<dyn NotifyListener>) -> SubscriptionHandle {
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		let token = self.inner.shutdown.child_token();
		let (state_tx, state_rx) = watch::channel(WatchState::Connecting);
		self.inner.subscriptions.lock().insert(id, token.clone());

		let task = WatchTask {
			discovery: Arc::clone(&self.inner.discovery),
			query: query.clone(),
			listener,
			connect_timeout: self.inner.connect_timeout,
			backoff: self.inner.backoff.clone(),
			token: token.clone(),
			state: state_tx,
		};
		let inner = Arc::downgrade(&self.inner);
		tokio::spawn(async move {
			task.run().await;
			if let Some(inner) = inner.upgrade() {
				inner.subscriptions.lock().remove(&id);
			}
		});

		SubscriptionHandle {
			id,
			query,
			token,
			state: state_rx,
		}
	}

	pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
		handle.unsubscribe();
		self.inner.subscriptions.lock().remove(&handle.id);
	}

	/// Cancel every subscription, including ones made after this call
	pub fn shutdown(&self) {
		self.inner.shutdown.cancel();
		self.inner.subscriptions.lock().clear();
	}
}

/// Owned by whoever subscribed; dropping it does not unsubscribe
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
	id: u64,
	query: SubscriptionQuery,
	token: CancellationToken,
	state: watch::Receiver<WatchState>,
}

impl SubscriptionHandle {
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn query(&self) -> &SubscriptionQuery {
		&self.query
	}

	/// Stop delivery. Idempotent.
	pub fn unsubscribe(&self) {
		self.token.cancel();
	}

	pub fn is_active(&self) -> bool {
		!self.token.is_cancelled()
	}

	pub fn state(&self) -> WatchState {
		*self.state.borrow()
	}

	/// Resolve once the subscription reaches `target`; false if it closed first
	pub async fn wait_for_state(&self, target: WatchState) -> bool {
		let mut rx = self.state.clone();
		match rx.wait_for(|s| *s == target || *s == WatchState::Closed).await {
			Ok(state) => *state == target,
			Err(_) => target == WatchState::Closed,
		}
	}
}

struct WatchTask {
	discovery: Arc<dyn ServiceDiscovery>,
	query: SubscriptionQuery,
	listener: Arc<dyn NotifyListener>,
	connect_timeout: Duration,
	backoff: BackoffConfig,
	token: CancellationToken,
	state: watch::Sender<WatchState>,
}

impl WatchTask {
	async fn run(self) {
		let service = self.query.service.as_str();
		let mut attempt: u32 = 0;
		let mut available: Option<bool> = None;

		'watch: loop {
			self.state.send_replace(WatchState::Connecting);
			debug!(target: "registry", "connecting watch for {} (attempt {})", service, attempt + 1);

			let connected = tokio::select! {
				biased;
				_ = self.token.cancelled() => break 'watch,
				res = tokio::time::timeout(self.connect_timeout, self.discovery.watch(&self.query)) => {
					res.unwrap_or(Err(RegistryError::Timeout(self.connect_timeout)))
				},
			};

			let failure = match connected {
				Err(e) => e,
				Ok(mut stream) => {
					self.state.send_replace(WatchState::Connected);
					info!(target: "registry", "watch for {} connected", service);
					loop {
						let next = tokio::select! {
							biased;
							_ = self.token.cancelled() => break 'watch,
							next = stream.next() => next,
						};
						match next {
							Some(Ok(providers)) => {
								if self.token.is_cancelled() {
									break 'watch;
								}
								debug!(target: "registry", "{} providers for {}", providers.len(), service);
								self.listener.notify(providers);
								attempt = 0;
								if available != Some(true) {
									available = Some(true);
									self.listener.availability_changed(true);
								}
							},
							Some(Err(e)) => break e,
							None => break RegistryError::disconnected("watch stream ended"),
						}
					}
				},
			};

			self.state.send_replace(WatchState::Disconnected);
			if available != Some(false) {
				available = Some(false);
				self.listener.availability_changed(false);
			}
			let delay = self.backoff.delay(attempt);
			attempt = attempt.saturating_add(1);
			warn!(target: "registry", "watch for {} failed: {}; retrying in {:?}", service, failure, delay);

			tokio::select! {
				biased;
				_ = self.token.cancelled() => break 'watch,
				_ = tokio::time::sleep(delay) => {},
			}
		}

		self.state.send_replace(WatchState::Closed);
		info!(target: "registry", "watch for {} closed", service);
	}
}
