// In-process coordination service

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use indexmap::IndexMap;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::info;

use super::{RegistryError, ServiceDiscovery, SnapshotStream, SubscriptionQuery};
use crate::url::EndpointUrl;

#[derive(Debug, Clone, Default)]
struct RegistryState {
	services: IndexMap<String, Vec<EndpointUrl>>,
	disconnected: bool,
}

/// Provider table shared by every watch.
///
/// Watches see the latest state; intermediate states may be skipped but
/// never reordered. [`MemoryRegistry::disconnect`] breaks every open watch
/// and refuses new ones until [`MemoryRegistry::reconnect`].
#[derive(Debug, Clone)]
pub struct MemoryRegistry {
	state: Arc<watch::Sender<RegistryState>>,
}

impl Default for MemoryRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryRegistry {
	pub fn new() -> Self {
		let (tx, _) = watch::channel(RegistryState::default());
		Self { state: Arc::new(tx) }
	}

	/// Add or replace one provider (matched by address)
	pub fn register(&self, service: &str, url: EndpointUrl) {
		self.state.send_modify(|s| {
			let providers = s.services.entry(service.to_string()).or_default();
			match providers.iter_mut().find(|p| p.address() == url.address()) {
				Some(existing) => *existing = url,
				None => providers.push(url),
			}
		});
	}

	pub fn unregister(&self, service: &str, url: &EndpointUrl) {
		self.state.send_modify(|s| {
			if let Some(providers) = s.services.get_mut(service) {
				providers.retain(|p| p.address() != url.address());
			}
		});
	}

	/// Replace a service's whole provider list
	pub fn set_providers(&self, service: &str, providers: Vec<EndpointUrl>) {
		self.state.send_modify(|s| {
			s.services.insert(service.to_string(), providers);
		});
	}

	pub fn providers(&self, service: &str) -> Vec<EndpointUrl> {
		self.state.borrow().services.get(service).cloned().unwrap_or_default()
	}

	pub fn disconnect(&self) {
		info!(target: "registry", "memory registry disconnected");
		self.state.send_modify(|s| s.disconnected = true);
	}

	pub fn reconnect(&self) {
		info!(target: "registry", "memory registry reconnected");
		self.state.send_modify(|s| s.disconnected = false);
	}

	pub fn is_connected(&self) -> bool {
		!self.state.borrow().disconnected
	}

	/// Open watches
	pub fn watchers(&self) -> usize {
		self.state.receiver_count()
	}
}

#[async_trait]
impl ServiceDiscovery for MemoryRegistry {
	async fn watch(&self, query: &SubscriptionQuery) -> Result<SnapshotStream, RegistryError> {
		let rx = self.state.subscribe();
		if rx.borrow().disconnected {
			return Err(RegistryError::connect("memory registry is disconnected"));
		}

		let query = query.clone();
		let stream = WatchStream::new(rx)
			.map(move |state| {
				if state.disconnected {
					return Err(RegistryError::disconnected("memory registry is disconnected"));
				}
				let providers = state.services.get(&query.service).map(Vec::as_slice).unwrap_or_default();
				Ok(query.filter(providers))
			})
			.scan(false, |failed, item| {
				// Nothing after the first failure: the watch is dead
				if *failed {
					return futures::future::ready(None);
				}
				*failed = item.is_err();
				futures::future::ready(Some(item))
			});
		Ok(Box::pin(stream))
	}
}
