// Owned registry of live directories, for health reporting

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;

use super::{DirectoryState, Snapshot};

/// One row of [`DirectoryRegistry::report`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryHealth {
	pub id: u64,
	pub service: String,
	pub version: u64,
	pub state: DirectoryState,
	pub ready: bool,
	pub stale: bool,
	pub providers: usize,
	pub invokers: usize,
}

struct Entry {
	service: String,
	published: Arc<ArcSwap<Snapshot>>,
}

/// Enumerates the directories built against it.
///
/// Created and owned by the host; directories join through
/// [`DirectoryBuilder::health_registry`](super::DirectoryBuilder::health_registry)
/// and leave on destroy.
#[derive(Clone, Default)]
pub struct DirectoryRegistry {
	entries: Arc<RwLock<IndexMap<u64, Entry>>>,
	next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for DirectoryRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DirectoryRegistry").field("directories", &self.len()).finish()
	}
}

impl DirectoryRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub(crate) fn register(&self, service: &str, published: Arc<ArcSwap<Snapshot>>) -> u64 {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
		self.entries.write().insert(
			id,
			Entry {
				service: service.to_string(),
				published,
			},
		);
		id
	}

	pub(crate) fn deregister(&self, id: u64) {
		self.entries.write().shift_remove(&id);
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Current status of every registered directory, in registration order
	pub fn report(&self) -> Vec<DirectoryHealth> {
		self
			.entries
			.read()
			.iter()
			.map(|(id, entry)| {
				let snapshot = entry.published.load();
				DirectoryHealth {
					id: *id,
					service: entry.service.clone(),
					version: snapshot.version(),
					state: snapshot.state(),
					ready: snapshot.is_ready(),
					stale: snapshot.is_stale(),
					providers: snapshot.provider_count(),
					invokers: snapshot.invokers().len(),
				}
			})
			.collect()
	}

	/// True when every registered directory is serving fresh data
	pub fn all_healthy(&self) -> bool {
		self.report().iter().all(|h| h.ready && !h.stale)
	}
}
