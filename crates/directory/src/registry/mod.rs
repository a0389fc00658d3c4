// Registry Watcher
//
// Discovery backends deliver full provider snapshots for one service; the
// watcher keeps a subscription alive across disconnects and forwards every
// snapshot to a listener (normally a Directory).
//
// Backends:
// - MemoryRegistry: in-process coordination service
// - FileRegistry: YAML providers file, hot-reloaded on change

mod error;
mod file;
mod memory;
mod watcher;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

pub use error::RegistryError;
pub use file::{FileRegistry, ProvidersFile};
pub use memory::MemoryRegistry;
pub use watcher::{RegistryWatcher, SubscriptionHandle, WatchState};

use crate::url::EndpointUrl;

/// Provider parameter holding the service group
pub const GROUP_KEY: &str = "group";
/// Provider parameter holding the service version
pub const VERSION_KEY: &str = "version";

/// Stream of full provider snapshots.
///
/// The first item is the complete current set. An `Err` item or the end of
/// the stream means the connection is gone; the watcher reconnects.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<Vec<EndpointUrl>, RegistryError>> + Send>>;

/// Which providers a subscription wants
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionQuery {
	pub service: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub group: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
}

impl SubscriptionQuery {
	pub fn new(service: impl Into<String>) -> Self {
		Self {
			service: service.into(),
			group: None,
			version: None,
		}
	}

	#[must_use]
	pub fn with_group(mut self, group: impl Into<String>) -> Self {
		self.group = Some(group.into());
		self
	}

	#[must_use]
	pub fn with_version(mut self, version: impl Into<String>) -> Self {
		self.version = Some(version.into());
		self
	}

	/// Group and version filters; `*` accepts anything
	pub fn matches(&self, url: &EndpointUrl) -> bool {
		fn accepts(wanted: Option<&String>, actual: Option<&str>) -> bool {
			match wanted.map(String::as_str) {
				None | Some("*") => true,
				Some(w) => actual.unwrap_or_default() == w,
			}
		}
		accepts(self.group.as_ref(), url.parameter(GROUP_KEY)) && accepts(self.version.as_ref(), url.parameter(VERSION_KEY))
	}

	pub fn filter<'a>(&self, urls: impl IntoIterator<Item = &'a EndpointUrl>) -> Vec<EndpointUrl> {
		urls.into_iter().filter(|u| self.matches(u)).cloned().collect()
	}
}

/// A coordination service that can stream provider snapshots
#[async_trait]
pub trait ServiceDiscovery: Send + Sync + 'static {
	/// Open a watch. Connecting may block; the watcher bounds it with a timeout.
	async fn watch(&self, query: &SubscriptionQuery) -> Result<SnapshotStream, RegistryError>;
}

/// Receives what a subscription observes
pub trait NotifyListener: Send + Sync + 'static {
	/// Full replacement of the provider set; empty means zero providers
	fn notify(&self, providers: Vec<EndpointUrl>);

	fn availability_changed(&self, available: bool);
}
