// File-backed registry: a YAML providers file, reloaded when it changes

use std::path::{Path, PathBuf, absolute};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::DebounceEventResult;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{RegistryError, ServiceDiscovery, SnapshotStream, SubscriptionQuery};
use crate::url::EndpointUrl;

/// On-disk format:
///
/// ```yaml
/// providers:
///   org.example.DemoService:
///     - dubbo://10.0.0.1:20880/org.example.DemoService?weight=100
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersFile {
	#[serde(default)]
	pub providers: IndexMap<String, Vec<String>>,
}

impl ProvidersFile {
	pub fn parse(text: &str) -> Result<Self, RegistryError> {
		if text.trim().is_empty() {
			return Ok(Self::default());
		}
		Ok(serde_yaml::from_str(text)?)
	}

	/// Providers of one service; entries that are not valid descriptors are skipped
	pub fn endpoints(&self, service: &str) -> Vec<EndpointUrl> {
		let Some(raw) = self.providers.get(service) else {
			return Vec::new();
		};
		raw
			.iter()
			.filter_map(|s| match EndpointUrl::parse(s) {
				Ok(url) => Some(url),
				Err(e) => {
					warn!(target: "registry", "skipping provider of {}: {}", service, e);
					None
				},
			})
			.collect()
	}
}

/// Watches a providers file; an unreadable or unparsable file counts as a
/// lost connection
#[derive(Debug, Clone)]
pub struct FileRegistry {
	path: PathBuf,
	debounce: Duration,
}

impl FileRegistry {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			debounce: Duration::from_millis(250),
		}
	}

	#[must_use]
	pub fn with_debounce(mut self, debounce: Duration) -> Self {
		self.debounce = debounce;
		self
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub async fn load(&self) -> Result<ProvidersFile, RegistryError> {
		let content = fs_err::tokio::read_to_string(&self.path).await?;
		ProvidersFile::parse(&content)
	}

	async fn snapshot(&self, query: &SubscriptionQuery) -> Result<Vec<EndpointUrl>, RegistryError> {
		let file = self.load().await?;
		Ok(query.filter(&file.endpoints(&query.service)))
	}
}

fn touches(events: &DebounceEventResult, path: &Path) -> bool {
	match events {
		Ok(events) => events.iter().any(|e| {
			matches!(e.kind, EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_))
				&& e.paths.iter().any(|p| p == path)
		}),
		Err(_) => true,
	}
}

#[async_trait]
impl ServiceDiscovery for FileRegistry {
	async fn watch(&self, query: &SubscriptionQuery) -> Result<SnapshotStream, RegistryError> {
		let abspath = absolute(&self.path).map_err(|e| RegistryError::Watch(format!("failed to get absolute path: {e}")))?;
		let parent = abspath
			.parent()
			.ok_or_else(|| RegistryError::Watch("failed to get parent directory".into()))?
			.to_path_buf();

		let (tx, rx) = mpsc::channel(1);
		let mut debouncer = notify_debouncer_full::new_debouncer(self.debounce, None, move |res| {
			futures::executor::block_on(async {
				let _ = tx.send(res).await;
			})
		})
		.map_err(|e| RegistryError::Watch(format!("failed to create file watcher: {e}")))?;
		debouncer
			.watch(&parent, RecursiveMode::NonRecursive)
			.map_err(|e| RegistryError::Watch(format!("failed to watch {}: {e}", parent.display())))?;

		// Read after the watch is in place so no change is missed
		let first = self.snapshot(query).await?;
		info!(target: "registry", "watching providers file {} for {}", abspath.display(), query.service);

		let registry = self.clone();
		let query = query.clone();
		let stream = futures::stream::unfold(
			(Some(first), rx, debouncer, false),
			move |(pending, mut rx, debouncer, failed)| {
				let registry = registry.clone();
				let query = query.clone();
				let abspath = abspath.clone();
				async move {
					if let Some(first) = pending {
						return Some((Ok(first), (None, rx, debouncer, false)));
					}
					if failed {
						return None;
					}
					loop {
						let events = rx.recv().await?;
						if !touches(&events, &abspath) {
							continue;
						}
						debug!(target: "registry", "providers file {} changed", abspath.display());
						let item = registry.snapshot(&query).await;
						let failed = item.is_err();
						return Some((item, (None, rx, debouncer, failed)));
					}
				}
			},
		);
		Ok(Box::pin(stream))
	}
}
