// Single writer for one directory.
//
// Every input (registry snapshots, availability, rule updates) arrives on
// one queue and is applied in arrival order. The worker drains whatever is
// queued, recomputes once, and swaps in the new snapshot, so readers only
// ever see complete snapshots and a newer input can never be overtaken by
// an older one.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::{DirectoryState, Snapshot};
use crate::configurator::{ConfiguratorChain, ConfiguratorRule, is_disabled};
use crate::context::CallContext;
use crate::invoker::{Invoker, Transport};
use crate::router::{RouteTable, RouterChain, RouterRule};
use crate::url::EndpointUrl;

pub(crate) enum Command {
	Notify(Vec<EndpointUrl>),
	Available(bool),
	/// `None` removes the rules registered under `key`
	Configurators {
		key: String,
		rules: Option<Vec<Arc<ConfiguratorRule>>>,
	},
	Routers {
		key: String,
		rules: Option<Vec<Arc<RouterRule>>>,
	},
	Flush(oneshot::Sender<u64>),
	Destroy(oneshot::Sender<()>),
}

pub(crate) struct Worker {
	pub(crate) service: String,
	pub(crate) consumer: CallContext,
	pub(crate) transport: Arc<dyn Transport>,
	pub(crate) published: Arc<ArcSwap<Snapshot>>,
	pub(crate) versions: watch::Sender<u64>,

	/// `None` until the first registry snapshot
	pub(crate) raw: Option<Vec<EndpointUrl>>,
	pub(crate) available: bool,
	pub(crate) configurators: IndexMap<String, Vec<Arc<ConfiguratorRule>>>,
	pub(crate) routers: IndexMap<String, Vec<Arc<RouterRule>>>,
	/// Live invokers keyed by the descriptor the registry delivered
	pub(crate) invokers: HashMap<EndpointUrl, Invoker>,
	pub(crate) version: u64,
}

impl Worker {
	pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
		let mut batch = Vec::new();
		while let Some(first) = rx.recv().await {
			batch.push(first);
			while let Ok(next) = rx.try_recv() {
				batch.push(next);
			}

			let mut changed = false;
			let mut flushes = Vec::new();
			let mut destroy = None;
			for command in batch.drain(..) {
				match command {
					Command::Flush(tx) => flushes.push(tx),
					Command::Destroy(tx) => destroy = Some(tx),
					// Nothing queued after destroy is applied
					_ if destroy.is_some() => {},
					other => changed |= self.apply(other),
				}
			}

			if let Some(done) = destroy {
				self.release();
				for tx in flushes {
					let _ = tx.send(self.version);
				}
				let _ = done.send(());
				return;
			}

			if changed {
				self.recompute();
			}
			for tx in flushes {
				let _ = tx.send(self.version);
			}
		}

		// Every handle and listener is gone
		self.release();
	}

	/// Returns whether the input changed
	fn apply(&mut self, command: Command) -> bool {
		match command {
			Command::Notify(providers) => {
				debug!(target: "directory", "{}: registry delivered {} providers", self.service, providers.len());
				self.raw = Some(providers);
				self.available = true;
				true
			},
			Command::Available(available) => {
				if available == self.available {
					return false;
				}
				if available {
					info!(target: "directory", "{}: registry available again", self.service);
				} else {
					warn!(target: "directory", "{}: registry unavailable, keeping last known providers", self.service);
				}
				self.available = available;
				true
			},
			Command::Configurators { key, rules } => {
				match rules {
					Some(rules) => {
						self.configurators.insert(key, rules);
					},
					None => {
						self.configurators.shift_remove(&key);
					},
				}
				true
			},
			Command::Routers { key, rules } => {
				match rules {
					Some(rules) => {
						self.routers.insert(key, rules);
					},
					None => {
						self.routers.shift_remove(&key);
					},
				}
				true
			},
			Command::Flush(_) | Command::Destroy(_) => false,
		}
	}

	fn state(&self) -> DirectoryState {
		match (&self.raw, self.available) {
			(_, false) => DirectoryState::Degraded,
			(None, true) => DirectoryState::Uninitialized,
			(Some(_), true) => DirectoryState::Active,
		}
	}

	fn recompute(&mut self) {
		let configurators = ConfiguratorChain::from_shared(self.configurators.values().flatten().cloned());
		let routers = RouterChain::from_shared(self.routers.values().flatten().cloned());
		let raw = self.raw.as_deref().unwrap_or_default();

		let mut previous = std::mem::take(&mut self.invokers);
		let mut candidates = Vec::with_capacity(raw.len());
		for url in raw {
			if self.invokers.contains_key(url) {
				continue;
			}
			let configured = configurators.configure(url);
			if is_disabled(&configured) {
				debug!(target: "directory", "{}: {} disabled by configuration", self.service, url.address());
				continue;
			}

			let invoker = match previous.remove(url) {
				Some(existing) if existing.url() == &configured => existing,
				Some(existing) => existing.reconfigure(configured),
				None => match self.transport.connect(&configured) {
					Ok(connection) => Invoker::new(configured, url.clone(), connection),
					Err(e) => {
						warn!(target: "directory", "{}: skipping {}: {}", self.service, url.address(), e);
						continue;
					},
				},
			};
			self.invokers.insert(url.clone(), invoker.clone());
			candidates.push(invoker);
		}

		for (url, gone) in previous {
			debug!(target: "directory", "{}: releasing {}", self.service, url.address());
			gone.connection().close();
		}

		let before = self.published.load().invokers().len();
		let table = routers.prepare(candidates, &self.consumer);
		self.version += 1;
		let providers = self.raw.as_ref().map(Vec::len);
		let snapshot = Snapshot::new(self.version, self.state(), providers, table);
		let after = snapshot.invokers().len();
		self.published.store(Arc::new(snapshot));
		self.versions.send_replace(self.version);

		if before != after {
			info!(
				target: "directory",
				"{}: published version {} with {} invokers ({} providers, {} configurators, {} routers)",
				self.service, self.version, after, raw.len(), configurators.len(), routers.len()
			);
		} else {
			debug!(target: "directory", "{}: published version {} with {} invokers", self.service, self.version, after);
		}
	}

	/// Close every handle and publish the terminal snapshot
	fn release(&mut self) {
		for (_, invoker) in self.invokers.drain() {
			invoker.connection().close();
		}
		self.raw = None;
		self.version += 1;
		let terminal = Snapshot::new(self.version, DirectoryState::Destroyed, None, RouteTable::empty());
		self.published.store(Arc::new(terminal));
		self.versions.send_replace(self.version);
		info!(target: "directory", "{}: destroyed", self.service);
	}
}
