//! Directory: the aggregation point between the registry, the rule sources
//! and the invocation path.
//!
//! Writers (registry watcher, rule sources, the host) push replacement values
//! through a [`Directory`] handle; a single worker task applies them in
//! arrival order and publishes an immutable [`Snapshot`]. Readers load the
//! latest snapshot without locking and never wait on a recompute.
//!
//! ```ignore
//! let directory = Directory::builder("org.example.DemoService")
//!     .consumer(consumer_url)
//!     .transport(Arc::new(my_transport))
//!     .build()?;
//! let subscription = directory.subscribe(&watcher, SubscriptionQuery::new("org.example.DemoService"));
//! directory.update_router_document("service", &yaml);
//!
//! let candidates = directory.route(&CallContext::for_consumer(consumer_url).with_method("find"));
//! ```

mod health;
mod snapshot;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

pub use health::{DirectoryHealth, DirectoryRegistry};
pub use snapshot::{DirectoryState, Snapshot};
use worker::{Command, Worker};

use crate::config::{ConfigError, DirectoryConfig};
use crate::configurator::ConfiguratorRule;
use crate::context::CallContext;
use crate::invoker::{Invoker, NullTransport, Transport};
use crate::registry::{NotifyListener, RegistryWatcher, SubscriptionHandle, SubscriptionQuery};
use crate::router::RouterRule;
use crate::rule::{
	MemoryRuleCache, RuleCache, RuleKey, RuleParse, parse_configurator_document, parse_router_document,
};
use crate::url::EndpointUrl;

/// Consumer parameter naming the calling application
pub const APPLICATION_KEY: &str = "application";

/// Memoizes router documents by source key and content
pub type RouterCache = Arc<dyn RuleCache<RuleParse<Arc<RouterRule>>>>;
/// Memoizes configurator documents by source key and content
pub type ConfiguratorCache = Arc<dyn RuleCache<RuleParse<Arc<ConfiguratorRule>>>>;

#[derive(Error, Debug)]
pub enum DirectoryError {
	#[error("service name must not be empty")]
	EmptyService,

	#[error("a directory must be built inside a tokio runtime")]
	NoRuntime,

	#[error("invalid directory config: {0}")]
	Config(#[from] ConfigError),
}

/// What happened to a rule update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum RuleUpdateOutcome {
	/// Queued; the next snapshot reflects it
	Accepted,
	/// Invalid; the rules previously registered under the key stay in force
	Rejected { reason: String },
	/// Scoped to another service or application; ignored
	OutOfScope { scope: String },
}

impl RuleUpdateOutcome {
	pub fn is_accepted(&self) -> bool {
		matches!(self, RuleUpdateOutcome::Accepted)
	}
}

pub struct DirectoryBuilder {
	service: String,
	consumer: Option<EndpointUrl>,
	config: DirectoryConfig,
	transport: Arc<dyn Transport>,
	health: Option<DirectoryRegistry>,
	router_cache: Option<RouterCache>,
	configurator_cache: Option<ConfiguratorCache>,
}

impl DirectoryBuilder {
	/// Descriptor of the calling side; routers see it at refresh time
	#[must_use]
	pub fn consumer(mut self, consumer: EndpointUrl) -> Self {
		self.consumer = Some(consumer);
		self
	}

	#[must_use]
	pub fn config(mut self, config: DirectoryConfig) -> Self {
		self.config = config;
		self
	}

	#[must_use]
	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = transport;
		self
	}

	#[must_use]
	pub fn health_registry(mut self, registry: DirectoryRegistry) -> Self {
		self.health = Some(registry);
		self
	}

	#[must_use]
	pub fn router_cache(mut self, cache: RouterCache) -> Self {
		self.router_cache = Some(cache);
		self
	}

	#[must_use]
	pub fn configurator_cache(mut self, cache: ConfiguratorCache) -> Self {
		self.configurator_cache = Some(cache);
		self
	}

	pub fn build(self) -> Result<Directory, DirectoryError> {
		let service = self.service.trim().to_string();
		if service.is_empty() {
			return Err(DirectoryError::EmptyService);
		}
		self.config.validate()?;
		let runtime = tokio::runtime::Handle::try_current().map_err(|_| DirectoryError::NoRuntime)?;

		let consumer = match self.consumer {
			Some(url) => CallContext::for_consumer(url),
			None => CallContext::new(),
		};
		let mut scopes = vec![service.clone()];
		if let Some(app) = consumer.consumer().and_then(|c| c.parameter(APPLICATION_KEY)) {
			scopes.push(app.to_string());
		}

		let published = Arc::new(ArcSwap::from_pointee(Snapshot::initial()));
		let (versions_tx, versions_rx) = watch::channel(0);
		let (tx, rx) = mpsc::unbounded_channel();
		let capacity = self.config.rule_cache_capacity;

		let worker = Worker {
			service: service.clone(),
			consumer,
			transport: self.transport,
			published: Arc::clone(&published),
			versions: versions_tx,
			raw: None,
			available: true,
			configurators: IndexMap::new(),
			routers: IndexMap::new(),
			invokers: HashMap::new(),
			version: 0,
		};
		runtime.spawn(worker.run(rx));

		let health = self.health.map(|registry| {
			let id = registry.register(&service, Arc::clone(&published));
			(registry, id)
		});
		info!(target: "directory", "{}: directory created", service);

		Ok(Directory {
			inner: Arc::new(DirectoryInner {
				service,
				scopes,
				config: self.config,
				tx,
				published,
				versions: versions_rx,
				router_cache: self.router_cache.unwrap_or_else(|| memory_cache(capacity)),
				configurator_cache: self.configurator_cache.unwrap_or_else(|| memory_cache(capacity)),
				subscriptions: Mutex::new(Vec::new()),
				health,
				destroyed: AtomicBool::new(false),
			}),
		})
	}
}

fn memory_cache<V: Clone + Send + 'static>(capacity: usize) -> Arc<dyn RuleCache<V>> {
	Arc::new(MemoryRuleCache::<V>::new(capacity))
}

/// Cheap, clonable handle to one directory
#[derive(Clone)]
pub struct Directory {
	inner: Arc<DirectoryInner>,
}

struct DirectoryInner {
	service: String,
	/// Rule documents must be scoped to one of these
	scopes: Vec<String>,
	config: DirectoryConfig,
	tx: mpsc::UnboundedSender<Command>,
	published: Arc<ArcSwap<Snapshot>>,
	versions: watch::Receiver<u64>,
	router_cache: RouterCache,
	configurator_cache: ConfiguratorCache,
	subscriptions: Mutex<Vec<SubscriptionHandle>>,
	health: Option<(DirectoryRegistry, u64)>,
	destroyed: AtomicBool,
}

impl Drop for DirectoryInner {
	fn drop(&mut self) {
		// Last handle gone: stop the watches so the worker can wind down
		for handle in self.subscriptions.get_mut().drain(..) {
			handle.unsubscribe();
		}
		if let Some((registry, id)) = &self.health {
			registry.deregister(*id);
		}
	}
}

impl std::fmt::Debug for Directory {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let snapshot = self.inner.published.load();
		f.debug_struct("Directory")
			.field("service", &self.inner.service)
			.field("version", &snapshot.version())
			.field("state", &snapshot.state())
			.field("invokers", &snapshot.invokers().len())
			.finish()
	}
}

impl Directory {
	pub fn builder(service: impl Into<String>) -> DirectoryBuilder {
		DirectoryBuilder {
			service: service.into(),
			consumer: None,
			config: DirectoryConfig::default(),
			transport: Arc::new(NullTransport),
			health: None,
			router_cache: None,
			configurator_cache: None,
		}
	}

	pub fn service(&self) -> &str {
		&self.inner.service
	}

	pub fn config(&self) -> &DirectoryConfig {
		&self.inner.config
	}

	// Read path: lock-free loads of the published snapshot

	pub fn snapshot(&self) -> Arc<Snapshot> {
		self.inner.published.load_full()
	}

	/// Candidates after configuration and the context-free routers
	pub fn current_invokers(&self) -> Arc<[Invoker]> {
		Arc::clone(self.inner.published.load().invokers())
	}

	/// Candidates for one call, running the routers that need the call context
	pub fn route(&self, ctx: &CallContext) -> Arc<[Invoker]> {
		self.inner.published.load().route(ctx)
	}

	pub fn state(&self) -> DirectoryState {
		self.inner.published.load().state()
	}

	pub fn is_ready(&self) -> bool {
		self.inner.published.load().is_ready()
	}

	pub fn is_destroyed(&self) -> bool {
		self.inner.destroyed.load(Ordering::Acquire)
	}

	/// Version of every published snapshot, starting at 0
	pub fn updates(&self) -> watch::Receiver<u64> {
		self.inner.versions.clone()
	}

	// Write path: everything goes through the worker queue

	fn send(&self, command: Command) -> bool {
		if self.is_destroyed() {
			return false;
		}
		self.inner.tx.send(command).is_ok()
	}

	/// Replace the raw provider set. An empty list means zero providers.
	pub fn notify(&self, providers: Vec<EndpointUrl>) {
		if !self.send(Command::Notify(providers)) {
			debug!(target: "directory", "{}: notification after destroy dropped", self.inner.service);
		}
	}

	/// Registry connectivity; `false` keeps the current providers and marks them stale
	pub fn set_available(&self, available: bool) {
		self.send(Command::Available(available));
	}

	fn check_rules<T>(&self, key: &str, parse: &RuleParse<T>) -> Result<(), RuleUpdateOutcome> {
		if let Some(reason) = parse.invalid_reason() {
			warn!(target: "directory", "{}: rejected rules from {}: {}", self.inner.service, key, reason);
			return Err(RuleUpdateOutcome::Rejected {
				reason: reason.to_string(),
			});
		}
		let scope = &parse.source.scope;
		if !self.inner.scopes.iter().any(|s| s == scope) {
			debug!(target: "directory", "{}: ignoring rules from {} scoped to {}", self.inner.service, key, scope);
			return Err(RuleUpdateOutcome::OutOfScope { scope: scope.clone() });
		}
		if self.is_destroyed() {
			return Err(RuleUpdateOutcome::Rejected {
				reason: "directory destroyed".into(),
			});
		}
		Ok(())
	}

	fn submit_configurators(&self, key: &str, parse: RuleParse<Arc<ConfiguratorRule>>) -> RuleUpdateOutcome {
		if let Err(outcome) = self.check_rules(key, &parse) {
			return outcome;
		}
		info!(target: "directory", "{}: {} configurator rules from {}", self.inner.service, parse.rules.len(), key);
		self.send(Command::Configurators {
			key: key.to_string(),
			rules: Some(parse.rules),
		});
		RuleUpdateOutcome::Accepted
	}

	fn submit_routers(&self, key: &str, parse: RuleParse<Arc<RouterRule>>) -> RuleUpdateOutcome {
		if let Err(outcome) = self.check_rules(key, &parse) {
			return outcome;
		}
		info!(target: "directory", "{}: {} router rules from {}", self.inner.service, parse.rules.len(), key);
		self.send(Command::Routers {
			key: key.to_string(),
			rules: Some(parse.rules),
		});
		RuleUpdateOutcome::Accepted
	}

	/// Replace the configurators registered under `key`
	pub fn update_configurators(&self, key: &str, parse: RuleParse<ConfiguratorRule>) -> RuleUpdateOutcome {
		self.submit_configurators(key, parse.shared())
	}

	/// Replace the routers registered under `key`
	pub fn update_routers(&self, key: &str, parse: RuleParse<RouterRule>) -> RuleUpdateOutcome {
		self.submit_routers(key, parse.shared())
	}

	/// Parse (or reuse the cached parse of) a configurator document
	pub fn update_configurator_document(&self, key: &str, text: &str) -> RuleUpdateOutcome {
		let cache_key = RuleKey::of(key, text);
		let parse = match self.inner.configurator_cache.get(&cache_key) {
			Some(parse) => parse,
			None => {
				let parse = parse_configurator_document(text).shared();
				self.inner.configurator_cache.put(cache_key, parse.clone());
				parse
			},
		};
		self.submit_configurators(key, parse)
	}

	/// Parse (or reuse the cached parse of) a router document
	pub fn update_router_document(&self, key: &str, text: &str) -> RuleUpdateOutcome {
		let cache_key = RuleKey::of(key, text);
		let parse = match self.inner.router_cache.get(&cache_key) {
			Some(parse) => parse,
			None => {
				let parse = parse_router_document(text).shared();
				self.inner.router_cache.put(cache_key, parse.clone());
				parse
			},
		};
		self.submit_routers(key, parse)
	}

	pub fn remove_configurators(&self, key: &str) {
		self.send(Command::Configurators {
			key: key.to_string(),
			rules: None,
		});
	}

	pub fn remove_routers(&self, key: &str) {
		self.send(Command::Routers {
			key: key.to_string(),
			rules: None,
		});
	}

	/// Feed this directory from a registry subscription
	pub fn subscribe(&self, watcher: &RegistryWatcher, query: SubscriptionQuery) -> SubscriptionHandle {
		let listener = Arc::new(DirectoryListener {
			service: self.inner.service.clone(),
			tx: self.inner.tx.clone(),
		});
		let handle = watcher.subscribe(query, listener);
		// destroy() sets the flag before draining under this lock
		let mut subscriptions = self.inner.subscriptions.lock();
		if self.is_destroyed() {
			handle.unsubscribe();
		} else {
			subscriptions.retain(SubscriptionHandle::is_active);
			subscriptions.push(handle.clone());
		}
		handle
	}

	/// Wait until everything submitted before this call is published.
	///
	/// Returns the version of the snapshot that reflects it.
	pub async fn flush(&self) -> u64 {
		let (tx, rx) = oneshot::channel();
		if !self.send(Command::Flush(tx)) {
			return self.snapshot().version();
		}
		match rx.await {
			Ok(version) => version,
			Err(_) => self.snapshot().version(),
		}
	}

	/// Stop the subscriptions, release every invoker and publish the
	/// terminal snapshot. Idempotent.
	pub async fn destroy(&self) {
		if self.inner.destroyed.swap(true, Ordering::AcqRel) {
			return;
		}
		let handles: Vec<_> = self.inner.subscriptions.lock().drain(..).collect();
		for handle in handles {
			handle.unsubscribe();
		}
		if let Some((registry, id)) = &self.inner.health {
			registry.deregister(*id);
		}

		let (tx, rx) = oneshot::channel();
		if self.inner.tx.send(Command::Destroy(tx)).is_ok() {
			let _ = rx.await;
		}
	}
}

/// Bridges a registry subscription into the worker queue
struct DirectoryListener {
	service: String,
	tx: mpsc::UnboundedSender<Command>,
}

impl NotifyListener for DirectoryListener {
	fn notify(&self, providers: Vec<EndpointUrl>) {
		if self.tx.send(Command::Notify(providers)).is_err() {
			debug!(target: "directory", "{}: snapshot after destroy dropped", self.service);
		}
	}

	fn availability_changed(&self, available: bool) {
		let _ = self.tx.send(Command::Available(available));
	}
}
