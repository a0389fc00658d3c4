//! Dynamic service directory for RPC clients.
//!
//! A [`Directory`] turns three independently changing inputs into one
//! published list of invokable endpoints:
//!
//! - the provider set pushed by a registry ([`registry`]),
//! - configurator rules that rewrite provider parameters ([`configurator`]),
//! - router rules that filter the candidates, at refresh or call time ([`router`]).
//!
//! Rules arrive as YAML documents parsed by [`rule`].

pub mod config;
pub mod configurator;
pub mod context;
pub mod directory;
pub mod invoker;
pub mod registry;
pub mod router;
pub mod rule;
pub mod telemetry;
pub mod url;

pub use config::{BackoffConfig, ConfigError, DirectoryConfig, parse_duration};
pub use configurator::{ConfiguratorChain, ConfiguratorKind, ConfiguratorRule};
pub use context::CallContext;
pub use directory::{
	Directory, DirectoryBuilder, DirectoryError, DirectoryHealth, DirectoryRegistry, DirectoryState, RuleUpdateOutcome,
	Snapshot,
};
pub use invoker::{Connection, Invoker, NullTransport, Transport, TransportError};
pub use registry::{
	FileRegistry, MemoryRegistry, NotifyListener, RegistryError, RegistryWatcher, ServiceDiscovery, SubscriptionHandle,
	SubscriptionQuery, WatchState,
};
pub use router::{RouteTable, Router, RouterChain, RouterRule};
pub use rule::{RuleParse, Validity, parse_configurator_document, parse_router_document};
pub use url::{EndpointUrl, UrlError};
