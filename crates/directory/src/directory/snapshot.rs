// Published directory view

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::context::CallContext;
use crate::invoker::Invoker;
use crate::router::RouteTable;

/// Lifecycle of one directory
///
/// `Uninitialized -> Active <-> Degraded -> Destroyed`, plus
/// `Uninitialized -> Degraded` when the first connect never succeeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryState {
	/// No provider snapshot received yet
	Uninitialized,
	Active,
	/// Registry unreachable; serving the last known-good providers, if any
	Degraded,
	Destroyed,
}

impl fmt::Display for DirectoryState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			DirectoryState::Uninitialized => "uninitialized",
			DirectoryState::Active => "active",
			DirectoryState::Degraded => "degraded",
			DirectoryState::Destroyed => "destroyed",
		};
		f.write_str(s)
	}
}

/// Immutable result of one recompute.
///
/// Everything in here was derived from the same provider set and rule
/// chains; a newer version fully replaces it.
#[derive(Debug, Clone)]
pub struct Snapshot {
	version: u64,
	state: DirectoryState,
	/// `None` until the registry delivered a provider set
	providers: Option<usize>,
	table: RouteTable,
}

impl Snapshot {
	pub(crate) fn initial() -> Self {
		Self {
			version: 0,
			state: DirectoryState::Uninitialized,
			providers: None,
			table: RouteTable::empty(),
		}
	}

	pub(crate) fn new(version: u64, state: DirectoryState, providers: Option<usize>, table: RouteTable) -> Self {
		Self {
			version,
			state,
			providers,
			table,
		}
	}

	pub fn version(&self) -> u64 {
		self.version
	}

	pub fn state(&self) -> DirectoryState {
		self.state
	}

	/// False until the first provider snapshot arrived, and after destroy
	pub fn is_ready(&self) -> bool {
		self.providers.is_some() && self.state != DirectoryState::Destroyed
	}

	/// The registry is unreachable and these invokers may be out of date
	pub fn is_stale(&self) -> bool {
		self.state == DirectoryState::Degraded
	}

	/// Raw providers the registry last reported
	pub fn provider_count(&self) -> usize {
		self.providers.unwrap_or(0)
	}

	/// Candidates after configuration and the context-free routers
	pub fn invokers(&self) -> &Arc<[Invoker]> {
		self.table.invokers()
	}

	/// Candidates for one call
	pub fn route(&self, ctx: &CallContext) -> Arc<[Invoker]> {
		self.table.route(ctx)
	}

	pub fn route_table(&self) -> &RouteTable {
		&self.table
	}
}
