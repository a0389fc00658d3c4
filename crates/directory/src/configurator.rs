// Configurator Chain
//
// Ordered override rules that rewrite provider parameters before the
// provider becomes a routing candidate.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::warn;

use crate::rule::{ClauseSet, MatchError};
use crate::url::EndpointUrl;

/// Parameter that takes a provider out of the candidate set once set to `true`
pub const DISABLED_KEY: &str = "disabled";

/// Absent rules sort before override rules at equal priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfiguratorKind {
	Absent,
	Override,
}

impl ConfiguratorKind {
	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"override" => Some(ConfiguratorKind::Override),
			"absent" => Some(ConfiguratorKind::Absent),
			_ => None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct ConfiguratorRule {
	pub kind: ConfiguratorKind,
	pub priority: i32,
	/// Providers this rule rewrites
	pub scope: ClauseSet,
	/// Keys prefixed with `-` are removed by override rules
	pub deltas: IndexMap<String, String>,
}

impl ConfiguratorRule {
	pub fn new(kind: ConfiguratorKind, priority: i32, scope: ClauseSet) -> Self {
		Self {
			kind,
			priority,
			scope,
			deltas: IndexMap::new(),
		}
	}

	#[must_use]
	pub fn with_delta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.deltas.insert(key.into(), value.into());
		self
	}

	pub fn matches(&self, url: &EndpointUrl) -> Result<bool, MatchError> {
		self.scope.matches_url(url)
	}

	/// Rewrite without checking scope
	pub fn rewrite(&self, url: &EndpointUrl) -> EndpointUrl {
		let mut next = url.clone();
		for (key, value) in &self.deltas {
			match (self.kind, key.strip_prefix('-')) {
				(ConfiguratorKind::Override, Some(removed)) => next = next.without_parameter(removed),
				(ConfiguratorKind::Override, None) => next = next.with_parameter(key, value),
				(ConfiguratorKind::Absent, Some(_)) => {},
				(ConfiguratorKind::Absent, None) => {
					if next.parameter(key).is_none() {
						next = next.with_parameter(key, value);
					}
				},
			}
		}
		next
	}
}

/// Configurator rules sorted by `(priority, kind)`; ties keep registration order
#[derive(Debug, Clone, Default)]
pub struct ConfiguratorChain {
	rules: Vec<Arc<ConfiguratorRule>>,
}

impl ConfiguratorChain {
	pub fn new(rules: impl IntoIterator<Item = ConfiguratorRule>) -> Self {
		Self::from_shared(rules.into_iter().map(Arc::new))
	}

	pub fn from_shared(rules: impl IntoIterator<Item = Arc<ConfiguratorRule>>) -> Self {
		let mut rules: Vec<_> = rules.into_iter().collect();
		rules.sort_by_key(|r| (r.priority, r.kind));
		Self { rules }
	}

	pub fn is_empty(&self) -> bool {
		self.rules.is_empty()
	}

	pub fn len(&self) -> usize {
		self.rules.len()
	}

	/// Apply every matching rule in order.
	///
	/// A rule whose scope cannot be evaluated for this provider is skipped
	/// for this provider only.
	pub fn configure(&self, url: &EndpointUrl) -> EndpointUrl {
		let mut current = url.clone();
		for rule in &self.rules {
			match rule.matches(&current) {
				Ok(true) => current = rule.rewrite(&current),
				Ok(false) => {},
				Err(e) => {
					warn!(target: "configurator", "skipping {:?} rule for {}: {}", rule.kind, url.address(), e);
				},
			}
		}
		current
	}

	/// Configure every provider and drop the ones a rule disabled
	pub fn apply(&self, urls: &[EndpointUrl]) -> Vec<EndpointUrl> {
		urls
			.iter()
			.map(|u| self.configure(u))
			.filter(|u| !is_disabled(u))
			.collect()
	}
}

pub fn is_disabled(url: &EndpointUrl) -> bool {
	url.bool_parameter(DISABLED_KEY)
}
