// Rule Parser
//
// Turns router and configurator documents into typed rule sets:
// - YAML/JSON documents deserialized into typed structs
// - explicit validation per entry, malformed entries rejected with a reason
// - a parse result carrying a validity flag instead of an error
// - a small cache so unchanged documents are not recompiled

mod cache;
pub mod condition;
pub mod document;
mod parse;

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;

pub use cache::{MemoryRuleCache, RuleCache};
pub use condition::{Clause, ClauseSet, Condition, ConditionError, MatchError, Pattern};
pub use parse::{parse_configurator_document, parse_router_document};

/// Identity of the document a rule set was parsed from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSource {
	pub scope: String,
	pub config_version: String,
	pub enabled: bool,
	pub digest: u64,
}

impl RuleSource {
	fn unparsed(digest: u64) -> Self {
		Self {
			scope: String::new(),
			config_version: String::new(),
			enabled: false,
			digest,
		}
	}
}

/// Cache key: where a document came from plus a digest of its text
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleKey {
	pub source: String,
	pub digest: u64,
}

impl RuleKey {
	pub fn of(source: impl Into<String>, text: &str) -> Self {
		Self {
			source: source.into(),
			digest: digest(text),
		}
	}
}

pub(crate) fn digest(text: &str) -> u64 {
	let mut hasher = DefaultHasher::new();
	text.hash(&mut hasher);
	hasher.finish()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "reason")]
pub enum Validity {
	Valid,
	Invalid(String),
}

/// An entry the parser dropped, by position in the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedEntry {
	pub index: usize,
	pub reason: String,
}

/// Outcome of parsing one document.
///
/// Never an error: an unusable document comes back with
/// [`Validity::Invalid`] and no rules, so callers can keep serving with
/// whatever they had before.
#[derive(Debug, Clone)]
pub struct RuleParse<T> {
	pub source: RuleSource,
	pub rules: Vec<T>,
	pub rejected: Vec<RejectedEntry>,
	pub validity: Validity,
}

impl<T> RuleParse<T> {
	pub(crate) fn invalid(source: RuleSource, reason: impl Into<String>) -> Self {
		Self {
			source,
			rules: Vec::new(),
			rejected: Vec::new(),
			validity: Validity::Invalid(reason.into()),
		}
	}

	pub fn is_valid(&self) -> bool {
		self.validity == Validity::Valid
	}

	pub fn invalid_reason(&self) -> Option<&str> {
		match &self.validity {
			Validity::Valid => None,
			Validity::Invalid(reason) => Some(reason),
		}
	}

	/// Same result with each rule behind an `Arc`, ready to share between chains
	pub fn shared(self) -> RuleParse<Arc<T>> {
		RuleParse {
			source: self.source,
			rules: self.rules.into_iter().map(Arc::new).collect(),
			rejected: self.rejected,
			validity: self.validity,
		}
	}
}
