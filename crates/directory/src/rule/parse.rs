// Document parsing: deserialize, then validate entry by entry

use tracing::warn;

use super::document::{ConfiguratorDocument, ConfiguratorEntry, RouterDocument, RouterEntry};
use super::{ClauseSet, Condition, RejectedEntry, RuleParse, RuleSource, Validity, digest};
use crate::configurator::{ConfiguratorKind, ConfiguratorRule};
use crate::router::{ConditionRouter, MockRouter, Router, RouterRule, TagRouter};

const NO_VALID_ENTRIES: &str = "no valid rule entries";

/// Parse a router rule document.
///
/// Entries that fail validation are dropped and listed in
/// [`RuleParse::rejected`]; the document as a whole is invalid when it
/// cannot be deserialized, names no scope, or leaves no usable entry.
pub fn parse_router_document(text: &str) -> RuleParse<RouterRule> {
	let digest = digest(text);
	let doc: RouterDocument = match serde_yaml::from_str(text) {
		Ok(doc) => doc,
		Err(e) => {
			warn!(target: "rules", "router document is not valid YAML: {}", e);
			return RuleParse::invalid(RuleSource::unparsed(digest), format!("malformed document: {e}"));
		},
	};

	let source = RuleSource {
		scope: doc.scope.trim().to_string(),
		config_version: doc.config_version.clone(),
		enabled: doc.enabled,
		digest,
	};
	collect(source, &doc.rules, router_entry)
}

/// Parse a configurator rule document, with the same validity rules as
/// [`parse_router_document`].
pub fn parse_configurator_document(text: &str) -> RuleParse<ConfiguratorRule> {
	let digest = digest(text);
	let doc: ConfiguratorDocument = match serde_yaml::from_str(text) {
		Ok(doc) => doc,
		Err(e) => {
			warn!(target: "rules", "configurator document is not valid YAML: {}", e);
			return RuleParse::invalid(RuleSource::unparsed(digest), format!("malformed document: {e}"));
		},
	};

	let source = RuleSource {
		scope: doc.scope.trim().to_string(),
		config_version: doc.config_version.clone(),
		enabled: doc.enabled,
		digest,
	};
	collect(source, &doc.configs, configurator_entry)
}

fn collect<E, T>(source: RuleSource, entries: &[E], build: fn(&E) -> Result<T, String>) -> RuleParse<T> {
	if source.scope.is_empty() {
		warn!(target: "rules", "rule document has no scope");
		return RuleParse::invalid(source, "missing scope");
	}
	if !source.enabled {
		return RuleParse {
			source,
			rules: Vec::new(),
			rejected: Vec::new(),
			validity: Validity::Valid,
		};
	}

	let mut rules = Vec::with_capacity(entries.len());
	let mut rejected = Vec::new();
	for (index, entry) in entries.iter().enumerate() {
		match build(entry) {
			Ok(rule) => rules.push(rule),
			Err(reason) => {
				warn!(target: "rules", "scope {}: rejecting entry {}: {}", source.scope, index, reason);
				rejected.push(RejectedEntry { index, reason });
			},
		}
	}

	let validity = if rules.is_empty() {
		warn!(target: "rules", "scope {}: {}", source.scope, NO_VALID_ENTRIES);
		Validity::Invalid(NO_VALID_ENTRIES.to_string())
	} else {
		Validity::Valid
	};
	RuleParse {
		source,
		rules,
		rejected,
		validity,
	}
}

fn router_entry(entry: &RouterEntry) -> Result<RouterRule, String> {
	let kind = entry.kind.as_deref().unwrap_or("condition").trim().to_ascii_lowercase();
	let router = match kind.as_str() {
		"condition" => {
			if entry.conditions.is_empty() {
				return Err("condition rule has no conditions".to_string());
			}
			let conditions = entry
				.conditions
				.iter()
				.map(|c| Condition::parse(c).map_err(|e| format!("condition '{c}': {e}")))
				.collect::<Result<Vec<_>, _>>()?;
			Router::Condition(ConditionRouter::new(conditions))
		},
		"tag" => {
			let mut router = TagRouter::new(entry.force);
			for tag in &entry.tags {
				let name = tag.name.trim();
				if name.is_empty() {
					return Err("tag with an empty name".to_string());
				}
				router = router.with_tag(name, tag.addresses.iter().map(|a| a.trim().to_string()));
			}
			Router::Tag(router)
		},
		"mock" => Router::Mock(MockRouter),
		other => return Err(format!("unknown router type '{other}'")),
	};

	Ok(
		RouterRule::new(router)
			.with_priority(entry.priority)
			.with_force(entry.force)
			.with_runtime(entry.runtime),
	)
}

fn configurator_entry(entry: &ConfiguratorEntry) -> Result<ConfiguratorRule, String> {
	let kind = match entry.kind.as_deref() {
		None => ConfiguratorKind::Override,
		Some(raw) => ConfiguratorKind::parse(raw).ok_or_else(|| format!("unknown configurator kind '{raw}'"))?,
	};

	let mut scope = ClauseSet::default();
	for raw in &entry.match_conditions {
		let clauses = ClauseSet::parse(raw).map_err(|e| format!("match '{raw}': {e}"))?;
		scope.extend(clauses);
	}
	if scope.is_empty() {
		return Err("configurator has no match conditions".to_string());
	}
	if entry.parameters.is_empty() {
		return Err("configurator has no parameters".to_string());
	}

	let mut rule = ConfiguratorRule::new(kind, entry.priority, scope);
	for (key, value) in &entry.parameters {
		if key.trim().is_empty() || key.trim() == "-" {
			return Err("parameter with an empty key".to_string());
		}
		rule = rule.with_delta(key.trim(), scalar(key, value)?);
	}
	Ok(rule)
}

fn scalar(key: &str, value: &serde_yaml::Value) -> Result<String, String> {
	match value {
		serde_yaml::Value::String(s) => Ok(s.clone()),
		serde_yaml::Value::Bool(b) => Ok(b.to_string()),
		serde_yaml::Value::Number(n) => Ok(n.to_string()),
		_ => Err(format!("parameter '{key}' is not a scalar")),
	}
}
