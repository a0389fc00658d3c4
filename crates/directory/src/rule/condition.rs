// Condition grammar shared by routing and configuration rules
//
//   condition := [ clauses ] '=>' [ clauses ] | clauses
//   clauses   := clause ( '&' clause )*
//   clause    := key '=' values | key '!=' values
//   values    := pattern ( ',' pattern )*
//
// A pattern is a literal, a `*` glob, a `lo~hi` numeric range or `~regex`.

use std::borrow::Cow;

use regex::Regex;
use thiserror::Error;

use crate::context::CallContext;
use crate::url::EndpointUrl;

/// Errors raised while parsing a condition; they make the owning rule invalid
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
	#[error("condition has no clauses")]
	Empty,

	#[error("clause '{0}' has no '=' or '!=' operator")]
	MissingOperator(String),

	#[error("clause '{0}' has an empty key")]
	EmptyKey(String),

	#[error("clause '{0}' has no values")]
	EmptyValue(String),

	#[error("'{0}' has a misplaced '=>'")]
	MisplacedArrow(String),

	#[error("invalid regex '{pattern}': {message}")]
	InvalidRegex { pattern: String, message: String },
}

/// Errors raised while evaluating a parsed condition against a value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
	#[error("value '{value}' of '{key}' is not numeric")]
	NotNumeric { key: String, value: String },
}

/// A single value pattern
#[derive(Debug, Clone)]
pub enum Pattern {
	Exact(String),
	Glob(String),
	Range { lo: f64, hi: f64 },
	Regex(Regex),
}

impl Pattern {
	pub fn parse(raw: &str) -> Result<Self, ConditionError> {
		if let Some(expr) = raw.strip_prefix('~') {
			let re = Regex::new(expr).map_err(|e| ConditionError::InvalidRegex {
				pattern: expr.to_string(),
				message: e.to_string(),
			})?;
			return Ok(Pattern::Regex(re));
		}

		if let Some((lo, hi)) = raw.split_once('~')
			&& let (Ok(lo), Ok(hi)) = (lo.trim().parse::<f64>(), hi.trim().parse::<f64>())
		{
			return Ok(Pattern::Range {
				lo: lo.min(hi),
				hi: lo.max(hi),
			});
		}

		if raw.contains('*') {
			Ok(Pattern::Glob(raw.to_string()))
		} else {
			Ok(Pattern::Exact(raw.to_string()))
		}
	}

	fn matches(&self, key: &str, value: &str) -> Result<bool, MatchError> {
		match self {
			Pattern::Exact(expected) => Ok(expected == value),
			Pattern::Glob(glob) => Ok(glob_match(glob, value)),
			Pattern::Regex(re) => Ok(re.is_match(value)),
			Pattern::Range { lo, hi } => {
				let n = value.trim().parse::<f64>().map_err(|_| MatchError::NotNumeric {
					key: key.to_string(),
					value: value.to_string(),
				})?;
				Ok(*lo <= n && n <= *hi)
			},
		}
	}
}

/// `*` matches any run of characters, everything else is literal
fn glob_match(pattern: &str, value: &str) -> bool {
	let parts: Vec<&str> = pattern.split('*').collect();
	let [first, middle @ .., last] = parts.as_slice() else {
		return pattern == value;
	};
	if !value.starts_with(first) {
		return false;
	}

	let mut pos = first.len();
	for part in middle {
		if part.is_empty() {
			continue;
		}
		match value[pos..].find(part) {
			Some(i) => pos += i + part.len(),
			None => return false,
		}
	}

	value.len() >= pos + last.len() && value[pos..].ends_with(last)
}

/// One `key = values` or `key != values` clause
#[derive(Debug, Clone)]
pub struct Clause {
	key: String,
	negated: bool,
	patterns: Vec<Pattern>,
}

impl Clause {
	pub fn parse(raw: &str) -> Result<Self, ConditionError> {
		if raw.contains("=>") {
			return Err(ConditionError::MisplacedArrow(raw.trim().to_string()));
		}
		let (key, values, negated) = if let Some((k, v)) = raw.split_once("!=") {
			(k, v, true)
		} else if let Some((k, v)) = raw.split_once('=') {
			(k, v, false)
		} else {
			return Err(ConditionError::MissingOperator(raw.trim().to_string()));
		};

		let key = key.trim();
		if key.is_empty() {
			return Err(ConditionError::EmptyKey(raw.trim().to_string()));
		}

		let patterns = values
			.split(',')
			.map(str::trim)
			.filter(|v| !v.is_empty())
			.map(Pattern::parse)
			.collect::<Result<Vec<_>, _>>()?;
		if patterns.is_empty() {
			return Err(ConditionError::EmptyValue(raw.trim().to_string()));
		}

		Ok(Self {
			key: key.to_string(),
			negated,
			patterns,
		})
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	/// A missing value never satisfies `=` and always satisfies `!=`
	fn evaluate(&self, value: Option<&str>) -> Result<bool, MatchError> {
		let Some(value) = value else {
			return Ok(self.negated);
		};
		let mut hit = false;
		for pattern in &self.patterns {
			if pattern.matches(&self.key, value)? {
				hit = true;
				break;
			}
		}
		Ok(hit != self.negated)
	}
}

/// Conjunction of clauses; an empty set matches everything
#[derive(Debug, Clone, Default)]
pub struct ClauseSet {
	clauses: Vec<Clause>,
}

impl ClauseSet {
	pub fn parse(raw: &str) -> Result<Self, ConditionError> {
		let clauses = raw
			.split('&')
			.map(str::trim)
			.filter(|c| !c.is_empty())
			.map(Clause::parse)
			.collect::<Result<Vec<_>, _>>()?;
		Ok(Self { clauses })
	}

	pub fn is_empty(&self) -> bool {
		self.clauses.is_empty()
	}

	pub fn len(&self) -> usize {
		self.clauses.len()
	}

	pub fn clauses(&self) -> &[Clause] {
		&self.clauses
	}

	/// Concatenate two sets into one conjunction
	pub fn extend(&mut self, other: ClauseSet) {
		self.clauses.extend(other.clauses);
	}

	pub fn matches_with<'a, F>(&self, lookup: F) -> Result<bool, MatchError>
	where
		F: Fn(&str) -> Option<Cow<'a, str>>,
	{
		for clause in &self.clauses {
			if !clause.evaluate(lookup(&clause.key).as_deref())? {
				return Ok(false);
			}
		}
		Ok(true)
	}

	pub fn matches_url(&self, url: &EndpointUrl) -> Result<bool, MatchError> {
		self.matches_with(|key| url.field(key))
	}

	pub fn matches_context(&self, ctx: &CallContext) -> Result<bool, MatchError> {
		self.matches_with(|key| ctx.value(key))
	}
}

/// `when => then`: callers matching `when` may only reach providers matching `then`
#[derive(Debug, Clone)]
pub struct Condition {
	raw: String,
	pub when: ClauseSet,
	pub then: ClauseSet,
}

impl Condition {
	pub fn parse(raw: &str) -> Result<Self, ConditionError> {
		if raw.matches("=>").count() > 1 {
			return Err(ConditionError::MisplacedArrow(raw.trim().to_string()));
		}
		let (when, then) = match raw.split_once("=>") {
			Some((when, then)) => (ClauseSet::parse(when)?, ClauseSet::parse(then)?),
			None => (ClauseSet::default(), ClauseSet::parse(raw)?),
		};
		if when.is_empty() && then.is_empty() {
			return Err(ConditionError::Empty);
		}
		Ok(Self {
			raw: raw.trim().to_string(),
			when,
			then,
		})
	}

	pub fn raw(&self) -> &str {
		&self.raw
	}

	/// An empty `then` side blocks every provider for matching callers
	pub fn blocks_all(&self) -> bool {
		self.then.is_empty()
	}
}
