// Endpoint descriptors: identity (scheme, host, port, path) plus an ordered parameter map

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced while parsing an endpoint descriptor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlError {
	#[error("invalid endpoint url '{input}': {message}")]
	Malformed { input: String, message: String },

	#[error("endpoint url '{0}' has no host")]
	MissingHost(String),
}

/// Immutable descriptor of one remote service instance.
///
/// Equality and hashing are structural and ignore parameter order.
/// Builders such as [`EndpointUrl::with_parameter`] return a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUrl {
	scheme: String,
	host: String,
	port: u16,
	path: String,
	params: IndexMap<String, String>,
}

impl EndpointUrl {
	/// Build a descriptor from its parts
	pub fn new(
		scheme: impl Into<String>,
		host: impl Into<String>,
		port: u16,
		path: impl Into<String>,
	) -> Self {
		Self {
			scheme: scheme.into(),
			host: host.into(),
			port,
			path: path.into().trim_start_matches('/').to_string(),
			params: IndexMap::new(),
		}
	}

	/// Parse `scheme://host:port/path?k=v&...`.
	///
	/// Duplicate query keys keep the position of their first occurrence and
	/// the value of their last one.
	pub fn parse(input: &str) -> Result<Self, UrlError> {
		let parsed = url::Url::parse(input.trim()).map_err(|e| UrlError::Malformed {
			input: input.to_string(),
			message: e.to_string(),
		})?;

		let host = parsed
			.host_str()
			.filter(|h| !h.is_empty())
			.ok_or_else(|| UrlError::MissingHost(input.to_string()))?;

		let mut params = IndexMap::new();
		for (key, value) in parsed.query_pairs() {
			if key.is_empty() {
				continue;
			}
			params.insert(key.into_owned(), value.into_owned());
		}

		Ok(Self {
			scheme: parsed.scheme().to_string(),
			host: host.to_string(),
			port: written_port(input.trim(), &parsed),
			path: parsed.path().trim_start_matches('/').to_string(),
			params,
		})
	}

	pub fn scheme(&self) -> &str {
		&self.scheme
	}

	pub fn host(&self) -> &str {
		&self.host
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	pub fn path(&self) -> &str {
		&self.path
	}

	/// `host:port`, or just the host when no port is set
	pub fn address(&self) -> String {
		if self.port == 0 {
			self.host.clone()
		} else {
			format!("{}:{}", self.host, self.port)
		}
	}

	pub fn parameters(&self) -> &IndexMap<String, String> {
		&self.params
	}

	pub fn parameter(&self, key: &str) -> Option<&str> {
		self.params.get(key).map(String::as_str)
	}

	pub fn parameter_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
		self.parameter(key).unwrap_or(default)
	}

	pub fn bool_parameter(&self, key: &str) -> bool {
		self
			.parameter(key)
			.is_some_and(|v| v.eq_ignore_ascii_case("true"))
	}

	/// Mock endpoints are only eligible for calls that ask for them
	pub fn is_mock(&self) -> bool {
		self.scheme == "mock"
	}

	/// Resolve a condition key against this descriptor.
	///
	/// Identity keys (`protocol`, `host`, `port`, `address`) map to the
	/// descriptor itself; `path`, `service` and `interface` fall back to the
	/// path when no parameter of that name exists; anything else is a
	/// parameter lookup.
	pub fn field(&self, key: &str) -> Option<Cow<'_, str>> {
		match key {
			"protocol" | "scheme" => Some(Cow::Borrowed(self.scheme.as_str())),
			"host" => Some(Cow::Borrowed(self.host.as_str())),
			"port" => Some(Cow::Owned(self.port.to_string())),
			"address" => Some(Cow::Owned(self.address())),
			"path" | "service" | "interface" => self
				.parameter(key)
				.or(Some(self.path.as_str()))
				.map(Cow::Borrowed),
			other => self.parameter(other).map(Cow::Borrowed),
		}
	}

	/// New descriptor with one parameter set
	#[must_use]
	pub fn with_parameter(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
		let mut next = self.clone();
		next.params.insert(key.into(), value.into());
		next
	}

	/// New descriptor with several parameters set, later pairs winning
	#[must_use]
	pub fn with_parameters<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
	where
		K: Into<String>,
		V: Into<String>,
	{
		let mut next = self.clone();
		for (key, value) in pairs {
			next.params.insert(key.into(), value.into());
		}
		next
	}

	/// New descriptor with one parameter removed
	#[must_use]
	pub fn without_parameter(&self, key: &str) -> Self {
		let mut next = self.clone();
		next.params.shift_remove(key);
		next
	}
}

/// `url` drops a port equal to the scheme's default, so check whether it was written out
fn written_port(input: &str, parsed: &url::Url) -> u16 {
	if let Some(port) = parsed.port() {
		return port;
	}
	let Some(default) = parsed.port_or_known_default() else {
		return 0;
	};
	let authority = input
		.split_once("://")
		.map_or("", |(_, rest)| rest)
		.split(['/', '?', '#'])
		.next()
		.unwrap_or_default();
	if authority.ends_with(&format!(":{default}")) { default } else { 0 }
}

impl Hash for EndpointUrl {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.scheme.hash(state);
		self.host.hash(state);
		self.port.hash(state);
		self.path.hash(state);
		// Must agree with IndexMap equality, which ignores order
		for pair in self.params.iter().sorted() {
			pair.hash(state);
		}
	}
}

impl fmt::Display for EndpointUrl {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}://{}", self.scheme, self.host)?;
		if self.port != 0 {
			write!(f, ":{}", self.port)?;
		}
		write!(f, "/{}", self.path)?;
		if !self.params.is_empty() {
			let query = url::form_urlencoded::Serializer::new(String::new())
				.extend_pairs(self.params.iter())
				.finish();
			write!(f, "?{query}")?;
		}
		Ok(())
	}
}

impl FromStr for EndpointUrl {
	type Err = UrlError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl Serialize for EndpointUrl {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for EndpointUrl {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;
		Self::parse(&raw).map_err(serde::de::Error::custom)
	}
}
