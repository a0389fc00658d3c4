// Registry error types

use std::time::Duration;

use thiserror::Error;

use crate::url::UrlError;

/// Errors raised by discovery backends.
///
/// None of these reach the invocation path: the watcher turns every one of
/// them into a disconnect and retries.
#[derive(Error, Debug)]
pub enum RegistryError {
	#[error("failed to connect to registry: {0}")]
	Connect(String),

	#[error("registry connect timed out after {0:?}")]
	Timeout(Duration),

	#[error("registry connection lost: {0}")]
	Disconnected(String),

	#[error("failed to read providers file: {0}")]
	Io(#[from] std::io::Error),

	#[error("failed to parse providers file: {0}")]
	Parse(#[from] serde_yaml::Error),

	#[error("invalid provider '{input}': {source}")]
	InvalidEndpoint {
		input: String,
		#[source]
		source: UrlError,
	},

	#[error("failed to watch providers file: {0}")]
	Watch(String),
}

impl RegistryError {
	pub fn connect(message: impl Into<String>) -> Self {
		Self::Connect(message.into())
	}

	pub fn disconnected(message: impl Into<String>) -> Self {
		Self::Disconnected(message.into())
	}
}
