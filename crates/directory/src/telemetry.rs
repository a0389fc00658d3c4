// Logging setup for hosts that do not install their own subscriber
//
// Targets used by this crate: directory, registry, router, configurator, rules.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Error, Debug)]
pub enum TelemetryError {
	#[error("invalid log filter '{filter}': {message}")]
	InvalidFilter { filter: String, message: String },

	#[error("a global subscriber is already installed")]
	AlreadyInstalled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	#[default]
	Text,
	Json,
}

/// Filter from `filter`, else `RUST_LOG`, else `info`
pub fn env_filter(filter: Option<&str>) -> Result<EnvFilter, TelemetryError> {
	match filter {
		Some(f) => EnvFilter::try_new(f).map_err(|e| TelemetryError::InvalidFilter {
			filter: f.to_string(),
			message: e.to_string(),
		}),
		None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
	}
}

/// Install a global fmt subscriber writing to stderr
pub fn init(filter: Option<&str>, format: LogFormat) -> Result<(), TelemetryError> {
	let filter = env_filter(filter)?;
	let registry = tracing_subscriber::registry().with(filter);
	let result = match format {
		LogFormat::Text => registry
			.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(true))
			.try_init(),
		LogFormat::Json => registry
			.with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
			.try_init(),
	};
	result.map_err(|_| TelemetryError::AlreadyInstalled)
}
