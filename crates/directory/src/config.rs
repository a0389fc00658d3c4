// Directory and watcher configuration

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("failed to read config file: {0}")]
	Io(#[from] std::io::Error),

	#[error("failed to parse config: {0}")]
	Parse(#[from] serde_yaml::Error),

	#[error("invalid duration: {0}")]
	InvalidDuration(String),

	#[error("invalid value for '{field}': {message}")]
	Invalid { field: &'static str, message: String },
}

/// Tuning for one directory and the watcher feeding it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct DirectoryConfig {
	/// Bound on every registry connect attempt
	#[serde(with = "duration_str")]
	pub connect_timeout: Duration,

	pub backoff: BackoffConfig,

	/// Compiled rule sets kept per directory
	pub rule_cache_capacity: usize,
}

impl Default for DirectoryConfig {
	fn default() -> Self {
		Self {
			connect_timeout: Duration::from_secs(3),
			backoff: BackoffConfig::default(),
			rule_cache_capacity: 64,
		}
	}
}

impl DirectoryConfig {
	pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
		let config: DirectoryConfig = serde_yaml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let text = fs_err::read_to_string(path.as_ref())?;
		Self::from_yaml_str(&text)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.connect_timeout.is_zero() {
			return Err(ConfigError::Invalid {
				field: "connectTimeout",
				message: "must be greater than zero".into(),
			});
		}
		self.backoff.validate()
	}
}

/// Capped exponential backoff between reconnect attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct BackoffConfig {
	#[serde(with = "duration_str")]
	pub initial: Duration,

	#[serde(with = "duration_str")]
	pub max: Duration,

	pub multiplier: f64,

	/// Randomize each delay within its upper half
	pub jitter: bool,
}

impl Default for BackoffConfig {
	fn default() -> Self {
		Self {
			initial: Duration::from_millis(500),
			max: Duration::from_secs(30),
			multiplier: 2.0,
			jitter: true,
		}
	}
}

impl BackoffConfig {
	pub fn validate(&self) -> Result<(), ConfigError> {
		if !self.multiplier.is_finite() || self.multiplier < 1.0 {
			return Err(ConfigError::Invalid {
				field: "backoff.multiplier",
				message: format!("{} is not >= 1.0", self.multiplier),
			});
		}
		if self.initial > self.max {
			return Err(ConfigError::Invalid {
				field: "backoff.initial",
				message: "exceeds backoff.max".into(),
			});
		}
		Ok(())
	}

	/// Upper bound of the delay before retry number `attempt` (0-based)
	pub fn ceiling(&self, attempt: u32) -> Duration {
		let exp = self.multiplier.powi(attempt.min(64) as i32);
		let secs = self.initial.as_secs_f64() * exp;
		if !secs.is_finite() || secs >= self.max.as_secs_f64() {
			self.max
		} else {
			Duration::from_secs_f64(secs)
		}
	}

	pub fn delay(&self, attempt: u32) -> Duration {
		let ceiling = self.ceiling(attempt);
		if !self.jitter || ceiling.is_zero() {
			return ceiling;
		}
		let half = ceiling / 2;
		half + rand::rng().random_range(Duration::ZERO..=ceiling - half)
	}
}

/// Parse a duration string like "500ms", "30s", "5m"; a bare number is seconds
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
	let s = s.trim();
	if s.is_empty() {
		return Err(ConfigError::InvalidDuration("empty duration string".into()));
	}

	let (num_str, unit) = if let Some(n) = s.strip_suffix("ms") {
		(n, "ms")
	} else if let Some(n) = s.strip_suffix('s') {
		(n, "s")
	} else if let Some(n) = s.strip_suffix('m') {
		(n, "m")
	} else if let Some(n) = s.strip_suffix('h') {
		(n, "h")
	} else {
		(s, "s")
	};

	let num: u64 = num_str
		.trim()
		.parse()
		.map_err(|_| ConfigError::InvalidDuration(format!("invalid duration number: {s}")))?;

	Ok(match unit {
		"ms" => Duration::from_millis(num),
		"m" => Duration::from_secs(num * 60),
		"h" => Duration::from_secs(num * 60 * 60),
		_ => Duration::from_secs(num),
	})
}

/// Render a duration in the largest unit that represents it exactly
pub fn format_duration(d: Duration) -> String {
	let ms = d.as_millis();
	if ms % 1000 != 0 {
		format!("{ms}ms")
	} else if ms % 3_600_000 == 0 && ms > 0 {
		format!("{}h", ms / 3_600_000)
	} else if ms % 60_000 == 0 && ms > 0 {
		format!("{}m", ms / 60_000)
	} else {
		format!("{}s", ms / 1000)
	}
}

mod duration_str {
	use super::*;

	pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&format_duration(*d))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		#[derive(Deserialize)]
		#[serde(untagged)]
		enum Raw {
			Secs(u64),
			Text(String),
		}

		match Raw::deserialize(deserializer)? {
			Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
			Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
		}
	}
}
