// Rule document wire format
//
// Router documents:
//
//   scope: org.example.DemoService
//   configVersion: v3.0
//   enabled: true
//   rules:
//     - type: condition
//       priority: 1
//       force: true
//       conditions: ["=> env = prod"]
//     - type: tag
//       tags: [{ name: gray, addresses: ["10.0.0.2:20880"] }]
//
// Configurator documents:
//
//   scope: org.example.DemoService
//   configVersion: v3.0
//   configs:
//     - kind: override
//       match: ["host = 10.0.0.1"]
//       parameters: { weight: 200 }

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

fn default_config_version() -> String {
	"v3.0".to_string()
}

fn default_enabled() -> bool {
	true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterDocument {
	/// Service or application identity the rules apply to
	#[serde(default)]
	pub scope: String,

	#[serde(default = "default_config_version")]
	pub config_version: String,

	#[serde(default = "default_enabled")]
	pub enabled: bool,

	#[serde(default)]
	pub rules: Vec<RouterEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterEntry {
	/// `condition` (default), `tag` or `mock`
	#[serde(rename = "type", default)]
	pub kind: Option<String>,

	#[serde(default)]
	pub priority: i32,

	#[serde(default)]
	pub force: bool,

	#[serde(default)]
	pub runtime: bool,

	#[serde(default)]
	pub conditions: Vec<String>,

	#[serde(default)]
	pub tags: Vec<TagEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagEntry {
	pub name: String,

	#[serde(default)]
	pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfiguratorDocument {
	#[serde(default)]
	pub scope: String,

	#[serde(default = "default_config_version")]
	pub config_version: String,

	#[serde(default = "default_enabled")]
	pub enabled: bool,

	#[serde(default)]
	pub configs: Vec<ConfiguratorEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfiguratorEntry {
	/// `override` (default) or `absent`
	#[serde(default)]
	pub kind: Option<String>,

	#[serde(default)]
	pub priority: i32,

	/// Clauses that must all hold for a provider to be rewritten
	#[serde(rename = "match", default)]
	pub match_conditions: Vec<String>,

	/// Scalars only; numbers and booleans are stringified
	#[serde(default)]
	pub parameters: IndexMap<String, serde_yaml::Value>,
}
