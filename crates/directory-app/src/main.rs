use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rpc_directory::telemetry::{self, LogFormat};
use rpc_directory::{
	Directory, DirectoryConfig, DirectoryRegistry, EndpointUrl, FileRegistry, RegistryWatcher, RuleUpdateOutcome,
	SubscriptionQuery,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Run a service directory against a providers file and print what it publishes
#[derive(Parser, Debug)]
#[command(name = "rpc-directory", version)]
struct Args {
	/// Path to the YAML configuration file
	#[arg(short, long)]
	config: PathBuf,

	/// Log filter, overrides the configuration file and RUST_LOG
	#[arg(long)]
	log: Option<String>,

	/// Validate the configuration and rule files, then exit
	#[arg(long)]
	check: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LogConfig {
	#[serde(default)]
	filter: Option<String>,
	#[serde(default)]
	format: LogFormat,
}

/// ```yaml
/// service: org.example.DemoService
/// consumer: consumer://10.0.0.9/org.example.DemoService?application=shop
/// providersFile: providers.yaml
/// routerRules: [routers.yaml]
/// configuratorRules: [overrides.yaml]
/// directory:
///   connectTimeout: 3s
/// ```
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AppConfig {
	service: String,
	#[serde(default)]
	consumer: Option<String>,
	providers_file: PathBuf,
	#[serde(default)]
	group: Option<String>,
	#[serde(default)]
	version: Option<String>,
	#[serde(default)]
	router_rules: Vec<PathBuf>,
	#[serde(default)]
	configurator_rules: Vec<PathBuf>,
	#[serde(default)]
	log: LogConfig,
	#[serde(default)]
	directory: DirectoryConfig,
}

impl AppConfig {
	/// Relative paths resolve against the directory holding the config file
	fn load(path: &Path) -> Result<Self> {
		let text = fs_err::read_to_string(path)?;
		let mut config: AppConfig =
			serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
		config.directory.validate()?;

		let base = path.parent().unwrap_or(Path::new("."));
		config.providers_file = base.join(&config.providers_file);
		for rule in config.router_rules.iter_mut().chain(config.configurator_rules.iter_mut()) {
			*rule = base.join(&*rule);
		}
		Ok(config)
	}

	fn query(&self) -> SubscriptionQuery {
		let mut query = SubscriptionQuery::new(&self.service);
		if let Some(group) = &self.group {
			query = query.with_group(group);
		}
		if let Some(version) = &self.version {
			query = query.with_version(version);
		}
		query
	}
}

fn log_outcome(kind: &str, path: &Path, outcome: RuleUpdateOutcome) -> bool {
	match outcome {
		RuleUpdateOutcome::Accepted => {
			info!("loaded {} rules from {}", kind, path.display());
			true
		},
		RuleUpdateOutcome::Rejected { reason } => {
			warn!("rejected {} rules from {}: {}", kind, path.display(), reason);
			false
		},
		RuleUpdateOutcome::OutOfScope { scope } => {
			warn!("{} rules from {} are scoped to {}, ignored", kind, path.display(), scope);
			false
		},
	}
}

fn load_rules(directory: &Directory, config: &AppConfig) -> Result<bool> {
	let mut all_accepted = true;
	for path in &config.router_rules {
		let text = fs_err::read_to_string(path)?;
		let outcome = directory.update_router_document(&path.display().to_string(), &text);
		all_accepted &= log_outcome("router", path, outcome);
	}
	for path in &config.configurator_rules {
		let text = fs_err::read_to_string(path)?;
		let outcome = directory.update_configurator_document(&path.display().to_string(), &text);
		all_accepted &= log_outcome("configurator", path, outcome);
	}
	Ok(all_accepted)
}

async fn report(directory: Directory, health: DirectoryRegistry) {
	let mut updates = directory.updates();
	while updates.changed().await.is_ok() {
		let snapshot = directory.snapshot();
		let addresses: Vec<String> = snapshot.invokers().iter().map(|i| i.url().address()).collect();
		info!(
			version = snapshot.version(),
			state = %snapshot.state(),
			"{} invokers: [{}]",
			addresses.len(),
			addresses.join(", ")
		);
		match serde_json::to_string(&health.report()) {
			Ok(json) => debug!("health {}", json),
			Err(e) => warn!("failed to encode health report: {}", e),
		}
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	let config = AppConfig::load(&args.config)?;
	let filter = args.log.as_deref().or(config.log.filter.as_deref());
	telemetry::init(filter, config.log.format)?;

	let health = DirectoryRegistry::new();
	let mut builder = Directory::builder(&config.service)
		.config(config.directory.clone())
		.health_registry(health.clone());
	if let Some(consumer) = &config.consumer {
		let consumer = EndpointUrl::parse(consumer).with_context(|| format!("consumer '{consumer}'"))?;
		builder = builder.consumer(consumer);
	}
	let directory = builder.build()?;

	let all_accepted = load_rules(&directory, &config)?;
	if args.check {
		let providers = FileRegistry::new(&config.providers_file).load().await?;
		info!(
			"{} providers for {}, rules {}",
			providers.endpoints(&config.service).len(),
			config.service,
			if all_accepted { "ok" } else { "rejected" }
		);
		directory.destroy().await;
		if !all_accepted {
			anyhow::bail!("some rule files were rejected");
		}
		return Ok(());
	}

	let registry = FileRegistry::new(&config.providers_file);
	let watcher = RegistryWatcher::from_config(Arc::new(registry), &config.directory);
	let subscription = directory.subscribe(&watcher, config.query());
	info!("watching {} for {}", config.providers_file.display(), subscription.query().service);
	let reporter = tokio::spawn(report(directory.clone(), health));

	tokio::signal::ctrl_c().await?;
	info!("shutting down");
	directory.destroy().await;
	watcher.shutdown();
	reporter.abort();
	Ok(())
}
