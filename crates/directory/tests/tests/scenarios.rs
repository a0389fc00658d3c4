// End-to-end scenarios: provider sets in, published invokers out

use assert_matches::assert_matches;
use rpc_directory::{DirectoryState, RuleUpdateOutcome};

use crate::common::*;

#[tokio::test]
async fn test_no_rules_passes_providers_through() -> anyhow::Result<()> {
	let directory = directory();
	let raw = vec![
		url("dubbo://10.0.0.1:20880/org.example.DemoService?weight=1"),
		url("dubbo://10.0.0.2:20880/org.example.DemoService?weight=1"),
	];
	directory.notify(raw.clone());
	directory.flush().await;

	let invokers = directory.current_invokers();
	let urls: Vec<_> = invokers.iter().map(|i| i.url().clone()).collect();
	assert_eq!(urls, raw);
	assert_eq!(directory.state(), DirectoryState::Active);
	Ok(())
}

#[tokio::test]
async fn test_forced_condition_router() -> anyhow::Result<()> {
	let directory = directory();
	let outcome = directory.update_router_document(
		"service",
		&router_doc("  - type: condition\n    force: true\n    conditions: [\"=> env = prod\"]\n"),
	);
	assert_eq!(outcome, RuleUpdateOutcome::Accepted);
	directory.notify(vec![
		url("dubbo://10.0.0.1:20880/org.example.DemoService?env=prod"),
		url("dubbo://10.0.0.2:20880/org.example.DemoService?env=staging"),
	]);
	directory.flush().await;

	assert_eq!(hosts(&directory.current_invokers()), vec!["10.0.0.1"]);
	Ok(())
}

#[tokio::test]
async fn test_override_configurator_sets_weight() -> anyhow::Result<()> {
	let directory = directory();
	directory.notify(vec![url("dubbo://10.0.0.1:20880/org.example.DemoService?weight=1")]);
	let outcome = directory.update_configurator_document(
		"service",
		&configurator_doc("  - kind: override\n    match: [\"host = 10.0.0.1\"]\n    parameters:\n      weight: 200\n"),
	);
	assert!(outcome.is_accepted());
	directory.flush().await;

	let invokers = directory.current_invokers();
	assert_eq!(invokers.len(), 1);
	assert_eq!(invokers[0].url().parameter("weight"), Some("200"));
	assert_eq!(invokers[0].raw_url().parameter("weight"), Some("1"));
	Ok(())
}

#[tokio::test]
async fn test_empty_notification_clears_invokers() -> anyhow::Result<()> {
	let directory = directory();
	directory.notify(vec![
		url("dubbo://10.0.0.1:20880/org.example.DemoService"),
		url("dubbo://10.0.0.2:20880/org.example.DemoService"),
	]);
	directory.flush().await;
	assert_eq!(directory.current_invokers().len(), 2);

	directory.notify(vec![]);
	directory.flush().await;
	let snapshot = directory.snapshot();
	assert!(snapshot.invokers().is_empty());
	assert_eq!(snapshot.state(), DirectoryState::Active);
	assert!(snapshot.is_ready());
	assert!(!snapshot.is_stale());
	Ok(())
}

#[tokio::test]
async fn test_malformed_document_leaves_invokers_unchanged() -> anyhow::Result<()> {
	let directory = directory();
	directory.update_router_document("service", &router_doc("  - conditions: [\"=> env = prod\"]\n"));
	directory.notify(vec![
		url("dubbo://10.0.0.1:20880/org.example.DemoService?env=prod"),
		url("dubbo://10.0.0.2:20880/org.example.DemoService?env=staging"),
	]);
	let before_version = directory.flush().await;
	let before = directory.current_invokers();
	assert_eq!(hosts(&before), vec!["10.0.0.1"]);

	let outcome = directory.update_router_document(
		"service",
		&router_doc("  - type: condition\n    force: true\n    conditions: []\n"),
	);
	assert_matches!(outcome, RuleUpdateOutcome::Rejected { reason } if reason.contains("no valid rule entries"));

	let after_version = directory.flush().await;
	assert_eq!(after_version, before_version);
	assert_eq!(directory.current_invokers(), before);
	Ok(())
}
