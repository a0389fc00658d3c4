// Directory properties: idempotence, ordering, reuse, force and fallback

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rpc_directory::configurator::{ConfiguratorKind, ConfiguratorRule};
use rpc_directory::rule::ClauseSet;
use rpc_directory::{
	CallContext, ConfiguratorChain, Directory, DirectoryRegistry, DirectoryState, Invoker, RuleParse, RuleUpdateOutcome,
	Validity,
};

use crate::common::*;

fn providers(n: usize, generation: usize) -> Vec<rpc_directory::EndpointUrl> {
	(1..=n)
		.map(|i| url(&format!("dubbo://10.0.0.{i}:20880/org.example.DemoService?gen={generation}")))
		.collect()
}

#[tokio::test]
async fn test_recompute_is_idempotent() -> anyhow::Result<()> {
	let directory = directory();
	directory.update_configurator_document(
		"service",
		&configurator_doc("  - match: [\"host = 10.0.0.2\"]\n    parameters: { weight: 50 }\n"),
	);
	directory.update_router_document("service", &router_doc("  - conditions: [\"=> weight != 50\"]\n"));
	directory.notify(providers(3, 0));
	directory.flush().await;
	let first = directory.current_invokers();

	// Same inputs again
	directory.notify(providers(3, 0));
	directory.flush().await;
	let second = directory.current_invokers();

	assert_eq!(hosts(&first), vec!["10.0.0.1", "10.0.0.3"]);
	assert_eq!(first, second);
	for (a, b) in first.iter().zip(second.iter()) {
		assert!(Invoker::ptr_eq(a, b));
	}
	Ok(())
}

#[test]
fn test_absent_never_overwrites_and_override_always_does() {
	let target = url("dubbo://10.0.0.1:20880/s?weight=1");
	let scope = ClauseSet::parse("host = 10.0.0.1").unwrap();
	let absent = ConfiguratorRule::new(ConfiguratorKind::Absent, 0, scope.clone())
		.with_delta("weight", "7")
		.with_delta("region", "eu");
	let over = ConfiguratorRule::new(ConfiguratorKind::Override, 0, scope).with_delta("weight", "200");

	for rules in [vec![absent.clone(), over.clone()], vec![over, absent]] {
		let out = ConfiguratorChain::new(rules).configure(&target);
		assert_eq!(out.parameter("weight"), Some("200"));
		assert_eq!(out.parameter("region"), Some("eu"));
	}
}

#[tokio::test]
async fn test_forced_empty_and_fallback() -> anyhow::Result<()> {
	let directory = directory();
	directory.notify(providers(2, 0));
	directory.update_router_document("service", &router_doc("  - conditions: [\"=> zone = mars\"]\n"));
	directory.flush().await;
	assert_eq!(directory.current_invokers().len(), 2);

	directory.update_router_document(
		"service",
		&router_doc("  - conditions: [\"=> zone = mars\"]\n    force: true\n"),
	);
	directory.flush().await;
	assert!(directory.current_invokers().is_empty());
	assert_eq!(directory.state(), DirectoryState::Active);
	Ok(())
}

#[tokio::test]
async fn test_later_notification_wins() -> anyhow::Result<()> {
	let directory = directory();
	for generation in 0..200 {
		directory.notify(providers(1 + generation % 4, generation));
	}
	directory.flush().await;

	let invokers = directory.current_invokers();
	assert_eq!(invokers.len(), 1 + 199 % 4);
	assert!(invokers.iter().all(|i| i.url().parameter("gen") == Some("199")));
	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_mixed_snapshots() -> anyhow::Result<()> {
	let directory = directory();
	directory.notify(providers(4, 0));
	directory.flush().await;

	let done = Arc::new(AtomicBool::new(false));
	let mut readers = Vec::new();
	for _ in 0..3 {
		let directory = directory.clone();
		let done = Arc::clone(&done);
		readers.push(tokio::spawn(async move {
			let mut reads = 0usize;
			while !done.load(Ordering::Acquire) {
				let snapshot = directory.snapshot();
				let generations: Vec<_> = snapshot
					.invokers()
					.iter()
					.map(|i| i.url().parameter("gen").unwrap_or_default().to_string())
					.collect();
				assert!(generations.windows(2).all(|w| w[0] == w[1]), "mixed snapshot {generations:?}");
				reads += 1;
				tokio::task::yield_now().await;
			}
			reads
		}));
	}

	for generation in 1..=100 {
		directory.notify(providers(1 + generation % 4, generation));
		if generation % 10 == 0 {
			directory.flush().await;
		}
	}
	directory.flush().await;
	done.store(true, Ordering::Release);
	for reader in readers {
		assert!(reader.await? > 0);
	}
	Ok(())
}

#[tokio::test]
async fn test_invokers_reused_and_released() -> anyhow::Result<()> {
	let transport = Arc::new(CountingTransport::default());
	let directory = directory_with(transport.clone());

	let a = url("dubbo://10.0.0.1:20880/org.example.DemoService?weight=1");
	let b = url("dubbo://10.0.0.2:20880/org.example.DemoService");
	let c = url("dubbo://10.0.0.3:20880/org.example.DemoService");

	directory.notify(vec![a.clone(), b.clone()]);
	directory.flush().await;
	let first = directory.current_invokers();
	assert_eq!(transport.connects(), 2);

	directory.notify(vec![a.clone(), b.clone(), c.clone()]);
	directory.flush().await;
	let second = directory.current_invokers();
	assert_eq!(transport.connects(), 3);
	assert!(Invoker::ptr_eq(&first[0], &second[0]));
	assert!(Invoker::ptr_eq(&first[1], &second[1]));

	// Reconfiguring keeps the connection
	directory.update_configurator_document(
		"service",
		&configurator_doc("  - match: [\"host = 10.0.0.1\"]\n    parameters: { weight: 300 }\n"),
	);
	directory.flush().await;
	let third = directory.current_invokers();
	assert_eq!(transport.connects(), 3);
	assert_eq!(third[0].url().parameter("weight"), Some("300"));
	assert!(third[0].shares_connection(&first[0]));
	assert!(!Invoker::ptr_eq(&third[0], &first[0]));

	directory.notify(vec![c]);
	directory.flush().await;
	assert_eq!(transport.closes(), 2);
	assert!(!first[0].is_available());
	assert!(!first[1].is_available());
	assert!(directory.current_invokers()[0].is_available());

	directory.destroy().await;
	assert_eq!(transport.closes(), 3);
	Ok(())
}

#[tokio::test]
async fn test_connect_failure_skips_endpoint() -> anyhow::Result<()> {
	let transport = Arc::new(CountingTransport::default());
	transport.refuse("10.0.0.2");
	let directory = directory_with(transport.clone());
	directory.notify(providers(3, 0));
	directory.flush().await;
	assert_eq!(hosts(&directory.current_invokers()), vec!["10.0.0.1", "10.0.0.3"]);
	assert_eq!(directory.snapshot().provider_count(), 3);
	Ok(())
}

#[tokio::test]
async fn test_disabled_provider_is_dropped() -> anyhow::Result<()> {
	let transport = Arc::new(CountingTransport::default());
	let directory = directory_with(transport.clone());
	directory.notify(providers(2, 0));
	directory.flush().await;
	assert_eq!(transport.connects(), 2);

	directory.update_configurator_document(
		"ops",
		&configurator_doc("  - match: [\"host = 10.0.0.1\"]\n    parameters: { disabled: true }\n"),
	);
	directory.flush().await;
	assert_eq!(hosts(&directory.current_invokers()), vec!["10.0.0.2"]);
	assert_eq!(transport.closes(), 1);

	directory.remove_configurators("ops");
	directory.flush().await;
	assert_eq!(hosts(&directory.current_invokers()), vec!["10.0.0.1", "10.0.0.2"]);
	assert_eq!(transport.connects(), 3);
	Ok(())
}

#[tokio::test]
async fn test_rule_sources_merge_by_priority() -> anyhow::Result<()> {
	let directory = directory();
	directory.notify(vec![
		url("dubbo://10.0.0.1:20880/org.example.DemoService?env=prod&zone=a"),
		url("dubbo://10.0.0.2:20880/org.example.DemoService?env=prod&zone=b"),
		url("dubbo://10.0.0.3:20880/org.example.DemoService?env=dev&zone=a"),
	]);

	// Application-level document
	let app = directory.update_router_document(
		"app",
		"scope: shop\nrules:\n  - priority: 2\n    conditions: [\"=> zone = a\"]\n",
	);
	assert!(app.is_accepted());
	directory.update_router_document("service", &router_doc("  - priority: 1\n    conditions: [\"=> env = prod\"]\n"));
	directory.flush().await;
	assert_eq!(hosts(&directory.current_invokers()), vec!["10.0.0.1"]);

	directory.remove_routers("app");
	directory.flush().await;
	assert_eq!(hosts(&directory.current_invokers()), vec!["10.0.0.1", "10.0.0.2"]);

	let foreign = directory.update_router_document(
		"billing",
		"scope: billing\nrules:\n  - conditions: [\"=> zone = none\"]\n    force: true\n",
	);
	assert!(matches!(foreign, RuleUpdateOutcome::OutOfScope { .. }));
	directory.flush().await;
	assert_eq!(directory.current_invokers().len(), 2);
	Ok(())
}

#[tokio::test]
async fn test_disabled_document_clears_its_rules() -> anyhow::Result<()> {
	let directory = directory();
	directory.notify(providers(2, 0));
	directory.update_router_document("service", &router_doc("  - conditions: [\"=> host = 10.0.0.1\"]\n"));
	directory.flush().await;
	assert_eq!(directory.current_invokers().len(), 1);

	let disabled = format!("scope: {SERVICE}\nenabled: false\nrules:\n  - conditions: [\"=> host = 10.0.0.1\"]\n");
	assert!(directory.update_router_document("service", &disabled).is_accepted());
	directory.flush().await;
	assert_eq!(directory.current_invokers().len(), 2);
	Ok(())
}

#[tokio::test]
async fn test_prebuilt_rule_sets() -> anyhow::Result<()> {
	let directory = directory();
	directory.notify(providers(2, 0));

	let parse = rpc_directory::parse_configurator_document(&configurator_doc(
		"  - match: [\"host = 10.0.0.2\"]\n    parameters: { weight: 5 }\n",
	));
	assert_eq!(parse.validity, Validity::Valid);
	assert!(directory.update_configurators("service", parse).is_accepted());

	let invalid: RuleParse<rpc_directory::RouterRule> =
		rpc_directory::parse_router_document(&router_doc("  - type: nonsense\n"));
	assert!(!directory.update_routers("service", invalid).is_accepted());

	directory.flush().await;
	let invokers = directory.current_invokers();
	assert_eq!(invokers.len(), 2);
	assert_eq!(invokers[1].url().parameter("weight"), Some("5"));
	Ok(())
}

#[tokio::test]
async fn test_call_time_routing() -> anyhow::Result<()> {
	let directory = directory();
	directory.update_router_document(
		"service",
		&router_doc(concat!(
			"  - priority: 1\n    conditions: [\"=> env = prod\"]\n",
			"  - priority: 2\n    runtime: true\n    conditions: [\"method = save => zone = a\"]\n",
			"  - priority: 3\n    type: mock\n",
		)),
	);
	directory.notify(vec![
		url("dubbo://10.0.0.1:20880/org.example.DemoService?env=prod&zone=a"),
		url("dubbo://10.0.0.2:20880/org.example.DemoService?env=prod&zone=b"),
		url("mock://10.0.0.9:0/org.example.DemoService?env=prod&zone=b"),
		url("dubbo://10.0.0.3:20880/org.example.DemoService?env=dev&zone=a"),
	]);
	directory.flush().await;

	let snapshot = directory.snapshot();
	assert!(!snapshot.route_table().is_static());
	assert_eq!(snapshot.invokers().len(), 3);

	let find = directory.route(&CallContext::new().with_method("find"));
	assert_eq!(hosts(&find), vec!["10.0.0.1", "10.0.0.2"]);
	let save = directory.route(&CallContext::new().with_method("save"));
	assert_eq!(hosts(&save), vec!["10.0.0.1"]);
	let mock = directory.route(&CallContext::new().with_attachment("invocation.need.mock", "true"));
	assert_eq!(hosts(&mock), vec!["10.0.0.9"]);
	Ok(())
}

#[tokio::test]
async fn test_method_conditions_apply_per_call() -> anyhow::Result<()> {
	let directory = directory();
	let outcome = directory.update_router_document(
		"service",
		&router_doc("  - force: true\n    conditions: [\"method = save => zone = a\"]\n"),
	);
	assert!(outcome.is_accepted());
	directory.notify(vec![
		url("dubbo://10.0.0.1:20880/org.example.DemoService?zone=a"),
		url("dubbo://10.0.0.2:20880/org.example.DemoService?zone=b"),
	]);
	directory.flush().await;

	assert!(!directory.snapshot().route_table().is_static());
	assert_eq!(directory.current_invokers().len(), 2);
	let save = directory.route(&CallContext::new().with_method("save"));
	assert_eq!(hosts(&save), vec!["10.0.0.1"]);
	let find = directory.route(&CallContext::new().with_method("find"));
	assert_eq!(hosts(&find), vec!["10.0.0.1", "10.0.0.2"]);
	Ok(())
}

#[tokio::test]
async fn test_health_registry_tracks_directories() -> anyhow::Result<()> {
	let registry = DirectoryRegistry::new();
	let first = Directory::builder("a").health_registry(registry.clone()).build()?;
	let second = Directory::builder("b").health_registry(registry.clone()).build()?;

	first.notify(providers(2, 0));
	first.flush().await;
	second.set_available(false);
	second.flush().await;

	let report = registry.report();
	assert_eq!(report.len(), 2);
	assert_eq!(report[0].service, "a");
	assert_eq!(report[0].invokers, 2);
	assert!(report[0].ready);
	assert_eq!(report[1].state, DirectoryState::Degraded);
	assert!(!report[1].ready);
	assert!(report[1].stale);
	assert!(!registry.all_healthy());

	second.destroy().await;
	drop(first);
	assert!(registry.is_empty());
	Ok(())
}
