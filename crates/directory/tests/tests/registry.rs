// Directory fed by a live registry watch

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rpc_directory::registry::SnapshotStream;
use rpc_directory::{
	Directory, DirectoryRegistry, DirectoryState, FileRegistry, MemoryRegistry, RegistryError, RegistryWatcher,
	ServiceDiscovery, SubscriptionQuery, WatchState,
};

use crate::common::*;

async fn eventually(what: impl Fn() -> bool) {
	tokio::time::timeout(Duration::from_secs(10), async {
		while !what() {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("condition never held");
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_serves_last_known_providers() -> anyhow::Result<()> {
	let registry = MemoryRegistry::new();
	registry.set_providers(SERVICE, vec![
		url("dubbo://10.0.0.1:20880/org.example.DemoService"),
		url("dubbo://10.0.0.2:20880/org.example.DemoService"),
	]);
	let watcher = RegistryWatcher::from_config(Arc::new(registry.clone()), &fast_config());
	let directory = directory();
	let handle = directory.subscribe(&watcher, SubscriptionQuery::new(SERVICE));

	let snapshot = wait_for(&directory, |s| s.state() == DirectoryState::Active).await;
	assert_eq!(hosts(snapshot.invokers()), vec!["10.0.0.1", "10.0.0.2"]);

	registry.disconnect();
	let stale = wait_for(&directory, |s| s.state() == DirectoryState::Degraded).await;
	assert!(stale.is_ready());
	assert!(stale.is_stale());
	assert_eq!(hosts(stale.invokers()), vec!["10.0.0.1", "10.0.0.2"]);
	assert!(handle.wait_for_state(WatchState::Disconnected).await);

	registry.set_providers(SERVICE, vec![url("dubbo://10.0.0.3:20880/org.example.DemoService")]);
	registry.reconnect();
	let fresh = wait_for(&directory, |s| s.state() == DirectoryState::Active && s.invokers().len() == 1).await;
	assert_eq!(hosts(fresh.invokers()), vec!["10.0.0.3"]);
	assert!(!fresh.is_stale());
	assert_eq!(handle.state(), WatchState::Connected);
	Ok(())
}

/// Never answers a connect
struct Unresponsive;

#[async_trait]
impl ServiceDiscovery for Unresponsive {
	async fn watch(&self, _query: &SubscriptionQuery) -> Result<SnapshotStream, RegistryError> {
		futures::future::pending().await
	}
}

#[tokio::test(start_paused = true)]
async fn test_first_connect_timeout_degrades() -> anyhow::Result<()> {
	let health = DirectoryRegistry::new();
	let directory = Directory::builder(SERVICE)
		.config(fast_config())
		.health_registry(health.clone())
		.build()?;
	let watcher = RegistryWatcher::from_config(Arc::new(Unresponsive), &fast_config());
	let handle = directory.subscribe(&watcher, SubscriptionQuery::new(SERVICE));

	let snapshot = wait_for(&directory, |s| s.state() == DirectoryState::Degraded).await;
	assert!(!snapshot.is_ready());
	assert!(snapshot.is_stale());
	assert!(snapshot.invokers().is_empty());
	assert_eq!(snapshot.provider_count(), 0);
	assert_ne!(handle.state(), WatchState::Connected);

	let report = health.report();
	assert_eq!(report.len(), 1);
	assert_eq!(report[0].state, DirectoryState::Degraded);
	assert!(!report[0].ready);
	assert!(report[0].stale);
	assert!(!health.all_healthy());

	// Retries keep timing out without leaving the degraded state
	tokio::time::sleep(Duration::from_secs(2)).await;
	directory.flush().await;
	assert_eq!(directory.state(), DirectoryState::Degraded);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_group_and_version_filtering() -> anyhow::Result<()> {
	let registry = MemoryRegistry::new();
	registry.set_providers(SERVICE, vec![
		url("dubbo://10.0.0.1:20880/org.example.DemoService?group=blue&version=1.0"),
		url("dubbo://10.0.0.2:20880/org.example.DemoService?group=green&version=1.0"),
		url("dubbo://10.0.0.3:20880/org.example.DemoService?group=blue&version=2.0"),
	]);
	let watcher = RegistryWatcher::from_config(Arc::new(registry), &fast_config());
	let directory = directory();
	directory.subscribe(&watcher, SubscriptionQuery::new(SERVICE).with_group("blue"));

	let snapshot = wait_for(&directory, |s| s.state() == DirectoryState::Active).await;
	assert_eq!(hosts(snapshot.invokers()), vec!["10.0.0.1", "10.0.0.3"]);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_destroy_stops_the_watch() -> anyhow::Result<()> {
	let transport = Arc::new(CountingTransport::default());
	let registry = MemoryRegistry::new();
	registry.set_providers(SERVICE, vec![url("dubbo://10.0.0.1:20880/org.example.DemoService")]);
	let watcher = RegistryWatcher::from_config(Arc::new(registry.clone()), &fast_config());
	let directory = directory_with(transport.clone());
	let handle = directory.subscribe(&watcher, SubscriptionQuery::new(SERVICE));

	wait_for(&directory, |s| s.invokers().len() == 1).await;
	assert_eq!(registry.watchers(), 1);

	directory.destroy().await;
	assert!(!handle.is_active());
	assert_eq!(directory.state(), DirectoryState::Destroyed);
	assert_eq!(transport.closes(), 1);
	eventually(|| registry.watchers() == 0).await;
	assert!(handle.wait_for_state(WatchState::Closed).await);

	// Late registry changes go nowhere
	registry.set_providers(SERVICE, vec![url("dubbo://10.0.0.2:20880/org.example.DemoService")]);
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(directory.current_invokers().is_empty());
	assert_eq!(transport.connects(), 1);
	Ok(())
}

#[tokio::test]
async fn test_file_registry_end_to_end() -> anyhow::Result<()> {
	let dir = tempfile::tempdir()?;
	let path = dir.path().join("providers.yaml");
	fs_err::write(
		&path,
		format!("providers:\n  {SERVICE}:\n    - dubbo://10.0.0.1:20880/{SERVICE}\n"),
	)?;

	let registry = FileRegistry::new(&path).with_debounce(Duration::from_millis(50));
	let watcher = RegistryWatcher::from_config(Arc::new(registry), &fast_config());
	let directory = directory();
	directory.subscribe(&watcher, SubscriptionQuery::new(SERVICE));
	let first = wait_for(&directory, |s| s.invokers().len() == 1).await;
	assert_eq!(hosts(first.invokers()), vec!["10.0.0.1"]);

	fs_err::write(
		&path,
		format!(
			"providers:\n  {SERVICE}:\n    - dubbo://10.0.0.1:20880/{SERVICE}\n    - dubbo://10.0.0.2:20880/{SERVICE}\n"
		),
	)?;
	let second = wait_for(&directory, |s| s.invokers().len() == 2).await;
	assert_eq!(hosts(second.invokers()), vec!["10.0.0.1", "10.0.0.2"]);

	directory.destroy().await;
	watcher.shutdown();
	Ok(())
}
