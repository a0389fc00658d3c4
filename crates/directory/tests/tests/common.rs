// Shared fixtures

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rpc_directory::{
	BackoffConfig, Connection, Directory, DirectoryConfig, EndpointUrl, Snapshot, Transport, TransportError,
};

pub const SERVICE: &str = "org.example.DemoService";

pub fn url(s: &str) -> EndpointUrl {
	EndpointUrl::parse(s).unwrap()
}

pub fn hosts(invokers: &[rpc_directory::Invoker]) -> Vec<String> {
	invokers.iter().map(|i| i.url().host().to_string()).collect()
}

pub fn fast_config() -> DirectoryConfig {
	DirectoryConfig {
		connect_timeout: Duration::from_millis(500),
		backoff: BackoffConfig {
			initial: Duration::from_millis(50),
			max: Duration::from_millis(200),
			multiplier: 2.0,
			jitter: false,
		},
		..Default::default()
	}
}

/// Counts connects and closes; refuses hosts on request
#[derive(Debug, Default)]
pub struct CountingTransport {
	pub connects: AtomicUsize,
	pub closes: Arc<AtomicUsize>,
	refused: Mutex<HashSet<String>>,
}

impl CountingTransport {
	pub fn refuse(&self, host: &str) {
		self.refused.lock().insert(host.to_string());
	}

	pub fn connects(&self) -> usize {
		self.connects.load(Ordering::SeqCst)
	}

	pub fn closes(&self) -> usize {
		self.closes.load(Ordering::SeqCst)
	}
}

impl Transport for CountingTransport {
	fn connect(&self, url: &EndpointUrl) -> Result<Arc<dyn Connection>, TransportError> {
		if self.refused.lock().contains(url.host()) {
			return Err(TransportError::Connect {
				address: url.address(),
				message: "refused".into(),
			});
		}
		self.connects.fetch_add(1, Ordering::SeqCst);
		Ok(Arc::new(CountingConnection {
			closed: AtomicBool::new(false),
			closes: Arc::clone(&self.closes),
		}))
	}
}

#[derive(Debug)]
struct CountingConnection {
	closed: AtomicBool,
	closes: Arc<AtomicUsize>,
}

impl Connection for CountingConnection {
	fn is_available(&self) -> bool {
		!self.closed.load(Ordering::SeqCst)
	}

	fn close(&self) {
		if !self.closed.swap(true, Ordering::SeqCst) {
			self.closes.fetch_add(1, Ordering::SeqCst);
		}
	}
}

pub fn directory_with(transport: Arc<CountingTransport>) -> Directory {
	Directory::builder(SERVICE)
		.consumer(url("consumer://10.9.9.9/org.example.DemoService?application=shop"))
		.config(fast_config())
		.transport(transport)
		.build()
		.unwrap()
}

pub fn directory() -> Directory {
	directory_with(Arc::new(CountingTransport::default()))
}

/// Wait until a published snapshot satisfies `what`
pub async fn wait_for(directory: &Directory, what: impl Fn(&Snapshot) -> bool) -> Arc<Snapshot> {
	let mut updates = directory.updates();
	tokio::time::timeout(Duration::from_secs(10), async {
		loop {
			let snapshot = directory.snapshot();
			if what(&snapshot) {
				return snapshot;
			}
			updates.changed().await.expect("directory worker stopped");
		}
	})
	.await
	.expect("timed out waiting for the directory")
}

pub fn router_doc(rules: &str) -> String {
	format!("scope: {SERVICE}\nconfigVersion: v3.0\nrules:\n{rules}")
}

pub fn configurator_doc(configs: &str) -> String {
	format!("scope: {SERVICE}\nconfigVersion: v3.0\nconfigs:\n{configs}")
}
