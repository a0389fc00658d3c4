// Invokers and the transport boundary
//
// The transport layer owns connections; the directory only asks for one when
// an endpoint first appears and closes it when the endpoint disappears.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::debug;

use crate::url::EndpointUrl;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
	#[error("failed to connect to {address}: {message}")]
	Connect { address: String, message: String },

	#[error("unsupported protocol '{0}'")]
	UnsupportedProtocol(String),
}

/// Opaque connection handle owned by the transport layer
pub trait Connection: Send + Sync + fmt::Debug {
	fn is_available(&self) -> bool {
		true
	}

	/// Release the handle; called once when its endpoint leaves the directory
	fn close(&self);
}

/// Creates connections for newly discovered endpoints
pub trait Transport: Send + Sync + 'static {
	fn connect(&self, url: &EndpointUrl) -> Result<Arc<dyn Connection>, TransportError>;
}

/// Runtime handle bound to one live endpoint.
///
/// Cloning is cheap. `url` is the descriptor after configurators ran;
/// `raw_url` is what the registry delivered and is what the connection is
/// keyed by.
#[derive(Clone)]
pub struct Invoker {
	inner: Arc<InvokerInner>,
}

struct InvokerInner {
	url: EndpointUrl,
	raw: EndpointUrl,
	connection: Arc<dyn Connection>,
}

impl Invoker {
	pub fn new(url: EndpointUrl, raw: EndpointUrl, connection: Arc<dyn Connection>) -> Self {
		Self {
			inner: Arc::new(InvokerInner {
				url,
				raw,
				connection,
			}),
		}
	}

	pub fn url(&self) -> &EndpointUrl {
		&self.inner.url
	}

	pub fn raw_url(&self) -> &EndpointUrl {
		&self.inner.raw
	}

	pub fn connection(&self) -> &Arc<dyn Connection> {
		&self.inner.connection
	}

	pub fn is_available(&self) -> bool {
		self.inner.connection.is_available()
	}

	/// Same invoker object, not merely an equal one
	pub fn ptr_eq(a: &Invoker, b: &Invoker) -> bool {
		Arc::ptr_eq(&a.inner, &b.inner)
	}

	pub fn shares_connection(&self, other: &Invoker) -> bool {
		std::ptr::addr_eq(
			Arc::as_ptr(&self.inner.connection),
			Arc::as_ptr(&other.inner.connection),
		)
	}

	/// Same connection under a new configured descriptor
	pub(crate) fn reconfigure(&self, url: EndpointUrl) -> Self {
		Self::new(url, self.inner.raw.clone(), Arc::clone(&self.inner.connection))
	}
}

impl PartialEq for Invoker {
	fn eq(&self, other: &Self) -> bool {
		Invoker::ptr_eq(self, other) || (self.url() == other.url() && self.shares_connection(other))
	}
}

impl Eq for Invoker {}

impl fmt::Debug for Invoker {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Invoker")
			.field("url", &self.inner.url.to_string())
			.field("raw", &self.inner.raw.to_string())
			.finish()
	}
}

/// Transport for hosts that only need the candidate list
#[derive(Debug, Default, Clone)]
pub struct NullTransport;

impl Transport for NullTransport {
	fn connect(&self, url: &EndpointUrl) -> Result<Arc<dyn Connection>, TransportError> {
		debug!(target: "directory", "null connection for {}", url.address());
		Ok(Arc::new(NullConnection::default()))
	}
}

#[derive(Debug, Default)]
pub struct NullConnection {
	closed: AtomicBool,
}

impl Connection for NullConnection {
	fn is_available(&self) -> bool {
		!self.closed.load(Ordering::Acquire)
	}

	fn close(&self) {
		self.closed.store(true, Ordering::Release);
	}
}
