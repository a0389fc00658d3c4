// Call context: what routers know about the caller and the outbound request

use std::borrow::Cow;

use indexmap::IndexMap;

use crate::url::EndpointUrl;

/// Condition key naming the invoked method
pub const METHOD_KEY: &str = "method";
/// Attachment carrying the tag a request wants to be routed to
pub const TAG_KEY: &str = "tag";
/// Attachment forcing tag routing to fail closed instead of falling back
pub const FORCE_TAG_KEY: &str = "tag.force";
/// Attachment asking for mock endpoints only
pub const NEED_MOCK_KEY: &str = "invocation.need.mock";

/// Caller-side view used when evaluating routing rules.
///
/// At refresh time the directory builds one from its consumer descriptor
/// alone; at call time the invocation path adds the method and attachments.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
	consumer: Option<EndpointUrl>,
	method: Option<String>,
	attachments: IndexMap<String, String>,
}

impl CallContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn for_consumer(consumer: EndpointUrl) -> Self {
		Self {
			consumer: Some(consumer),
			..Self::default()
		}
	}

	#[must_use]
	pub fn with_method(mut self, method: impl Into<String>) -> Self {
		self.method = Some(method.into());
		self
	}

	#[must_use]
	pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.attachments.insert(key.into(), value.into());
		self
	}

	pub fn consumer(&self) -> Option<&EndpointUrl> {
		self.consumer.as_ref()
	}

	pub fn method(&self) -> Option<&str> {
		self.method.as_deref()
	}

	pub fn attachment(&self, key: &str) -> Option<&str> {
		self.attachments.get(key).map(String::as_str)
	}

	/// Resolve a condition key: method, then attachments, then the consumer descriptor
	pub fn value(&self, key: &str) -> Option<Cow<'_, str>> {
		if key == METHOD_KEY {
			return self.method.as_deref().map(Cow::Borrowed);
		}
		if let Some(v) = self.attachments.get(key) {
			return Some(Cow::Borrowed(v.as_str()));
		}
		self.consumer.as_ref().and_then(|c| c.field(key))
	}

	/// Requested tag, empty values count as untagged
	pub fn tag(&self) -> Option<&str> {
		self.attachment(TAG_KEY).filter(|t| !t.is_empty())
	}

	pub fn force_tag(&self) -> bool {
		self
			.attachment(FORCE_TAG_KEY)
			.is_some_and(|v| v.eq_ignore_ascii_case("true"))
	}

	pub fn needs_mock(&self) -> bool {
		self
			.attachment(NEED_MOCK_KEY)
			.is_some_and(|v| v.eq_ignore_ascii_case("true"))
	}
}
