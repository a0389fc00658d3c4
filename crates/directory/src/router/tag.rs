// Tag router: requests carrying a tag reach providers with the same tag

use std::collections::HashMap;

use super::{Candidate, Verdict};
use crate::context::{CallContext, TAG_KEY};
use crate::url::EndpointUrl;

#[derive(Debug, Clone, Default)]
pub struct TagRouter {
	/// `host:port` or bare host -> tag assigned by the rule
	assignments: HashMap<String, String>,
	force: bool,
}

impl TagRouter {
	pub fn new(force: bool) -> Self {
		Self {
			assignments: HashMap::new(),
			force,
		}
	}

	#[must_use]
	pub fn with_tag<I, S>(mut self, name: &str, addresses: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		for address in addresses {
			self.assignments.insert(address.into(), name.to_string());
		}
		self
	}

	/// Rule assignment first, then the provider's own `tag` parameter
	fn tag_of<'a>(&'a self, url: &'a EndpointUrl) -> Option<&'a str> {
		self
			.assignments
			.get(&url.address())
			.or_else(|| self.assignments.get(url.host()))
			.map(String::as_str)
			.or_else(|| url.parameter(TAG_KEY).filter(|t| !t.is_empty()))
	}

	pub fn route<T: Candidate>(&self, candidates: &[T], ctx: &CallContext) -> Verdict<T> {
		let untagged = || -> Vec<T> {
			candidates
				.iter()
				.filter(|c| self.tag_of(c.endpoint()).is_none())
				.cloned()
				.collect()
		};

		let Some(tag) = ctx.tag() else {
			return Verdict::Selected {
				invokers: untagged(),
				force: false,
			};
		};

		let tagged: Vec<T> = candidates
			.iter()
			.filter(|c| self.tag_of(c.endpoint()) == Some(tag))
			.cloned()
			.collect();
		let force = self.force || ctx.force_tag();

		if !tagged.is_empty() || force {
			Verdict::Selected {
				invokers: tagged,
				force,
			}
		} else {
			Verdict::Selected {
				invokers: untagged(),
				force: false,
			}
		}
	}
}
