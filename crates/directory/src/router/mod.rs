//! Router Chain.
//!
//! Routers filter the candidate set for eligibility. Rules run in ascending
//! priority order, each one seeing the previous rule's output:
//!
//! - a rule that selects nothing falls back to its own input, unless the
//!   rule (or the request) forces it, in which case the chain ends empty;
//! - a rule that fails to evaluate is skipped as if it selected nothing.
//!
//! [`RouterChain::prepare`] evaluates the context-free prefix of the chain
//! once per directory refresh and keeps the rest for call time, so the
//! invocation path only runs rules that actually depend on the request.

mod condition;
mod mock;
mod tag;

use std::sync::Arc;

use tracing::{debug, warn};

pub use condition::ConditionRouter;
pub use mock::MockRouter;
pub use tag::TagRouter;

use crate::context::CallContext;
use crate::invoker::Invoker;
use crate::rule::MatchError;
use crate::url::EndpointUrl;

/// Anything a router can filter: bare descriptors or live invokers
pub trait Candidate: Clone {
	fn endpoint(&self) -> &EndpointUrl;
}

impl Candidate for EndpointUrl {
	fn endpoint(&self) -> &EndpointUrl {
		self
	}
}

impl Candidate for Invoker {
	fn endpoint(&self) -> &EndpointUrl {
		self.url()
	}
}

/// What a single router decided
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<T> {
	/// The rule does not apply to this call; input passes through
	Unchanged,
	/// The rule applied and picked these candidates
	Selected { invokers: Vec<T>, force: bool },
}

/// Closed set of routing policies
#[derive(Debug, Clone)]
pub enum Router {
	Condition(ConditionRouter),
	Tag(TagRouter),
	Mock(MockRouter),
}

impl Router {
	pub fn kind(&self) -> &'static str {
		match self {
			Router::Condition(_) => "condition",
			Router::Tag(_) => "tag",
			Router::Mock(_) => "mock",
		}
	}

	pub fn route<T: Candidate>(
		&self,
		candidates: &[T],
		ctx: &CallContext,
	) -> Result<Verdict<T>, MatchError> {
		match self {
			Router::Condition(r) => r.route(candidates, ctx),
			Router::Tag(r) => Ok(r.route(candidates, ctx)),
			Router::Mock(r) => Ok(r.route(candidates, ctx)),
		}
	}
}

/// A router with its chain metadata
#[derive(Debug, Clone)]
pub struct RouterRule {
	pub priority: i32,
	pub force: bool,
	/// Needs the per-call context; tag and mock routers always do
	pub runtime: bool,
	pub router: Router,
}

impl RouterRule {
	pub fn new(router: Router) -> Self {
		let runtime = !matches!(router, Router::Condition(_));
		Self {
			priority: 0,
			force: false,
			runtime,
			router,
		}
	}

	#[must_use]
	pub fn with_priority(mut self, priority: i32) -> Self {
		self.priority = priority;
		self
	}

	#[must_use]
	pub fn with_force(mut self, force: bool) -> Self {
		self.force = force;
		self
	}

	/// Tag and mock routers stay runtime regardless
	#[must_use]
	pub fn with_runtime(mut self, runtime: bool) -> Self {
		self.runtime = runtime || !matches!(self.router, Router::Condition(_));
		self
	}

	/// Whether this rule must wait for the call context
	pub fn needs_call(&self, consumer: &CallContext) -> bool {
		match &self.router {
			Router::Condition(c) => self.runtime || c.reads_call(consumer),
			_ => true,
		}
	}
}

enum Outcome<T> {
	Open(Vec<T>),
	/// A forced rule selected nothing
	Closed,
}

fn run<T: Candidate>(rules: &[Arc<RouterRule>], candidates: Vec<T>, ctx: &CallContext) -> Outcome<T> {
	let mut current = candidates;
	for rule in rules {
		match rule.router.route(&current, ctx) {
			Ok(Verdict::Unchanged) => {},
			Ok(Verdict::Selected { invokers, .. }) if !invokers.is_empty() => current = invokers,
			Ok(Verdict::Selected { force, .. }) => {
				if rule.force || force {
					debug!(target: "router", "forced {} rule (priority {}) selected nothing", rule.router.kind(), rule.priority);
					return Outcome::Closed;
				}
				debug!(target: "router", "{} rule (priority {}) selected nothing, ignoring it", rule.router.kind(), rule.priority);
			},
			Err(e) => {
				warn!(target: "router", "{} rule (priority {}) failed, ignoring it: {}", rule.router.kind(), rule.priority, e);
			},
		}
	}
	Outcome::Open(current)
}

/// Router rules sorted by priority; ties keep registration order
#[derive(Debug, Clone, Default)]
pub struct RouterChain {
	rules: Vec<Arc<RouterRule>>,
}

impl RouterChain {
	pub fn new(rules: impl IntoIterator<Item = RouterRule>) -> Self {
		Self::from_shared(rules.into_iter().map(Arc::new))
	}

	pub fn from_shared(rules: impl IntoIterator<Item = Arc<RouterRule>>) -> Self {
		let mut rules: Vec<_> = rules.into_iter().collect();
		rules.sort_by_key(|r| r.priority);
		Self { rules }
	}

	pub fn is_empty(&self) -> bool {
		self.rules.is_empty()
	}

	pub fn len(&self) -> usize {
		self.rules.len()
	}

	pub fn rules(&self) -> &[Arc<RouterRule>] {
		&self.rules
	}

	/// Run every rule against `candidates`
	pub fn filter<T: Candidate>(&self, candidates: Vec<T>, ctx: &CallContext) -> Vec<T> {
		match run(&self.rules, candidates, ctx) {
			Outcome::Open(list) => list,
			Outcome::Closed => Vec::new(),
		}
	}

	/// Run the leading context-free rules now and keep the rest for call time.
	///
	/// A condition rule is context-free when every `when` key resolves from
	/// the consumer descriptor; otherwise it runs per call even without
	/// the `runtime` flag.
	pub fn prepare(&self, candidates: Vec<Invoker>, consumer: &CallContext) -> RouteTable {
		let split = self
			.rules
			.iter()
			.position(|r| r.needs_call(consumer))
			.unwrap_or(self.rules.len());
		let (head, tail) = self.rules.split_at(split);

		match run(head, candidates, consumer) {
			Outcome::Open(list) => RouteTable {
				invokers: list.into(),
				tail: tail.to_vec(),
			},
			Outcome::Closed => RouteTable::empty(),
		}
	}
}

/// Precomputed routing state published with each directory snapshot
#[derive(Debug, Clone)]
pub struct RouteTable {
	invokers: Arc<[Invoker]>,
	tail: Vec<Arc<RouterRule>>,
}

impl RouteTable {
	pub fn empty() -> Self {
		Self {
			invokers: Arc::from(Vec::new()),
			tail: Vec::new(),
		}
	}

	/// Candidates after the context-free rules
	pub fn invokers(&self) -> &Arc<[Invoker]> {
		&self.invokers
	}

	/// True when no rule needs the call context
	pub fn is_static(&self) -> bool {
		self.tail.is_empty()
	}

	pub fn route(&self, ctx: &CallContext) -> Arc<[Invoker]> {
		if self.tail.is_empty() {
			return Arc::clone(&self.invokers);
		}
		match run(&self.tail, self.invokers.to_vec(), ctx) {
			Outcome::Open(list) => list.into(),
			Outcome::Closed => Arc::from(Vec::new()),
		}
	}
}
