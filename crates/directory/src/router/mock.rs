// Mock router: isolates mock endpoints to the traffic that asks for them

use super::{Candidate, Verdict};
use crate::context::CallContext;

#[derive(Debug, Clone, Copy, Default)]
pub struct MockRouter;

impl MockRouter {
	pub fn route<T: Candidate>(&self, candidates: &[T], ctx: &CallContext) -> Verdict<T> {
		let wants_mock = ctx.needs_mock();
		Verdict::Selected {
			invokers: candidates
				.iter()
				.filter(|c| c.endpoint().is_mock() == wants_mock)
				.cloned()
				.collect(),
			force: false,
		}
	}
}
