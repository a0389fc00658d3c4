// Condition router: `when => then` rules over caller context and provider parameters

use super::{Candidate, Verdict};
use crate::context::{CallContext, METHOD_KEY};
use crate::rule::{Condition, MatchError};

#[derive(Debug, Clone)]
pub struct ConditionRouter {
	conditions: Vec<Condition>,
}

impl ConditionRouter {
	pub fn new(conditions: Vec<Condition>) -> Self {
		Self { conditions }
	}

	pub fn conditions(&self) -> &[Condition] {
		&self.conditions
	}

	/// True when some `when` clause reads the method, an attachment, or
	/// anything else the consumer descriptor alone cannot answer
	pub fn reads_call(&self, consumer: &CallContext) -> bool {
		self
			.conditions
			.iter()
			.flat_map(|c| c.when.clauses())
			.any(|clause| {
				clause.key() == METHOD_KEY || consumer.consumer().and_then(|u| u.field(clause.key())).is_none()
			})
	}

	/// Each condition whose `when` matches the caller narrows the candidates
	/// by its `then`. No matching `when` leaves the input untouched.
	pub fn route<T: Candidate>(
		&self,
		candidates: &[T],
		ctx: &CallContext,
	) -> Result<Verdict<T>, MatchError> {
		let mut selected: Option<Vec<T>> = None;

		for condition in &self.conditions {
			if !condition.when.matches_context(ctx)? {
				continue;
			}
			if condition.blocks_all() {
				selected = Some(Vec::new());
				continue;
			}

			let input = selected.as_deref().unwrap_or(candidates);
			let mut next = Vec::with_capacity(input.len());
			for candidate in input {
				if condition.then.matches_url(candidate.endpoint())? {
					next.push(candidate.clone());
				}
			}
			selected = Some(next);
		}

		Ok(match selected {
			Some(invokers) => Verdict::Selected {
				invokers,
				force: false,
			},
			None => Verdict::Unchanged,
		})
	}
}
