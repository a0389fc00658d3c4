use indexmap::IndexMap;
use parking_lot::Mutex;

use super::RuleKey;

/// Memoizes compiled rule sets by document identity.
///
/// Purely an optimization: a miss only costs a re-parse.
pub trait RuleCache<V>: Send + Sync {
	fn get(&self, key: &RuleKey) -> Option<V>;

	fn put(&self, key: RuleKey, value: V);
}

/// Bounded in-memory cache, oldest insertion evicted first
#[derive(Debug)]
pub struct MemoryRuleCache<V> {
	capacity: usize,
	entries: Mutex<IndexMap<RuleKey, V>>,
}

impl<V> MemoryRuleCache<V> {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity: capacity.max(1),
			entries: Mutex::new(IndexMap::new()),
		}
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}

impl<V: Clone + Send> RuleCache<V> for MemoryRuleCache<V> {
	fn get(&self, key: &RuleKey) -> Option<V> {
		self.entries.lock().get(key).cloned()
	}

	fn put(&self, key: RuleKey, value: V) {
		let mut entries = self.entries.lock();
		entries.insert(key, value);
		while entries.len() > self.capacity {
			entries.shift_remove_index(0);
		}
	}
}
