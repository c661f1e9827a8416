//! Priority-ordered storage for one category.

use crate::entry::{Entry, PriorityEntry};


/// Batches larger than this are merged with a stable sort instead of
/// per-entry binary insertion. Both produce the same order.
const SORT_MERGE_THRESHOLD: usize = 32;

/// Membership change reported by [`OrderedBucket`] mutations.
#[derive(Debug, PartialEq, Eq)]
pub enum Membership<'a, T> {
	Added(&'a Entry<T>),
	Removed(&'a Entry<T>),
}

/// Entries kept in descending priority order.
///
/// Equal priorities keep insertion order: a newly added entry goes after
/// every existing entry of the same priority.
pub struct OrderedBucket<T, C = ()> {
	entries: Vec<PriorityEntry<T, C>>,
}

impl<T, C> Default for OrderedBucket<T, C> {
	fn default() -> Self {
		Self { entries: Vec::new() }
	}
}

impl<T, C> OrderedBucket<T, C> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn entries(&self) -> &[PriorityEntry<T, C>] {
		&self.entries
	}

	pub fn iter(&self) -> impl Iterator<Item = &Entry<T>> {
		self.entries.iter().map(|item| &item.entry)
	}

	/// Priority of the highest-ranked entry.
	pub fn top_priority(&self) -> Option<f64> {
		self.entries.first().map(|item| item.priority)
	}

	/// Returns the index of `entry`, if present.
	pub fn find(&self, entry: &Entry<T>) -> Option<usize> {
		self.entries.iter().position(|item| item.entry.ptr_eq(entry))
	}

	/// Inserts `items` in order, then evicts the lowest-ranked tail beyond
	/// `max_count`.
	///
	/// Callers must only pass retained entries.
	pub fn add(&mut self, items: Vec<PriorityEntry<T, C>>, max_count: Option<usize>, on_change: &mut dyn FnMut(Membership<'_, T>)) {
		debug_assert!(items.iter().all(PriorityEntry::is_retained));

		if items.len() > SORT_MERGE_THRESHOLD {
			for item in &items {
				on_change(Membership::Added(&item.entry));
			}
			self.entries.extend(items);
			// Stable: existing entries precede new ones of equal rank.
			self.entries.sort_by(|lhs, rhs| rhs.priority.total_cmp(&lhs.priority));
		} else {
			for item in items {
				let index = self.entries.partition_point(|existing| existing.priority >= item.priority);
				on_change(Membership::Added(&item.entry));
				self.entries.insert(index, item);
			}
		}

		if let Some(max_count) = max_count
			&& self.entries.len() > max_count
		{
			for evicted in self.entries.drain(max_count..) {
				on_change(Membership::Removed(&evicted.entry));
			}
		}
	}

	/// Keeps only entries matching `keep`.
	pub fn filter(&mut self, mut keep: impl FnMut(&PriorityEntry<T, C>) -> bool, on_change: &mut dyn FnMut(Membership<'_, T>)) {
		self.entries.retain(|item| {
			let kept = keep(item);
			if !kept {
				on_change(Membership::Removed(&item.entry));
			}
			kept
		});
	}

	/// Removes every entry.
	pub fn clear(&mut self, on_change: &mut dyn FnMut(Membership<'_, T>)) {
		for item in self.entries.drain(..) {
			on_change(Membership::Removed(&item.entry));
		}
	}
}

impl<T: std::fmt::Debug, C> std::fmt::Debug for OrderedBucket<T, C> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_list().entries(self.entries.iter()).finish()
	}
}
