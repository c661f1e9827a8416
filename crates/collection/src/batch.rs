//! Buffered bucket mutations and their atomic materialization.
//!
//! Adds and removals land in a per-bucket [`PendingBatch`] and stay invisible
//! until the owning collection flushes. A flush applies each batch as one
//! step: optional clear, stale-entry removal, then insertion of the add list
//! under the category cap. Membership changes from every bucket aggregate
//! into one [`Delta`], so listeners receive a single add and a single
//! removal notification per flush.

use std::collections::HashSet;

use indexmap::IndexSet;

use crate::bucket::{Membership, OrderedBucket};
use crate::entry::{Entry, EntryId, PriorityEntry};

/// Target of a pending removal.
#[derive(Debug)]
pub enum Removal<T> {
	/// The exact entry, by reference identity.
	Entry(Entry<T>),
	/// Every version carrying this stable ID.
	Id(EntryId),
}

impl<T> Clone for Removal<T> {
	fn clone(&self) -> Self {
		match self {
			Self::Entry(entry) => Self::Entry(entry.clone()),
			Self::Id(id) => Self::Id(id.clone()),
		}
	}
}

impl<T> Removal<T> {
	pub(crate) fn matches<C>(&self, item: &PriorityEntry<T, C>) -> bool {
		match self {
			Self::Entry(entry) => item.entry.ptr_eq(entry),
			Self::Id(id) => item.id.as_ref() == Some(id),
		}
	}
}

/// Mutations buffered for one bucket until the next flush.
pub struct PendingBatch<T, C = ()> {
	pub(crate) add: Vec<PriorityEntry<T, C>>,
	pub(crate) remove: Vec<Removal<T>>,
	pub(crate) clear: bool,
}

impl<T, C> Default for PendingBatch<T, C> {
	fn default() -> Self {
		Self {
			add: Vec::new(),
			remove: Vec::new(),
			clear: false,
		}
	}
}

impl<T, C> PendingBatch<T, C> {
	/// Queues `item`, superseding an older pending add of the same identity.
	pub fn push_add(&mut self, item: PriorityEntry<T, C>) {
		self.add.retain(|pending| !pending.same_identity(&item));
		self.add.push(item);
	}

	/// Queues a removal and cancels pending adds it targets.
	pub fn push_remove(&mut self, removal: Removal<T>) {
		self.add.retain(|pending| !removal.matches(pending));
		self.remove.push(removal);
	}

	pub fn is_empty(&self) -> bool {
		self.add.is_empty() && self.remove.is_empty() && !self.clear
	}
}

/// Net membership change aggregated across one flush.
///
/// An entry added and removed within the same flush cancels out, as does one
/// removed and re-added.
pub struct Delta<T> {
	added: IndexSet<Entry<T>>,
	removed: IndexSet<Entry<T>>,
}

impl<T> Default for Delta<T> {
	fn default() -> Self {
		Self {
			added: IndexSet::new(),
			removed: IndexSet::new(),
		}
	}
}

impl<T> Delta<T> {
	pub fn record(&mut self, change: Membership<'_, T>) {
		match change {
			Membership::Added(entry) => {
				if !self.removed.shift_remove(entry) {
					self.added.insert(entry.clone());
				}
			}
			Membership::Removed(entry) => {
				if !self.added.shift_remove(entry) {
					self.removed.insert(entry.clone());
				}
			}
		}
	}

	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty()
	}

	pub fn into_parts(self) -> (Vec<Entry<T>>, Vec<Entry<T>>) {
		(self.added.into_iter().collect(), self.removed.into_iter().collect())
	}
}

/// Applies `batch` to `bucket` as one step.
pub fn apply<T, C>(bucket: &mut OrderedBucket<T, C>, batch: PendingBatch<T, C>, max_count: Option<usize>, delta: &mut Delta<T>) {
	let mut record = |change: Membership<'_, T>| delta.record(change);

	if batch.clear {
		bucket.clear(&mut record);
	}

	let mut stale_ids: HashSet<&EntryId> = HashSet::new();
	let mut stale_entries: HashSet<&Entry<T>> = HashSet::new();
	for item in &batch.add {
		if let Some(id) = &item.id {
			stale_ids.insert(id);
		}
		stale_entries.insert(&item.entry);
	}
	for removal in &batch.remove {
		match removal {
			Removal::Entry(entry) => {
				stale_entries.insert(entry);
			}
			Removal::Id(id) => {
				stale_ids.insert(id);
			}
		}
	}

	if !stale_ids.is_empty() || !stale_entries.is_empty() {
		bucket.filter(
			|item| !stale_entries.contains(&item.entry) && !item.id.as_ref().is_some_and(|id| stale_ids.contains(id)),
			&mut record,
		);
	}

	let additions: Vec<_> = batch.add.into_iter().filter(PriorityEntry::is_retained).collect();
	if !additions.is_empty() {
		bucket.add(additions, max_count, &mut record);
	}
}
