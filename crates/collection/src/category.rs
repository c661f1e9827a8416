//! Category keys and the index mapping them to buckets.
//!
//! Categories compare by reference: two keys with the same name are still
//! distinct categories. Each category carries one header entry, rendered
//! before its members in the visible list. The index owns one bucket per
//! live category plus the always-present uncategorized bucket, whose members
//! render first and without a header.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::batch::{self, Delta, PendingBatch, Removal};
use crate::bucket::OrderedBucket;
use crate::entry::{CollectionItem, Entry, PriorityEntry};
use crate::reactive::Subscription;


/// Grouping key carrying its header entry.
pub struct Category<T>(Rc<CategoryInner<T>>);

struct CategoryInner<T> {
	name: String,
	header: Entry<T>,
}

impl<T> Category<T> {
	pub fn new(name: impl Into<String>, header: Entry<T>) -> Self {
		Self(Rc::new(CategoryInner { name: name.into(), header }))
	}

	pub fn name(&self) -> &str {
		&self.0.name
	}

	/// Entry displayed above this category's members.
	pub fn header(&self) -> &Entry<T> {
		&self.0.header
	}
}

impl<T> Clone for Category<T> {
	fn clone(&self) -> Self {
		Self(Rc::clone(&self.0))
	}
}

impl<T> PartialEq for Category<T> {
	fn eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}
}

impl<T> Eq for Category<T> {}

impl<T> Hash for Category<T> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		Rc::as_ptr(&self.0).hash(state);
	}
}

impl<T> fmt::Debug for Category<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Category").field(&self.0.name).finish()
	}
}

/// Decides which category an entry belongs to.
///
/// Implementations reading reactive state should register `sub`; a change
/// notification on it asks the collection to resolve the entry again.
pub trait CategoryResolver<T> {
	fn category(&self, entry: &Entry<T>, sub: Option<&Subscription>) -> Option<Category<T>>;
}

impl<T, F> CategoryResolver<T> for F
where
	F: Fn(&Entry<T>, Option<&Subscription>) -> Option<Category<T>>,
{
	fn category(&self, entry: &Entry<T>, sub: Option<&Subscription>) -> Option<Category<T>> {
		self(entry, sub)
	}
}

/// Resolver using the category an item declares through [`CollectionItem`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclaredCategory;

impl<T: CollectionItem> CategoryResolver<T> for DeclaredCategory {
	fn category(&self, entry: &Entry<T>, sub: Option<&Subscription>) -> Option<Category<T>> {
		T::category(entry, sub)
	}
}

/// Per-category facts handed to a [`CategorySorter`].
#[derive(Debug)]
pub struct BucketSummary<'a, T> {
	pub category: &'a Category<T>,
	pub top_priority: f64,
	pub len: usize,
}

/// Orders categories for display.
///
/// Categories missing from the result keep their relative order after the
/// sorted ones. Unknown and repeated keys are ignored.
pub trait CategorySorter<T> {
	fn sort(&self, buckets: &[BucketSummary<'_, T>]) -> Vec<Category<T>>;
}

impl<T, F> CategorySorter<T> for F
where
	F: Fn(&[BucketSummary<'_, T>]) -> Vec<Category<T>>,
{
	fn sort(&self, buckets: &[BucketSummary<'_, T>]) -> Vec<Category<T>> {
		self(buckets)
	}
}

/// Orders categories by their highest-ranked member, descending.
///
/// Ties keep the order in which categories first appeared.
#[derive(Debug, Default, Clone, Copy)]
pub struct TopPriority;

impl<T> CategorySorter<T> for TopPriority {
	fn sort(&self, buckets: &[BucketSummary<'_, T>]) -> Vec<Category<T>> {
		let mut ordered: Vec<&BucketSummary<'_, T>> = buckets.iter().collect();
		ordered.sort_by(|lhs, rhs| rhs.top_priority.total_cmp(&lhs.top_priority));
		ordered.into_iter().map(|summary| summary.category.clone()).collect()
	}
}

/// One rendered group: an optional category and its members in order.
#[derive(Debug)]
pub struct CategoryGroup<T> {
	pub category: Option<Category<T>>,
	pub items: Vec<Entry<T>>,
}

impl<T> Clone for CategoryGroup<T> {
	fn clone(&self) -> Self {
		Self {
			category: self.category.clone(),
			items: self.items.clone(),
		}
	}
}

pub(crate) struct Bucket<T, C> {
	pub(crate) list: OrderedBucket<T, C>,
	pub(crate) pending: Option<PendingBatch<T, C>>,
}

impl<T, C> Default for Bucket<T, C> {
	fn default() -> Self {
		Self {
			list: OrderedBucket::new(),
			pending: None,
		}
	}
}

impl<T, C> Bucket<T, C> {
	fn pending_mut(&mut self) -> &mut PendingBatch<T, C> {
		self.pending.get_or_insert_with(PendingBatch::default)
	}

	/// Whether the list or a pending add holds something `removal` targets.
	fn holds(&self, removal: &Removal<T>) -> bool {
		self.list.entries().iter().any(|item| removal.matches(item))
			|| self.pending.as_ref().is_some_and(|pending| pending.add.iter().any(|item| removal.matches(item)))
	}
}

/// Flat display sequence derived from the index at flush time.
pub struct VisibleList<T> {
	items: Vec<Entry<T>>,
	members: HashSet<Entry<T>>,
	groups: Vec<CategoryGroup<T>>,
}

impl<T> Default for VisibleList<T> {
	fn default() -> Self {
		Self {
			items: Vec::new(),
			members: HashSet::new(),
			groups: Vec::new(),
		}
	}
}

impl<T> VisibleList<T> {
	/// Headers and members in display order.
	pub fn items(&self) -> &[Entry<T>] {
		&self.items
	}

	pub fn groups(&self) -> &[CategoryGroup<T>] {
		&self.groups
	}

	pub fn contains(&self, entry: &Entry<T>) -> bool {
		self.members.contains(entry)
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	/// Every non-header entry.
	pub fn members(&self) -> impl Iterator<Item = &Entry<T>> {
		self.groups.iter().flat_map(|group| group.items.iter())
	}

	fn push_group(&mut self, category: Option<&Category<T>>, list: &OrderedBucket<T, impl Sized>) {
		if list.is_empty() {
			return;
		}
		if let Some(category) = category {
			self.push_item(category.header().clone());
		}
		let items: Vec<Entry<T>> = list.iter().cloned().collect();
		for entry in &items {
			self.push_item(entry.clone());
		}
		self.groups.push(CategoryGroup {
			category: category.cloned(),
			items,
		});
	}

	fn push_item(&mut self, entry: Entry<T>) {
		self.members.insert(entry.clone());
		self.items.push(entry);
	}
}

impl<T: fmt::Debug> fmt::Debug for VisibleList<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.items.iter()).finish()
	}
}

/// Buckets keyed by category.
pub struct CategoryIndex<T, C = ()> {
	uncategorized: Bucket<T, C>,
	categories: IndexMap<Category<T>, Bucket<T, C>>,
}

impl<T, C> Default for CategoryIndex<T, C> {
	fn default() -> Self {
		Self {
			uncategorized: Bucket::default(),
			categories: IndexMap::new(),
		}
	}
}

impl<T, C> CategoryIndex<T, C> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of live categorized buckets.
	pub fn category_count(&self) -> usize {
		self.categories.len()
	}

	/// Materialized entries across all buckets.
	pub fn len(&self) -> usize {
		self.buckets().map(|(_, bucket)| bucket.list.len()).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn has_pending(&self) -> bool {
		self.buckets().any(|(_, bucket)| bucket.pending.as_ref().is_some_and(|pending| !pending.is_empty()))
	}

	fn buckets(&self) -> impl Iterator<Item = (Option<&Category<T>>, &Bucket<T, C>)> {
		std::iter::once((None, &self.uncategorized)).chain(self.categories.iter().map(|(category, bucket)| (Some(category), bucket)))
	}

	fn buckets_mut(&mut self) -> impl Iterator<Item = (Option<&Category<T>>, &mut Bucket<T, C>)> {
		std::iter::once((None, &mut self.uncategorized)).chain(self.categories.iter_mut().map(|(category, bucket)| (Some(category), bucket)))
	}

	fn bucket_mut(&mut self, category: Option<&Category<T>>) -> &mut Bucket<T, C> {
		match category {
			None => &mut self.uncategorized,
			Some(category) => self.categories.entry(category.clone()).or_default(),
		}
	}

	/// Queues `item` in its category's pending batch.
	///
	/// Older copies of the entry, and versions sharing its ID, held by other
	/// buckets are queued for removal, so an entry lives in at most one
	/// category after the flush.
	pub fn queue_add(&mut self, category: Option<&Category<T>>, item: PriorityEntry<T, C>) {
		let mut stale = vec![Removal::Entry(item.entry.clone())];
		if let Some(id) = &item.id {
			stale.push(Removal::Id(id.clone()));
		}
		for (key, bucket) in self.buckets_mut() {
			if key == category {
				continue;
			}
			for removal in &stale {
				if bucket.holds(removal) {
					bucket.pending_mut().push_remove(removal.clone());
				}
			}
		}
		self.bucket_mut(category).pending_mut().push_add(item);
	}

	/// Queues `removal` in every bucket holding a target. Returns whether
	/// anything was queued.
	pub fn queue_removal(&mut self, removal: Removal<T>) -> bool {
		let mut queued = false;
		for (_, bucket) in self.buckets_mut() {
			if bucket.holds(&removal) {
				bucket.pending_mut().push_remove(removal.clone());
				queued = true;
			}
		}
		queued
	}

	/// Returns the current version of `entry` and its category.
	///
	/// A pending add is newer than anything materialized, so it wins.
	pub fn find(&self, entry: &Entry<T>) -> Option<(Option<Category<T>>, PriorityEntry<T, C>)> {
		let pending = self.buckets().find_map(|(category, bucket)| {
			let pending = bucket.pending.as_ref()?;
			let item = pending.add.iter().rev().find(|item| item.entry.ptr_eq(entry))?;
			Some((category.cloned(), item.clone()))
		});
		pending.or_else(|| {
			self.buckets().find_map(|(category, bucket)| {
				bucket
					.list
					.find(entry)
					.map(|index| (category.cloned(), bucket.list.entries()[index].clone()))
			})
		})
	}

	/// Snapshot of every materialized entry with its category.
	pub fn retained(&self) -> Vec<(Option<Category<T>>, PriorityEntry<T, C>)> {
		self.buckets()
			.flat_map(|(category, bucket)| bucket.list.entries().iter().map(move |item| (category.cloned(), item.clone())))
			.collect()
	}

	/// Replaces every bucket's contents with `items` at the next flush.
	///
	/// Mutations queued before the rebuild still apply on top of it: pending
	/// removals win over rebuilt entries, pending adds supersede them.
	pub fn queue_rebuild(&mut self, items: Vec<(Option<Category<T>>, PriorityEntry<T, C>)>) {
		let mut rebuilt: IndexMap<Option<Category<T>>, Vec<PriorityEntry<T, C>>> = IndexMap::new();
		rebuilt.insert(None, Vec::new());
		for category in self.categories.keys() {
			rebuilt.insert(Some(category.clone()), Vec::new());
		}
		for (category, item) in items {
			rebuilt.entry(category).or_default().push(item);
		}

		for (category, items) in rebuilt {
			let bucket = self.bucket_mut(category.as_ref());
			let previous = bucket.pending.take().unwrap_or_default();
			let mut add: Vec<PriorityEntry<T, C>> = items
				.into_iter()
				.filter(|item| item.is_retained())
				.filter(|item| !previous.remove.iter().any(|removal| removal.matches(item)))
				.filter(|item| !previous.add.iter().any(|pending| pending.same_identity(item)))
				.collect();
			add.extend(previous.add);
			bucket.pending = Some(PendingBatch {
				add,
				remove: previous.remove,
				clear: true,
			});
		}
	}

	/// Applies every pending batch, then drops emptied categories.
	pub fn flush(&mut self, max_count: Option<usize>, delta: &mut Delta<T>) {
		for (_, bucket) in self.buckets_mut() {
			if let Some(pending) = bucket.pending.take() {
				batch::apply(&mut bucket.list, pending, max_count, delta);
			}
		}
		self.categories.retain(|_, bucket| !bucket.list.is_empty());
	}

	/// Removes everything, pending work included.
	pub fn clear(&mut self, delta: &mut Delta<T>) {
		for (_, bucket) in self.buckets_mut() {
			bucket.pending = None;
			bucket.list.clear(&mut |change| delta.record(change));
		}
		self.categories.clear();
	}

	/// Derives the display sequence, ordering categories with `sorter`.
	pub fn visible(&self, sorter: &dyn CategorySorter<T>) -> VisibleList<T> {
		let summaries: Vec<BucketSummary<'_, T>> = self
			.categories
			.iter()
			.filter_map(|(category, bucket)| {
				bucket.list.top_priority().map(|top_priority| BucketSummary {
					category,
					top_priority,
					len: bucket.list.len(),
				})
			})
			.collect();

		let mut order: Vec<Category<T>> = Vec::with_capacity(summaries.len());
		for category in sorter.sort(&summaries) {
			if summaries.iter().any(|summary| *summary.category == category) && !order.contains(&category) {
				order.push(category);
			}
		}
		for summary in &summaries {
			if !order.contains(summary.category) {
				order.push(summary.category.clone());
			}
		}

		let mut visible = VisibleList::default();
		visible.push_group(None, &self.uncategorized.list);
		for category in &order {
			if let Some(bucket) = self.categories.get(category) {
				visible.push_group(Some(category), &bucket.list);
			}
		}
		visible
	}
}

impl<T: fmt::Debug, C> fmt::Debug for CategoryIndex<T, C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CategoryIndex")
			.field("uncategorized", &self.uncategorized.list)
			.field("categories", &self.categories.iter().map(|(category, bucket)| (category, &bucket.list)).collect::<Vec<_>>())
			.finish()
	}
}
