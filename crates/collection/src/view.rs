//! Derived projections over a [`Collection`].

use std::rc::Rc;

use crate::category::CategoryGroup;
use crate::collection::Collection;
use crate::entry::{CollectionItem, Entry};
use crate::reactive::{Snapshot, Subscription};

/// A collection seen through a predicate.
///
/// Holds no state of its own: every getter reads the source through its
/// snapshot getters, so a subscription passed here is tracked by the
/// source and woken by its flushes. Categories whose members are all
/// filtered out lose their header.
pub struct FilteredView<T: CollectionItem, C: 'static = ()> {
	source: Collection<T, C>,
	predicate: Rc<dyn Fn(&Entry<T>) -> bool>,
}

impl<T: CollectionItem, C: 'static> Clone for FilteredView<T, C> {
	fn clone(&self) -> Self {
		Self {
			source: self.source.clone(),
			predicate: Rc::clone(&self.predicate),
		}
	}
}

impl<T: CollectionItem, C: 'static> FilteredView<T, C> {
	pub fn new(source: &Collection<T, C>, predicate: impl Fn(&Entry<T>) -> bool + 'static) -> Self {
		Self {
			source: source.clone(),
			predicate: Rc::new(predicate),
		}
	}

	pub fn source(&self) -> &Collection<T, C> {
		&self.source
	}

	pub fn categories(&self, sub: Option<&Subscription>) -> Vec<CategoryGroup<T>> {
		self.source
			.categories(sub)
			.into_iter()
			.filter_map(|group| {
				let items: Vec<_> = group.items.into_iter().filter(|entry| (self.predicate)(entry)).collect();
				(!items.is_empty()).then_some(CategoryGroup { category: group.category, items })
			})
			.collect()
	}

	/// Headers and members in display order.
	pub fn items(&self, sub: Option<&Subscription>) -> Vec<Entry<T>> {
		let mut items = Vec::new();
		for group in self.categories(sub) {
			if let Some(category) = &group.category {
				items.push(category.header().clone());
			}
			items.extend(group.items);
		}
		items
	}

	/// The source's cursor, if the predicate admits it.
	pub fn cursor(&self, sub: Option<&Subscription>) -> Option<Entry<T>> {
		self.source.cursor(sub).filter(|entry| (self.predicate)(entry))
	}

	pub fn selected(&self, sub: Option<&Subscription>) -> Vec<Entry<T>> {
		self.source.selected(sub).into_iter().filter(|entry| (self.predicate)(entry)).collect()
	}
}

impl<T: CollectionItem, C: 'static> Snapshot for FilteredView<T, C> {
	type Value = Vec<Entry<T>>;

	fn get(&self, sub: Option<&Subscription>) -> Vec<Entry<T>> {
		self.items(sub)
	}
}

impl<T: CollectionItem, C: 'static> std::fmt::Debug for FilteredView<T, C> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FilteredView").field("source", &self.source).finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use tokio::task::LocalSet;

	use super::*;
	use crate::category::Category;
	use crate::entry::PriorityEntry;
	use crate::reactive::{ChangeTracker, Field};

	#[derive(Debug)]
	struct Tag {
		label: &'static str,
		category: Field<Option<Category<Tag>>>,
	}

	impl CollectionItem for Tag {
		fn category(&self, sub: Option<&Subscription>) -> Option<Category<Self>> {
			self.category.get(sub)
		}
	}

	fn tag(label: &'static str, category: Option<&Category<Tag>>) -> Entry<Tag> {
		Entry::new(Tag {
			label,
			category: Field::new(category.cloned()),
		})
	}

	fn labels(entries: &[Entry<Tag>]) -> Vec<&'static str> {
		entries.iter().map(|entry| entry.label).collect()
	}

	#[tokio::test]
	async fn filtered_out_categories_lose_their_header() {
		LocalSet::new()
			.run_until(async {
				let docs = Category::new("docs", tag("docs", None));
				let code = Category::new("code", tag("code", None));
				let collection: Collection<Tag> = Collection::new();
				collection.add_batch([
					PriorityEntry::new(tag("readme", None), 4.0),
					PriorityEntry::new(tag("guide.md", Some(&docs)), 3.0),
					PriorityEntry::new(tag("main.rs", Some(&code)), 2.0),
					PriorityEntry::new(tag("lib.rs", Some(&code)), 1.0),
				]);
				collection.flush_batch();

				let view = FilteredView::new(&collection, |entry: &Entry<Tag>| entry.label.ends_with(".rs"));
				assert_eq!(labels(&view.items(None)), ["code", "main.rs", "lib.rs"]);
				assert_eq!(view.categories(None).len(), 1);
				assert_eq!(view.cursor(None), None, "source cursor sits on readme");

				let all = FilteredView::new(&collection, |_: &Entry<Tag>| true);
				assert_eq!(all.get(None), collection.items(None));
			})
			.await;
	}

	#[tokio::test]
	async fn subscriptions_track_the_source() {
		LocalSet::new()
			.run_until(async {
				let collection: Collection<Tag> = Collection::new();
				let view = FilteredView::new(&collection, |entry: &Entry<Tag>| entry.label != "hidden");
				let tracker = ChangeTracker::new();
				let sub = tracker.subscription();
				assert!(view.get(Some(&sub)).is_empty());

				collection.add_batch([PriorityEntry::new(tag("hidden", None), 2.0), PriorityEntry::new(tag("shown", None), 1.0)]);
				collection.flush_batch();
				tracker.changed().await;
				assert_eq!(labels(&view.get(Some(&sub))), ["shown"]);
			})
			.await;
	}
}
