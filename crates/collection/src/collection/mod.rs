//! The owning engine behind pickers and palettes.
//!
//! A [`Collection`] merges entries from any number of producers into one
//! grouped, priority-ordered list. Mutations queue per bucket and become
//! visible together at the next flush, which runs after the batch interval
//! or on [`Collection::flush_batch`]. Each flush then repairs the cursor and
//! selection, notifies listeners once with the aggregated membership change,
//! and finally notifies snapshot subscribers.
//!
//! A collection is single-threaded and spawns its debounce timer and
//! producer drivers with [`tokio::task::spawn_local`], so it must be used
//! from within a [`tokio::task::LocalSet`].
//!
//! Hooks (`selectable`, the category sorter) run while internal state is
//! borrowed and must not call back into the collection. Category resolvers
//! and listeners may.

use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};
use std::time::Duration;

use indexmap::IndexSet;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::batch::{Delta, Removal};
use crate::category::{Category, CategoryGroup, CategoryIndex, CategoryResolver, CategorySorter, DeclaredCategory, TopPriority, VisibleList};
use crate::entry::{CollectionItem, Entry, EntryId, PriorityEntry};
use crate::error::CollectionError;
use crate::extract::{Emitter, Extractor};
use crate::options::CollectionOptions;
use crate::reactive::{Signal, Snapshot, Subscriber, Subscription};
use crate::selection::{SelectionEvent, SelectionState};


/// Producer session feeding a collection.
pub type ExtractionHandle<T, C = ()> = Extractor<PriorityEntry<T, C>>;

/// Receives aggregated membership changes and per-entry selection changes.
pub trait CollectionListener<T> {
	/// Entries that became members during one flush.
	fn on_items_added(&self, _items: &[Entry<T>]) {}

	/// Entries that stopped being members during one flush, evictions
	/// included.
	fn on_items_removed(&self, _items: &[Entry<T>]) {}

	fn on_select(&self, _entry: &Entry<T>, _selected: bool) {}

	/// The cursor left (`false`) or reached (`true`) `entry`.
	fn on_cursor(&self, _entry: &Entry<T>, _current: bool) {}
}

/// Sizes of the aggregated notifications sent by one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
	pub added: usize,
	pub removed: usize,
}

type Selectable<T> = dyn Fn(&Entry<T>) -> bool;

struct Hooks<T> {
	resolver: Box<dyn CategoryResolver<T>>,
	sorter: Box<dyn CategorySorter<T>>,
	selectable: Box<Selectable<T>>,
}

struct State<T: CollectionItem, C: 'static> {
	index: CategoryIndex<T, C>,
	visible: VisibleList<T>,
	selection: SelectionState<T>,
	watches: HashMap<Entry<T>, Rc<CategoryWatch<T, C>>>,
}

struct Shared<T: CollectionItem, C: 'static> {
	state: RefCell<State<T, C>>,
	hooks: Hooks<T>,
	options: CollectionOptions,
	listeners: RefCell<Vec<Rc<dyn CollectionListener<T>>>>,
	signal: Signal,
	timer: RefCell<Option<JoinHandle<()>>>,
	relocations: RefCell<IndexSet<Entry<T>>>,
	extractions: RefCell<Vec<(u64, ExtractionHandle<T, C>)>>,
	next_extraction: Cell<u64>,
	errors: RefCell<Vec<CollectionError>>,
	cancel: CancellationToken,
	destroyed: Cell<bool>,
}

impl<T: CollectionItem, C: 'static> Drop for Shared<T, C> {
	fn drop(&mut self) {
		if let Some(timer) = self.timer.get_mut().take() {
			timer.abort();
		}
		self.cancel.cancel();
		for (_, handle) in self.extractions.get_mut().drain(..) {
			handle.stop();
		}
	}
}

/// Subscription registered while resolving an entry's category. A change
/// queues the entry for relocation at the next flush.
struct CategoryWatch<T: CollectionItem, C: 'static> {
	collection: Weak<Shared<T, C>>,
	entry: Entry<T>,
}

impl<T: CollectionItem, C: 'static> Subscriber for CategoryWatch<T, C> {
	fn on_change(&self) {
		let Some(shared) = self.collection.upgrade() else {
			return;
		};
		if shared.destroyed.get() {
			return;
		}
		shared.relocations.borrow_mut().insert(self.entry.clone());
		Collection { shared }.schedule_update();
	}
}

/// Builder for [`Collection`].
pub struct CollectionBuilder<T: CollectionItem, C: 'static = ()> {
	options: CollectionOptions,
	resolver: Box<dyn CategoryResolver<T>>,
	sorter: Box<dyn CategorySorter<T>>,
	selectable: Box<Selectable<T>>,
	listeners: Vec<Rc<dyn CollectionListener<T>>>,
	context: PhantomData<fn(C)>,
}

impl<T: CollectionItem, C: 'static> Default for CollectionBuilder<T, C> {
	fn default() -> Self {
		Self {
			options: CollectionOptions::default(),
			resolver: Box::new(DeclaredCategory),
			sorter: Box::new(TopPriority),
			selectable: Box::new(|entry: &Entry<T>| entry.is_selectable()),
			listeners: Vec::new(),
			context: PhantomData,
		}
	}
}

impl<T: CollectionItem, C: 'static> CollectionBuilder<T, C> {
	pub fn options(mut self, options: CollectionOptions) -> Self {
		self.options = options;
		self
	}

	pub fn max_category_item_count(mut self, count: usize) -> Self {
		self.options.max_category_item_count = Some(count);
		self
	}

	pub fn batch_interval(mut self, interval: Duration) -> Self {
		self.options.batch_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
		self
	}

	/// Replaces the default resolver, which reads [`CollectionItem::category`].
	pub fn category_resolver(mut self, resolver: impl CategoryResolver<T> + 'static) -> Self {
		self.resolver = Box::new(resolver);
		self
	}

	/// Replaces the default [`TopPriority`] category order.
	pub fn category_sorter(mut self, sorter: impl CategorySorter<T> + 'static) -> Self {
		self.sorter = Box::new(sorter);
		self
	}

	/// Replaces the default predicate, [`CollectionItem::is_selectable`].
	pub fn selectable(mut self, selectable: impl Fn(&Entry<T>) -> bool + 'static) -> Self {
		self.selectable = Box::new(selectable);
		self
	}

	pub fn listener(mut self, listener: Rc<dyn CollectionListener<T>>) -> Self {
		self.listeners.push(listener);
		self
	}

	pub fn build(self) -> Collection<T, C> {
		Collection {
			shared: Rc::new(Shared {
				state: RefCell::new(State {
					index: CategoryIndex::new(),
					visible: VisibleList::default(),
					selection: SelectionState::default(),
					watches: HashMap::new(),
				}),
				hooks: Hooks {
					resolver: self.resolver,
					sorter: self.sorter,
					selectable: self.selectable,
				},
				options: self.options,
				listeners: RefCell::new(self.listeners),
				signal: Signal::new(),
				timer: RefCell::new(None),
				relocations: RefCell::new(IndexSet::new()),
				extractions: RefCell::new(Vec::new()),
				next_extraction: Cell::new(0),
				errors: RefCell::new(Vec::new()),
				cancel: CancellationToken::new(),
				destroyed: Cell::new(false),
			}),
		}
	}
}

/// Prioritized, category-grouped, incrementally built result list.
///
/// Cloning yields another handle to the same collection. Dropping the last
/// handle stops every extraction still running.
pub struct Collection<T: CollectionItem, C: 'static = ()> {
	shared: Rc<Shared<T, C>>,
}

impl<T: CollectionItem, C: 'static> Clone for Collection<T, C> {
	fn clone(&self) -> Self {
		Self {
			shared: Rc::clone(&self.shared),
		}
	}
}

impl<T: CollectionItem, C: 'static> Default for Collection<T, C> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: CollectionItem, C: 'static> Collection<T, C> {
	pub fn new() -> Self {
		Self::builder().build()
	}

	pub fn builder() -> CollectionBuilder<T, C> {
		CollectionBuilder::default()
	}

	pub fn options(&self) -> &CollectionOptions {
		&self.shared.options
	}

	/// Registers a listener after construction.
	pub fn add_listener(&self, listener: Rc<dyn CollectionListener<T>>) {
		self.shared.listeners.borrow_mut().push(listener);
	}

	fn state(&self) -> Ref<'_, State<T, C>> {
		self.shared.state.borrow()
	}

	/// Queues one entry for the next flush.
	///
	/// A newer entry with the same ID replaces the older one. An entry whose
	/// priority is not positive is never shown; if it carries an ID, it
	/// removes the entry currently holding that ID.
	pub fn add_item(&self, item: PriorityEntry<T, C>) {
		if self.shared.destroyed.get() {
			return;
		}
		if !item.is_retained() {
			match item.id {
				Some(id) => self.remove_id(id),
				None => tracing::trace!(priority = item.priority, "collection.add.skipped"),
			}
			return;
		}

		let watch = self.watch(&item.entry);
		let category = self.shared.hooks.resolver.category(&item.entry, Some(&watch));
		self.shared.state.borrow_mut().index.queue_add(category.as_ref(), item);
		self.schedule_update();
	}

	/// Queues a finite batch of entries.
	pub fn add_batch(&self, items: impl IntoIterator<Item = PriorityEntry<T, C>>) {
		for item in items {
			self.add_item(item);
		}
	}

	/// Starts draining `producer` into this collection.
	///
	/// The handle is detached once it settles; a producer error is recorded
	/// and reported through [`Self::errors`] as well as the handle's
	/// completion.
	pub fn add_items<P, Fut>(&self, producer: P) -> ExtractionHandle<T, C>
	where
		P: FnOnce(Emitter<PriorityEntry<T, C>>) -> Fut + 'static,
		Fut: Future<Output = anyhow::Result<()>> + 'static,
	{
		let weak = Rc::downgrade(&self.shared);
		let handle = Extractor::with_token(
			producer,
			move |item| {
				if let Some(shared) = weak.upgrade() {
					Collection { shared }.add_item(item);
				}
			},
			&self.shared.cancel,
		);
		if self.shared.destroyed.get() {
			handle.stop();
			return handle;
		}

		let id = self.shared.next_extraction.get();
		self.shared.next_extraction.set(id.wrapping_add(1));
		self.shared.extractions.borrow_mut().push((id, handle.clone()));

		let weak = Rc::downgrade(&self.shared);
		handle.on_settled(move |outcome| {
			let Some(shared) = weak.upgrade() else {
				return;
			};
			shared.extractions.borrow_mut().retain(|(other, _)| *other != id);
			if let Err(error) = outcome {
				tracing::warn!(%error, extraction = id, "collection.extract.failed");
				shared.errors.borrow_mut().push(error.clone());
			}
			shared.signal.notify();
		});

		tracing::debug!(extraction = id, "collection.extract.attach");
		drop(handle.start());
		self.shared.signal.notify();
		handle
	}

	/// Queues removal of `entry`, including a not yet flushed add of it.
	pub fn remove_item(&self, entry: &Entry<T>) {
		if self.shared.destroyed.get() {
			return;
		}
		self.shared.relocations.borrow_mut().shift_remove(entry);
		if self.shared.state.borrow_mut().index.queue_removal(Removal::Entry(entry.clone())) {
			self.schedule_update();
		}
	}

	/// Queues removal of every version carrying `id`.
	pub fn remove_id(&self, id: impl Into<EntryId>) {
		if self.shared.destroyed.get() {
			return;
		}
		if self.shared.state.borrow_mut().index.queue_removal(Removal::Id(id.into())) {
			self.schedule_update();
		}
	}

	/// Recomputes every retained entry's priority from `data`, then flushes.
	///
	/// Entries without a recompute function keep their priority. Entries
	/// resolving to a non-positive priority are dropped. If any recompute
	/// fails, contents are left unchanged.
	pub async fn update_contents(&self, data: C) -> Result<(), CollectionError> {
		if self.shared.destroyed.get() {
			return Err(CollectionError::Destroyed);
		}
		let data = Rc::new(data);
		let snapshot = self.state().index.retained();
		let recomputes = snapshot.iter().map(|(_, item)| {
			let recompute = item.recompute.clone();
			let data = Rc::clone(&data);
			async move {
				match recompute {
					Some(recompute) => recompute(data).await.map(Some),
					None => Ok(None),
				}
			}
		});

		let priorities = match futures::future::try_join_all(recomputes).await {
			Ok(priorities) => priorities,
			Err(error) => {
				let error = CollectionError::recompute(error);
				tracing::warn!(%error, "collection.update.failed");
				self.shared.errors.borrow_mut().push(error.clone());
				self.shared.signal.notify();
				return Err(error);
			}
		};
		if self.shared.destroyed.get() {
			return Err(CollectionError::Destroyed);
		}

		let recomputed: HashMap<Entry<T>, f64> = snapshot
			.into_iter()
			.zip(priorities)
			.filter_map(|((_, item), priority)| priority.map(|priority| (item.entry, priority)))
			.collect();
		// Contents may have changed while recomputing; rebuild from the
		// current state so concurrent adds and removals survive.
		let rebuilt: Vec<_> = self
			.state()
			.index
			.retained()
			.into_iter()
			.map(|(category, item)| match recomputed.get(&item.entry) {
				Some(priority) => (category, item.reprioritized(*priority)),
				None => (category, item),
			})
			.collect();
		tracing::debug!(entries = rebuilt.len(), recomputed = recomputed.len(), "collection.update");

		self.shared.state.borrow_mut().index.queue_rebuild(rebuilt);
		self.flush_batch();
		Ok(())
	}

	/// Arms the shared debounce timer unless it is already armed.
	pub fn schedule_update(&self) {
		if self.shared.destroyed.get() {
			return;
		}
		let mut timer = self.shared.timer.borrow_mut();
		if timer.is_some() {
			return;
		}
		let weak = Rc::downgrade(&self.shared);
		let interval = self.shared.options.batch_interval();
		tracing::trace!(interval_ms = self.shared.options.batch_interval_ms, "collection.timer.armed");
		*timer = Some(tokio::task::spawn_local(async move {
			tokio::time::sleep(interval).await;
			let Some(shared) = weak.upgrade() else {
				return;
			};
			shared.timer.borrow_mut().take();
			Collection { shared }.flush_batch();
		}));
	}

	/// Materializes every pending mutation now.
	///
	/// A no-op when nothing is pending.
	pub fn flush_batch(&self) -> FlushReport {
		if self.shared.destroyed.get() {
			return FlushReport::default();
		}
		let timer = self.shared.timer.borrow_mut().take();
		if let Some(timer) = timer {
			timer.abort();
		}
		self.apply_relocations();

		let (added, removed, events) = {
			let mut state = self.shared.state.borrow_mut();
			if !state.index.has_pending() {
				return FlushReport::default();
			}
			let mut delta = Delta::default();
			state.index.flush(self.shared.options.max_category_item_count, &mut delta);
			let visible = state.index.visible(&*self.shared.hooks.sorter);
			state.visible = visible;

			let State {
				visible, selection, watches, ..
			} = &mut *state;
			watches.retain(|entry, _| visible.contains(entry));
			let mut events = Vec::new();
			selection.repair(visible, &*self.shared.hooks.selectable, &mut events);

			let (added, removed) = delta.into_parts();
			(added, removed, events)
		};

		let report = FlushReport {
			added: added.len(),
			removed: removed.len(),
		};
		tracing::debug!(
			added = report.added,
			removed = report.removed,
			visible = self.state().visible.items().len(),
			"collection.flush"
		);
		self.dispatch(&added, &removed, events);
		self.shared.signal.notify();
		report
	}

	fn apply_relocations(&self) {
		let moved: Vec<Entry<T>> = self.shared.relocations.borrow_mut().drain(..).collect();
		for entry in moved {
			let found = self.state().index.find(&entry);
			let Some((current, item)) = found else {
				continue;
			};
			let Some(id) = item.id.clone() else {
				tracing::trace!("collection.relocate.ignored");
				continue;
			};
			let watch = self.watch(&entry);
			let category = self.shared.hooks.resolver.category(&entry, Some(&watch));
			if category == current {
				continue;
			}
			tracing::debug!(%id, to = ?category.as_ref().map(Category::name), "collection.relocate");
			self.shared.state.borrow_mut().index.queue_add(category.as_ref(), item);
		}
	}

	fn watch(&self, entry: &Entry<T>) -> Subscription {
		let watch = Rc::new(CategoryWatch {
			collection: Rc::downgrade(&self.shared),
			entry: entry.clone(),
		});
		self.shared.state.borrow_mut().watches.insert(entry.clone(), Rc::clone(&watch));
		watch
	}

	fn dispatch(&self, added: &[Entry<T>], removed: &[Entry<T>], events: Vec<SelectionEvent<T>>) {
		let listeners = self.shared.listeners.borrow().clone();
		if listeners.is_empty() {
			return;
		}
		if !added.is_empty() {
			for listener in &listeners {
				listener.on_items_added(added);
			}
		}
		if !removed.is_empty() {
			for listener in &listeners {
				listener.on_items_removed(removed);
			}
		}
		for event in events {
			for listener in &listeners {
				match &event {
					SelectionEvent::Selected(entry, selected) => listener.on_select(entry, *selected),
					SelectionEvent::Cursor(entry, current) => listener.on_cursor(entry, *current),
				}
			}
		}
	}

	fn update_selection(&self, change: impl FnOnce(&mut SelectionState<T>, &VisibleList<T>, &Selectable<T>, &mut Vec<SelectionEvent<T>>)) {
		if self.shared.destroyed.get() {
			return;
		}
		let mut events = Vec::new();
		{
			let mut state = self.shared.state.borrow_mut();
			let State { visible, selection, .. } = &mut *state;
			change(selection, &*visible, &*self.shared.hooks.selectable, &mut events);
		}
		if events.is_empty() {
			return;
		}
		self.dispatch(&[], &[], events);
		self.shared.signal.notify();
	}

	/// Selects or deselects a visible, selectable entry. Other requests are
	/// ignored.
	pub fn set_selected(&self, entry: &Entry<T>, selected: bool) {
		self.update_selection(|selection, visible, selectable, events| {
			selection.set_selected(entry, selected, visible, selectable, events);
		});
	}

	/// Moves the cursor to a visible, selectable entry, or clears it.
	pub fn set_cursor(&self, entry: Option<&Entry<T>>) {
		self.update_selection(|selection, visible, selectable, events| {
			selection.set_cursor(entry, visible, selectable, events);
		});
	}

	fn track(&self, sub: Option<&Subscription>) {
		self.shared.signal.track(sub);
		let Some(sub) = sub else {
			return;
		};
		if self.loading() {
			sub.mark_loading();
		}
		let errors = self.shared.errors.borrow().clone();
		if !errors.is_empty() {
			sub.report_errors(&errors);
		}
	}

	fn read<R: Default>(&self, sub: Option<&Subscription>, read: impl FnOnce(&State<T, C>) -> R) -> R {
		if self.shared.destroyed.get() {
			return R::default();
		}
		self.track(sub);
		read(&self.state())
	}

	fn loading(&self) -> bool {
		self.shared.extractions.borrow().iter().any(|(_, handle)| !handle.is_stopped())
	}

	/// Headers and members in display order.
	pub fn items(&self, sub: Option<&Subscription>) -> Vec<Entry<T>> {
		self.read(sub, |state| state.visible.items().to_vec())
	}

	/// Visible groups; uncategorized members come first.
	pub fn categories(&self, sub: Option<&Subscription>) -> Vec<CategoryGroup<T>> {
		self.read(sub, |state| state.visible.groups().to_vec())
	}

	pub fn selected(&self, sub: Option<&Subscription>) -> Vec<Entry<T>> {
		self.read(sub, |state| state.selection.selected().cloned().collect())
	}

	pub fn cursor(&self, sub: Option<&Subscription>) -> Option<Entry<T>> {
		self.read(sub, |state| state.selection.cursor().cloned())
	}

	/// Selected entries followed by the cursor, if it is not selected too.
	pub fn all_selected(&self, sub: Option<&Subscription>) -> Vec<Entry<T>> {
		self.read(sub, |state| state.selection.all_selected())
	}

	/// Whether any producer is still streaming.
	pub fn is_loading(&self, sub: Option<&Subscription>) -> bool {
		self.read(sub, |_| self.loading())
	}

	/// Failures recorded from producers and content updates.
	pub fn errors(&self, sub: Option<&Subscription>) -> Vec<CollectionError> {
		self.read(sub, |_| self.shared.errors.borrow().clone())
	}

	pub fn is_destroyed(&self) -> bool {
		self.shared.destroyed.get()
	}

	/// Tears the collection down. Idempotent.
	///
	/// Releases the cursor and selection with notifications, reports every
	/// member as removed, and stops all extractions. Later mutations are
	/// ignored and getters return empty values.
	pub fn destroy(&self) {
		if self.shared.destroyed.replace(true) {
			return;
		}
		tracing::debug!("collection.destroy");
		let timer = self.shared.timer.borrow_mut().take();
		if let Some(timer) = timer {
			timer.abort();
		}
		self.shared.cancel.cancel();
		self.shared.relocations.borrow_mut().clear();

		let (removed, events) = {
			let mut state = self.shared.state.borrow_mut();
			let mut events = Vec::new();
			state.selection.clear(&mut events);
			let mut delta = Delta::default();
			state.index.clear(&mut delta);
			state.visible = VisibleList::default();
			state.watches.clear();
			(delta.into_parts().1, events)
		};

		let extractions = std::mem::take(&mut *self.shared.extractions.borrow_mut());
		for (_, handle) in extractions {
			handle.stop();
		}

		self.dispatch(&[], &removed, events);
		self.shared.signal.notify();
	}
}

impl<T: CollectionItem, C: 'static> Snapshot for Collection<T, C> {
	type Value = Vec<Entry<T>>;

	fn get(&self, sub: Option<&Subscription>) -> Vec<Entry<T>> {
		self.items(sub)
	}
}

impl<T: CollectionItem, C: 'static> std::fmt::Debug for Collection<T, C> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state();
		f.debug_struct("Collection")
			.field("visible", &state.visible.items().len())
			.field("pending", &state.index.has_pending())
			.field("extractions", &self.shared.extractions.borrow().len())
			.field("destroyed", &self.shared.destroyed.get())
			.finish()
	}
}
