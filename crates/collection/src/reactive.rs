//! Subscription-aware snapshots.
//!
//! Getters across this crate accept an optional [`Subscription`]. Reading
//! through a subscription registers it with the value's [`Signal`], and the
//! next change calls [`Subscriber::on_change`]. Registrations are weak, so
//! dropping the subscriber unsubscribes it; dead entries are pruned lazily
//! while notifying.
//!
//! Debouncing is the caller's concern: a subscriber may be notified many
//! times per frame and decides itself when to read again. [`ChangeTracker`]
//! is a ready-made subscriber for async consumers.
//!
//! # Invariants
//!
//! 1. A subscriber is registered at most once per signal.
//! 2. Subscribers are notified in registration order.
//! 3. Notification never holds an internal borrow, so a subscriber may read
//!    or mutate the notifying value from `on_change`.

use std::cell::{Cell, Ref, RefCell};
use std::rc::{Rc, Weak};

use tokio::sync::Notify;

use crate::error::CollectionError;

/// Receives change notifications and status reported by getters.
pub trait Subscriber {
	/// Called after a value read through this subscriber has changed.
	fn on_change(&self);

	/// Called by getters while results are still streaming in.
	fn mark_loading(&self) {}

	/// Called by getters when asynchronous work has failed.
	fn report_errors(&self, _errors: &[CollectionError]) {}
}

/// Shared subscriber handle passed to getters.
pub type Subscription = Rc<dyn Subscriber>;

/// A value readable with an optional subscription.
pub trait Snapshot {
	type Value;

	fn get(&self, sub: Option<&Subscription>) -> Self::Value;
}

/// Registry of subscribers interested in one value.
#[derive(Default)]
pub struct Signal {
	subscribers: RefCell<Vec<Weak<dyn Subscriber>>>,
}

impl Signal {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `sub`, if any, for the next change.
	pub fn track(&self, sub: Option<&Subscription>) {
		let Some(sub) = sub else {
			return;
		};
		let weak = Rc::downgrade(sub);
		let mut subscribers = self.subscribers.borrow_mut();
		subscribers.retain(|existing| existing.strong_count() > 0);
		if !subscribers.iter().any(|existing| existing.ptr_eq(&weak)) {
			subscribers.push(weak);
		}
	}

	/// Notifies every live subscriber.
	pub fn notify(&self) {
		let live: Vec<Subscription> = {
			let mut subscribers = self.subscribers.borrow_mut();
			subscribers.retain(|existing| existing.strong_count() > 0);
			subscribers.iter().filter_map(Weak::upgrade).collect()
		};
		for sub in live {
			sub.on_change();
		}
	}

	/// Returns the number of live subscribers.
	pub fn subscriber_count(&self) -> usize {
		self.subscribers.borrow().iter().filter(|existing| existing.strong_count() > 0).count()
	}
}

impl std::fmt::Debug for Signal {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Signal").field("subscribers", &self.subscriber_count()).finish()
	}
}

/// A mutable cell that notifies subscribers when its value changes.
///
/// Items typically hold their category binding in a `Field`, which gives the
/// collection a way to learn about category changes.
pub struct Field<V> {
	value: RefCell<V>,
	signal: Signal,
}

impl<V> Field<V> {
	pub fn new(value: V) -> Self {
		Self {
			value: RefCell::new(value),
			signal: Signal::new(),
		}
	}

	/// Borrows the current value, registering `sub`.
	pub fn borrow(&self, sub: Option<&Subscription>) -> Ref<'_, V> {
		self.signal.track(sub);
		self.value.borrow()
	}

	/// Replaces the value and notifies subscribers.
	pub fn set(&self, value: V) {
		*self.value.borrow_mut() = value;
		self.signal.notify();
	}
}

impl<V: Clone> Snapshot for Field<V> {
	type Value = V;

	fn get(&self, sub: Option<&Subscription>) -> V {
		self.borrow(sub).clone()
	}
}

impl<V: Default> Default for Field<V> {
	fn default() -> Self {
		Self::new(V::default())
	}
}

impl<V: std::fmt::Debug> std::fmt::Debug for Field<V> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field").field("value", &*self.value.borrow()).finish()
	}
}

/// Subscriber recording change counts and getter status for async consumers.
///
/// Status (loading, errors) reflects the reads made since the last
/// [`ChangeTracker::begin_read`].
#[derive(Debug, Default)]
pub struct ChangeTracker {
	version: Cell<u64>,
	loading: Cell<bool>,
	errors: RefCell<Vec<CollectionError>>,
	notify: Notify,
}

impl ChangeTracker {
	pub fn new() -> Rc<Self> {
		Rc::new(Self::default())
	}

	/// Returns this tracker as a getter subscription.
	pub fn subscription(self: &Rc<Self>) -> Subscription {
		Rc::clone(self) as Subscription
	}

	/// Number of change notifications received so far.
	pub fn version(&self) -> u64 {
		self.version.get()
	}

	/// Resets the status gathered by previous reads.
	pub fn begin_read(&self) {
		self.loading.set(false);
		self.errors.borrow_mut().clear();
	}

	/// Whether any read since [`Self::begin_read`] reported streaming work.
	pub fn is_loading(&self) -> bool {
		self.loading.get()
	}

	/// Errors reported by reads since [`Self::begin_read`].
	pub fn errors(&self) -> Vec<CollectionError> {
		self.errors.borrow().clone()
	}

	/// Resolves after the next change notification.
	///
	/// A notification that arrived while nobody was waiting completes the
	/// next call immediately.
	pub async fn changed(&self) {
		self.notify.notified().await;
	}
}

impl Subscriber for ChangeTracker {
	fn on_change(&self) {
		self.version.set(self.version.get().wrapping_add(1));
		self.notify.notify_one();
	}

	fn mark_loading(&self) {
		self.loading.set(true);
	}

	fn report_errors(&self, errors: &[CollectionError]) {
		let mut stored = self.errors.borrow_mut();
		stored.clear();
		stored.extend_from_slice(errors);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Default)]
	struct Counter(Cell<usize>);

	impl Subscriber for Counter {
		fn on_change(&self) {
			self.0.set(self.0.get() + 1);
		}
	}

	#[test]
	fn field_notifies_tracked_subscribers_once_per_change() {
		let field = Field::new(1);
		let counter = Rc::new(Counter::default());
		let sub: Subscription = counter.clone();

		assert_eq!(field.get(Some(&sub)), 1);
		assert_eq!(field.get(Some(&sub)), 1);
		assert_eq!(field.signal.subscriber_count(), 1);

		field.set(2);
		assert_eq!(counter.0.get(), 1);
		assert_eq!(field.get(None), 2);
	}

	#[test]
	fn untracked_reads_do_not_subscribe() {
		let field = Field::new("a");
		let counter = Rc::new(Counter::default());
		let _ = field.get(None);
		field.set("b");
		assert_eq!(counter.0.get(), 0);
	}

	#[test]
	fn dropped_subscribers_are_pruned() {
		let field = Field::new(0);
		{
			let sub: Subscription = Rc::new(Counter::default());
			let _ = field.get(Some(&sub));
			assert_eq!(field.signal.subscriber_count(), 1);
		}
		field.set(1);
		assert_eq!(field.signal.subscriber_count(), 0);
	}

	#[test]
	fn subscriber_may_read_while_notified() {
		struct Reader {
			field: Rc<Field<u32>>,
			seen: Cell<u32>,
		}
		impl Subscriber for Reader {
			fn on_change(&self) {
				self.seen.set(self.field.get(None));
			}
		}

		let field = Rc::new(Field::new(0));
		let reader = Rc::new(Reader {
			field: Rc::clone(&field),
			seen: Cell::new(0),
		});
		let sub: Subscription = reader.clone();
		let _ = field.get(Some(&sub));
		field.set(7);
		assert_eq!(reader.seen.get(), 7);
	}

	#[tokio::test]
	async fn change_tracker_keeps_a_pending_notification() {
		let tracker = ChangeTracker::new();
		tracker.on_change();
		tracker.changed().await;
		assert_eq!(tracker.version(), 1);

		tracker.mark_loading();
		tracker.report_errors(&[CollectionError::Destroyed]);
		assert!(tracker.is_loading());
		assert_eq!(tracker.errors().len(), 1);

		tracker.begin_read();
		assert!(!tracker.is_loading());
		assert!(tracker.errors().is_empty());
	}
}
