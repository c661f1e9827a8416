//! Entries and their priority envelopes.
//!
//! An [`Entry`] is the opaque unit a collection stores. The collection never
//! inspects the payload beyond the [`CollectionItem`] binding; two entries are
//! the same entry only when they share an allocation. A [`PriorityEntry`]
//! wraps an entry with the externally supplied rank and the optional stable
//! [`EntryId`] used to correlate updates across asynchronous emissions.

use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;

use crate::category::Category;
use crate::reactive::Subscription;

/// Capabilities a payload declares to the collection.
pub trait CollectionItem: Sized + 'static {
	/// Category this item declares for itself, if any.
	///
	/// Reading a reactive binding here should register `sub`, so a later
	/// change of category reaches the collection.
	fn category(&self, _sub: Option<&Subscription>) -> Option<Category<Self>> {
		None
	}

	/// Whether the item can hold the cursor or be selected.
	fn is_selectable(&self) -> bool {
		true
	}
}

/// Shared handle to a collection payload with reference identity.
pub struct Entry<T>(Rc<T>);

impl<T> Entry<T> {
	pub fn new(value: T) -> Self {
		Self(Rc::new(value))
	}

	/// Wraps an existing allocation without copying.
	pub fn from_rc(value: Rc<T>) -> Self {
		Self(value)
	}

	/// Returns true when both handles point at the same entry.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}

	pub fn as_rc(&self) -> &Rc<T> {
		&self.0
	}
}

impl<T> Clone for Entry<T> {
	fn clone(&self) -> Self {
		Self(Rc::clone(&self.0))
	}
}

impl<T> Deref for Entry<T> {
	type Target = T;

	fn deref(&self) -> &T {
		&self.0
	}
}

impl<T> PartialEq for Entry<T> {
	fn eq(&self, other: &Self) -> bool {
		self.ptr_eq(other)
	}
}

impl<T> Eq for Entry<T> {}

impl<T> Hash for Entry<T> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		Rc::as_ptr(&self.0).hash(state);
	}
}

impl<T: fmt::Debug> fmt::Debug for Entry<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Entry").field(&*self.0).finish()
	}
}

/// Caller-supplied identifier correlating versions of one logical entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(Rc<str>);

impl EntryId {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for EntryId {
	fn from(value: &str) -> Self {
		Self(Rc::from(value))
	}
}

impl From<String> for EntryId {
	fn from(value: String) -> Self {
		Self(Rc::from(value))
	}
}

impl fmt::Display for EntryId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Async priority recomputation for a retained entry.
pub type RecomputeFn<C> = Rc<dyn Fn(Rc<C>) -> LocalBoxFuture<'static, anyhow::Result<f64>>>;

/// An entry together with its rank inside a collection.
///
/// Entries whose priority is not strictly positive are never retained.
pub struct PriorityEntry<T, C = ()> {
	pub entry: Entry<T>,
	pub priority: f64,
	pub id: Option<EntryId>,
	pub recompute: Option<RecomputeFn<C>>,
}

impl<T, C> PriorityEntry<T, C> {
	pub fn new(entry: Entry<T>, priority: f64) -> Self {
		Self {
			entry,
			priority,
			id: None,
			recompute: None,
		}
	}

	pub fn with_id(mut self, id: impl Into<EntryId>) -> Self {
		self.id = Some(id.into());
		self
	}

	/// Attaches a function recomputing this entry's priority on content updates.
	pub fn with_recompute<F, Fut>(mut self, f: F) -> Self
	where
		F: Fn(Rc<C>) -> Fut + 'static,
		Fut: Future<Output = anyhow::Result<f64>> + 'static,
	{
		self.recompute = Some(Rc::new(move |data| f(data).boxed_local()));
		self
	}

	/// Returns a copy carrying `priority` instead of the current rank.
	pub fn reprioritized(&self, priority: f64) -> Self {
		Self {
			priority,
			..self.clone()
		}
	}

	/// Returns true when the rank keeps this entry in a collection.
	///
	/// NaN is never retained.
	pub fn is_retained(&self) -> bool {
		self.priority > 0.0
	}

	/// Returns true when `other` denotes the same logical entry.
	///
	/// Entries match on a shared stable ID, or on reference identity.
	pub fn same_identity(&self, other: &Self) -> bool {
		match (&self.id, &other.id) {
			(Some(lhs), Some(rhs)) if lhs == rhs => true,
			_ => self.entry.ptr_eq(&other.entry),
		}
	}
}

impl<T, C> Clone for PriorityEntry<T, C> {
	fn clone(&self) -> Self {
		Self {
			entry: self.entry.clone(),
			priority: self.priority,
			id: self.id.clone(),
			recompute: self.recompute.clone(),
		}
	}
}

impl<T: fmt::Debug, C> fmt::Debug for PriorityEntry<T, C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PriorityEntry")
			.field("entry", &self.entry)
			.field("priority", &self.priority)
			.field("id", &self.id)
			.field("recompute", &self.recompute.is_some())
			.finish()
	}
}
