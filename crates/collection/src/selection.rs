//! Cursor and multi-selection kept consistent with the visible list.
//!
//! Requests naming entries outside the visible list, or entries that are
//! not selectable, are ignored: a search may complete between the moment
//! the user pointed at an entry and the moment the request arrives.

use indexmap::IndexSet;

use crate::category::VisibleList;
use crate::entry::Entry;

/// Per-entry selection change, in the order it happened.
#[derive(Debug, PartialEq, Eq)]
pub enum SelectionEvent<T> {
	/// The entry joined (`true`) or left (`false`) the selection.
	Selected(Entry<T>, bool),
	/// The entry gained (`true`) or lost (`false`) the cursor.
	Cursor(Entry<T>, bool),
}

impl<T> Clone for SelectionEvent<T> {
	fn clone(&self) -> Self {
		match self {
			Self::Selected(entry, selected) => Self::Selected(entry.clone(), *selected),
			Self::Cursor(entry, current) => Self::Cursor(entry.clone(), *current),
		}
	}
}

/// Cursor and selection, both always drawn from the visible list.
pub struct SelectionState<T> {
	cursor: Option<Entry<T>>,
	selected: IndexSet<Entry<T>>,
}

impl<T> Default for SelectionState<T> {
	fn default() -> Self {
		Self {
			cursor: None,
			selected: IndexSet::new(),
		}
	}
}

impl<T> SelectionState<T> {
	pub fn cursor(&self) -> Option<&Entry<T>> {
		self.cursor.as_ref()
	}

	/// Selected entries in selection order.
	pub fn selected(&self) -> impl Iterator<Item = &Entry<T>> {
		self.selected.iter()
	}

	pub fn is_selected(&self, entry: &Entry<T>) -> bool {
		self.selected.contains(entry)
	}

	/// Selected entries followed by the cursor, if it is not selected too.
	pub fn all_selected(&self) -> Vec<Entry<T>> {
		let mut all: Vec<Entry<T>> = self.selected.iter().cloned().collect();
		if let Some(cursor) = &self.cursor
			&& !self.selected.contains(cursor)
		{
			all.push(cursor.clone());
		}
		all
	}

	pub fn set_selected(
		&mut self,
		entry: &Entry<T>,
		selected: bool,
		visible: &VisibleList<T>,
		selectable: &dyn Fn(&Entry<T>) -> bool,
		events: &mut Vec<SelectionEvent<T>>,
	) {
		if !visible.contains(entry) || !selectable(entry) {
			return;
		}
		let changed = if selected {
			self.selected.insert(entry.clone())
		} else {
			self.selected.shift_remove(entry)
		};
		if changed {
			events.push(SelectionEvent::Selected(entry.clone(), selected));
		}
	}

	/// Moves the cursor. The old cursor is released before the new one is
	/// reported.
	pub fn set_cursor(
		&mut self,
		entry: Option<&Entry<T>>,
		visible: &VisibleList<T>,
		selectable: &dyn Fn(&Entry<T>) -> bool,
		events: &mut Vec<SelectionEvent<T>>,
	) {
		if let Some(entry) = entry
			&& (!visible.contains(entry) || !selectable(entry))
		{
			return;
		}
		self.move_cursor(entry.cloned(), events);
	}

	/// Restores the invariants after the visible list changed.
	///
	/// Selected entries that left the list are deselected. A cursor that is
	/// unset or gone moves to the first selectable entry, or is cleared when
	/// there is none.
	pub fn repair(&mut self, visible: &VisibleList<T>, selectable: &dyn Fn(&Entry<T>) -> bool, events: &mut Vec<SelectionEvent<T>>) {
		self.selected.retain(|entry| {
			let kept = visible.contains(entry);
			if !kept {
				events.push(SelectionEvent::Selected(entry.clone(), false));
			}
			kept
		});

		if self.cursor.as_ref().is_some_and(|cursor| visible.contains(cursor)) {
			return;
		}
		let next = visible.items().iter().find(|entry| selectable(*entry)).cloned();
		self.move_cursor(next, events);
	}

	/// Releases the cursor and every selected entry.
	pub fn clear(&mut self, events: &mut Vec<SelectionEvent<T>>) {
		if let Some(cursor) = self.cursor.take() {
			events.push(SelectionEvent::Cursor(cursor, false));
		}
		for entry in self.selected.drain(..) {
			events.push(SelectionEvent::Selected(entry, false));
		}
	}

	fn move_cursor(&mut self, next: Option<Entry<T>>, events: &mut Vec<SelectionEvent<T>>) {
		if self.cursor == next {
			return;
		}
		if let Some(previous) = self.cursor.take() {
			events.push(SelectionEvent::Cursor(previous, false));
		}
		if let Some(next) = &next {
			events.push(SelectionEvent::Cursor(next.clone(), true));
		}
		self.cursor = next;
	}
}

impl<T: std::fmt::Debug> std::fmt::Debug for SelectionState<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SelectionState")
			.field("cursor", &self.cursor)
			.field("selected", &self.selected)
			.finish()
	}
}
