//! Prioritized, category-grouped result collection for incremental search UIs.
//!
//! Producers stream [`PriorityEntry`] values into a [`Collection`]. Entries
//! are grouped by [`Category`], ordered by descending priority inside each
//! group, and published in debounced batches so a renderer sees one stable
//! [`VisibleList`] per flush. The collection keeps a cursor and a
//! multi-selection consistent with that list and exposes every piece of
//! state through subscription-aware getters.
//!
//! Everything here is single-threaded and must run inside a
//! [`tokio::task::LocalSet`].

#![cfg_attr(test, allow(unused_crate_dependencies))]

/// Pending batches and their aggregated membership delta.
pub mod batch;
/// Priority-ordered storage for one category.
pub mod bucket;
/// Category keys, resolvers, sorters, and the category index.
pub mod category;
/// The owning collection engine.
pub mod collection;
/// Entries, stable IDs, and priority envelopes.
pub mod entry;
/// Error types.
pub mod error;
/// Cooperative draining of asynchronous producers.
pub mod extract;
/// Serializable construction options.
pub mod options;
/// Subscription-aware snapshots.
pub mod reactive;
/// Cursor and multi-selection state.
pub mod selection;
/// Derived projections over a collection.
pub mod view;

pub use batch::{Delta, PendingBatch, Removal};
pub use bucket::{Membership, OrderedBucket};
pub use category::{BucketSummary, Category, CategoryGroup, CategoryIndex, CategoryResolver, CategorySorter, DeclaredCategory, TopPriority, VisibleList};
pub use collection::{Collection, CollectionBuilder, CollectionListener, ExtractionHandle, FlushReport};
pub use entry::{CollectionItem, Entry, EntryId, PriorityEntry, RecomputeFn};
pub use error::{CollectionError, ConfigError};
pub use extract::{Emitter, ExtractionState, Extractor};
pub use options::{CollectionOptions, DEFAULT_BATCH_INTERVAL};
pub use reactive::{ChangeTracker, Field, Signal, Snapshot, Subscriber, Subscription};
pub use selection::{SelectionEvent, SelectionState};
pub use view::FilteredView;
