#![allow(unused_crate_dependencies)]
//! End-to-end behavior of a command palette fed by streaming providers.

use std::time::Duration;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use tokio::task::LocalSet;
use xeno_collection::{
	Category, ChangeTracker, Collection, CollectionItem, CollectionOptions, Emitter, Entry, ExtractionState, Field, FilteredView, PriorityEntry,
	Snapshot, Subscription,
};

#[derive(Debug)]
struct Command {
	name: &'static str,
	group: Field<Option<Category<Command>>>,
	header: bool,
}

impl Command {
	fn new(name: &'static str, group: Option<&Category<Command>>) -> Entry<Self> {
		Entry::new(Self {
			name,
			group: Field::new(group.cloned()),
			header: false,
		})
	}

	fn group(name: &'static str) -> Category<Command> {
		let header = Entry::new(Self {
			name,
			group: Field::default(),
			header: true,
		});
		Category::new(name, header)
	}
}

impl CollectionItem for Command {
	fn category(&self, sub: Option<&Subscription>) -> Option<Category<Self>> {
		self.group.get(sub)
	}

	fn is_selectable(&self) -> bool {
		!self.header
	}
}

type Palette = Collection<Command>;

fn names(entries: &[Entry<Command>]) -> Vec<&'static str> {
	entries.iter().map(|entry| entry.name).collect()
}

fn provider(
	group: Option<Category<Command>>,
	results: Vec<(&'static str, f64)>,
	pace: Duration,
) -> impl FnOnce(Emitter<PriorityEntry<Command>>) -> LocalBoxFuture<'static, anyhow::Result<()>> {
	move |emit| {
		async move {
			for (name, score) in results {
				tokio::time::sleep(pace).await;
				let entry = PriorityEntry::new(Command::new(name, group.as_ref()), score).with_id(name);
				if emit.emit(entry).await {
					break;
				}
			}
			anyhow::Ok(())
		}
		.boxed_local()
	}
}

#[tokio::test(start_paused = true)]
async fn providers_stream_into_grouped_palette() {
	LocalSet::new()
		.run_until(async {
			let options = CollectionOptions::from_toml("max_category_item_count = 2\nbatch_interval_ms = 20").unwrap();
			let palette: Palette = Collection::builder().options(options).build();
			let files = Command::group("Files");
			let actions = Command::group("Actions");
			let tracker = ChangeTracker::new();
			let sub = tracker.subscription();

			let file_search = palette.add_items(provider(
				Some(files.clone()),
				vec![("a.rs", 3.0), ("b.rs", 5.0), ("c.rs", 1.0), ("d.rs", 4.0)],
				Duration::from_millis(10),
			));
			let action_search = palette.add_items(provider(Some(actions.clone()), vec![("save", 2.0), ("quit", 9.0)], Duration::from_millis(15)));
			let recent = palette.add_items(provider(None, vec![("last file", 0.5)], Duration::from_millis(1)));

			tracker.begin_read();
			assert!(palette.is_loading(Some(&sub)));
			assert!(tracker.is_loading());

			file_search.completion().await.unwrap();
			action_search.completion().await.unwrap();
			recent.completion().await.unwrap();
			tokio::time::sleep(Duration::from_millis(25)).await;

			tracker.begin_read();
			assert_eq!(names(&palette.get(Some(&sub))), ["last file", "Actions", "quit", "save", "Files", "b.rs", "d.rs"]);
			assert!(!tracker.is_loading());
			assert!(tracker.errors().is_empty());
			assert_eq!(palette.cursor(None).map(|entry| entry.name), Some("last file"));

			let rust_only = FilteredView::new(&palette, |entry: &Entry<Command>| entry.name.ends_with(".rs"));
			assert_eq!(names(&rust_only.items(None)), ["Files", "b.rs", "d.rs"]);
		})
		.await;
}

#[tokio::test(start_paused = true)]
async fn stopping_a_provider_keeps_what_it_delivered() {
	LocalSet::new()
		.run_until(async {
			let palette: Palette = Collection::new();
			let handle = palette.add_items(provider(None, vec![("one", 1.0), ("two", 2.0), ("three", 3.0)], Duration::from_millis(10)));

			tokio::time::sleep(Duration::from_millis(25)).await;
			handle.stop();
			assert_eq!(handle.state(), ExtractionState::Stopped);
			handle.completion().await.unwrap();
			assert!(!palette.is_loading(None));

			tokio::time::sleep(Duration::from_millis(200)).await;
			assert_eq!(names(&palette.items(None)), ["two", "one"]);
		})
		.await;
}

#[tokio::test(start_paused = true)]
async fn paused_provider_resumes_with_its_held_result() {
	LocalSet::new()
		.run_until(async {
			let palette: Palette = Collection::new();
			let handle = palette.add_items(provider(None, vec![("first", 1.0), ("second", 2.0)], Duration::from_millis(10)));
			handle.pause();

			tokio::time::sleep(Duration::from_millis(50)).await;
			palette.flush_batch();
			assert!(palette.items(None).is_empty());
			assert_eq!(handle.state(), ExtractionState::Paused);

			let completion = handle.start();
			completion.await.unwrap();
			palette.flush_batch();
			assert_eq!(names(&palette.items(None)), ["second", "first"]);
		})
		.await;
}

#[tokio::test(start_paused = true)]
async fn regrouped_command_moves_between_categories() {
	LocalSet::new()
		.run_until(async {
			let palette: Palette = Collection::new();
			let pinned = Command::group("Pinned");
			let recent = Command::group("Recent");
			let open = Command::new("open", Some(&recent));
			palette.add_item(PriorityEntry::new(open.clone(), 1.0).with_id("open"));
			palette.flush_batch();
			assert_eq!(names(&palette.items(None)), ["Recent", "open"]);

			open.group.set(Some(pinned.clone()));
			tokio::time::sleep(Duration::from_millis(150)).await;
			assert_eq!(names(&palette.items(None)), ["Pinned", "open"]);
			assert_eq!(palette.categories(None)[0].category, Some(pinned));
		})
		.await;
}
