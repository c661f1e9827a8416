//! Cooperative draining of one asynchronous producer.
//!
//! A producer receives an [`Emitter`] and must await every
//! [`Emitter::emit`] before producing its next item. That await is the only
//! backpressure and cancellation point:
//!
//! * `false`: keep going.
//! * `true`: a stop was requested; wrap up. Delivered at most once.
//! * never resolves: any emit after the stop signal. A producer ignoring the
//!   signal is parked for good and its driver task is aborted.
//!
//! While paused, the extractor holds the most recent item in a single slot
//! and leaves the producer waiting. Resuming forwards the held item and
//! releases the producer. Emitting again while an item is held replaces it.
//!
//! Extractors run on a [`tokio::task::LocalSet`].

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::CollectionError;

#[cfg(test)]
mod tests;

/// Lifecycle of an [`Extractor`]. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
	NotStarted,
	Running,
	Paused,
	Stopped,
}

type Producer<I> = Box<dyn FnOnce(Emitter<I>) -> LocalBoxFuture<'static, anyhow::Result<()>>>;
type SettledFn = Box<dyn FnOnce(&Result<(), CollectionError>)>;

struct Shared<I: 'static> {
	state: Cell<ExtractionState>,
	producer: RefCell<Option<Producer<I>>>,
	on_item: RefCell<Box<dyn FnMut(I)>>,
	on_settled: RefCell<Option<SettledFn>>,
	held: RefCell<Option<I>>,
	resume: RefCell<Option<oneshot::Sender<bool>>>,
	stop_signalled: Cell<bool>,
	outcome: RefCell<Option<Result<(), CollectionError>>>,
	settled: Notify,
	task: RefCell<Option<JoinHandle<()>>>,
	cancel: CancellationToken,
}

impl<I: 'static> Shared<I> {
	fn settle(&self, outcome: Result<(), CollectionError>) {
		if self.outcome.borrow().is_some() {
			if let Err(error) = &outcome {
				tracing::debug!(%error, "collection.extract.late_error");
			}
			return;
		}
		tracing::debug!(ok = outcome.is_ok(), "collection.extract.settled");

		self.state.set(ExtractionState::Stopped);
		self.cancel.cancel();
		self.held.borrow_mut().take();
		*self.outcome.borrow_mut() = Some(outcome.clone());
		self.settled.notify_waiters();

		let callback = self.on_settled.borrow_mut().take();
		if let Some(callback) = callback {
			callback(&outcome);
		}
	}

	fn offer(&self, item: I) -> Offer {
		match self.state.get() {
			ExtractionState::Running => {
				(*self.on_item.borrow_mut())(item);
				Offer::Continue
			}
			ExtractionState::NotStarted | ExtractionState::Paused => {
				tracing::trace!(replaced = self.held.borrow().is_some(), "collection.extract.hold");
				*self.held.borrow_mut() = Some(item);
				let (tx, rx) = oneshot::channel();
				// Replacing the sender parks any earlier waiter.
				*self.resume.borrow_mut() = Some(tx);
				Offer::Wait(rx)
			}
			ExtractionState::Stopped if !self.stop_signalled.get() => {
				self.stop_signalled.set(true);
				Offer::Stop
			}
			ExtractionState::Stopped => {
				tracing::trace!("collection.extract.park");
				let task = self.task.borrow_mut().take();
				if let Some(task) = task {
					task.abort();
				}
				Offer::Park
			}
		}
	}
}

enum Offer {
	Continue,
	Stop,
	Wait(oneshot::Receiver<bool>),
	Park,
}

/// Handle to one producer-drain session.
pub struct Extractor<I: 'static> {
	shared: Rc<Shared<I>>,
}

impl<I: 'static> Clone for Extractor<I> {
	fn clone(&self) -> Self {
		Self {
			shared: Rc::clone(&self.shared),
		}
	}
}

impl<I: 'static> Extractor<I> {
	/// Binds `producer` to `on_item`. Nothing runs until [`Self::start`].
	pub fn new<P, Fut>(producer: P, on_item: impl FnMut(I) + 'static) -> Self
	where
		P: FnOnce(Emitter<I>) -> Fut + 'static,
		Fut: Future<Output = anyhow::Result<()>> + 'static,
	{
		Self::with_token(producer, on_item, &CancellationToken::new())
	}

	/// Like [`Self::new`], with a cancellation token derived from `parent`.
	pub fn with_token<P, Fut>(producer: P, on_item: impl FnMut(I) + 'static, parent: &CancellationToken) -> Self
	where
		P: FnOnce(Emitter<I>) -> Fut + 'static,
		Fut: Future<Output = anyhow::Result<()>> + 'static,
	{
		let producer: Producer<I> = Box::new(move |emitter| producer(emitter).boxed_local());
		Self {
			shared: Rc::new(Shared {
				state: Cell::new(ExtractionState::NotStarted),
				producer: RefCell::new(Some(producer)),
				on_item: RefCell::new(Box::new(on_item)),
				on_settled: RefCell::new(None),
				held: RefCell::new(None),
				resume: RefCell::new(None),
				stop_signalled: Cell::new(false),
				outcome: RefCell::new(None),
				settled: Notify::new(),
				task: RefCell::new(None),
				cancel: parent.child_token(),
			}),
		}
	}

	/// Registers a callback run once when the session settles.
	///
	/// Replaces a previously registered callback. Runs immediately if the
	/// session has already settled.
	pub fn on_settled(&self, callback: impl FnOnce(&Result<(), CollectionError>) + 'static) {
		let outcome = self.shared.outcome.borrow().clone();
		match outcome {
			Some(outcome) => callback(&outcome),
			None => *self.shared.on_settled.borrow_mut() = Some(Box::new(callback)),
		}
	}

	pub fn state(&self) -> ExtractionState {
		self.shared.state.get()
	}

	pub fn is_stopped(&self) -> bool {
		self.state() == ExtractionState::Stopped
	}

	/// Starts the producer, or resumes it after [`Self::pause`].
	///
	/// Resuming forwards the held item, if any, before releasing the
	/// producer. Returns the session's completion.
	pub fn start(&self) -> impl Future<Output = Result<(), CollectionError>> + 'static {
		match self.state() {
			ExtractionState::NotStarted => self.spawn(),
			ExtractionState::Paused => self.resume(),
			ExtractionState::Running | ExtractionState::Stopped => {}
		}
		self.completion()
	}

	fn spawn(&self) {
		let producer = self.shared.producer.borrow_mut().take();
		let Some(producer) = producer else {
			return;
		};
		self.shared.state.set(ExtractionState::Running);
		tracing::debug!("collection.extract.start");

		let emitter = Emitter {
			shared: Rc::clone(&self.shared),
		};
		let shared = Rc::clone(&self.shared);
		let task = tokio::task::spawn_local(async move {
			let outcome = match AssertUnwindSafe(async move { producer(emitter).await }).catch_unwind().await {
				Ok(Ok(())) => Ok(()),
				Ok(Err(error)) => Err(CollectionError::producer(error)),
				Err(_) => Err(CollectionError::ProducerPanicked),
			};
			shared.task.borrow_mut().take();
			shared.settle(outcome);
		});
		*self.shared.task.borrow_mut() = Some(task);
	}

	fn resume(&self) {
		self.shared.state.set(ExtractionState::Running);
		tracing::debug!("collection.extract.resume");
		let held = self.shared.held.borrow_mut().take();
		if let Some(item) = held {
			(*self.shared.on_item.borrow_mut())(item);
		}
		// The item callback may have stopped this session.
		if self.state() != ExtractionState::Running {
			return;
		}
		let resume = self.shared.resume.borrow_mut().take();
		if let Some(resume) = resume {
			let _ = resume.send(false);
		}
	}

	/// Withholds further items until the next [`Self::start`].
	///
	/// Only a running session can pause.
	pub fn pause(&self) {
		if self.state() == ExtractionState::Running {
			self.shared.state.set(ExtractionState::Paused);
			tracing::debug!("collection.extract.pause");
		}
	}

	/// Stops the session. No item reaches the callback afterwards.
	///
	/// A producer waiting on an emit receives the stop signal now; otherwise
	/// its next emit does. Completion resolves with `Ok` right away.
	pub fn stop(&self) {
		if self.is_stopped() {
			return;
		}
		tracing::debug!("collection.extract.stop");
		self.shared.state.set(ExtractionState::Stopped);
		self.shared.producer.borrow_mut().take();

		let resume = self.shared.resume.borrow_mut().take();
		// A waiter that already went away leaves the signal for the next emit.
		if let Some(resume) = resume
			&& resume.send(true).is_ok()
		{
			self.shared.stop_signalled.set(true);
		}
		self.shared.settle(Ok(()));
	}

	/// Resolves once the producer finished or the session was stopped.
	pub fn completion(&self) -> impl Future<Output = Result<(), CollectionError>> + 'static {
		let shared = Rc::clone(&self.shared);
		async move {
			loop {
				let notified = shared.settled.notified();
				let outcome = shared.outcome.borrow().clone();
				if let Some(outcome) = outcome {
					return outcome;
				}
				notified.await;
			}
		}
	}
}

impl<I: 'static> std::fmt::Debug for Extractor<I> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Extractor")
			.field("state", &self.state())
			.field("holding", &self.shared.held.borrow().is_some())
			.finish()
	}
}

/// Producer side of an [`Extractor`].
pub struct Emitter<I: 'static> {
	shared: Rc<Shared<I>>,
}

impl<I: 'static> Clone for Emitter<I> {
	fn clone(&self) -> Self {
		Self {
			shared: Rc::clone(&self.shared),
		}
	}
}

impl<I: 'static> Emitter<I> {
	/// Hands `item` to the session. See the module docs for the protocol.
	pub fn emit(&self, item: I) -> impl Future<Output = bool> + 'static {
		let offer = self.shared.offer(item);
		async move {
			match offer {
				Offer::Continue => false,
				Offer::Stop => true,
				Offer::Wait(resume) => match resume.await {
					Ok(stop) => stop,
					Err(_) => std::future::pending().await,
				},
				Offer::Park => std::future::pending().await,
			}
		}
	}

	/// Whether the session was stopped.
	pub fn is_cancelled(&self) -> bool {
		self.shared.cancel.is_cancelled()
	}

	/// Resolves when the session is stopped.
	pub async fn cancelled(&self) {
		self.shared.cancel.cancelled().await;
	}
}
