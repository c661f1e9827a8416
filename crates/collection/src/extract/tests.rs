use std::cell::RefCell;
use std::rc::Rc;

use tokio::task::LocalSet;

use super::*;

async fn settle() {
	for _ in 0..16 {
		tokio::task::yield_now().await;
	}
}

fn recorder() -> (Rc<RefCell<Vec<u32>>>, impl FnMut(u32) + 'static) {
	let seen = Rc::new(RefCell::new(Vec::new()));
	let sink = Rc::clone(&seen);
	(seen, move |item| sink.borrow_mut().push(item))
}

#[tokio::test]
async fn running_session_forwards_every_item() {
	LocalSet::new()
		.run_until(async {
			let (seen, on_item) = recorder();
			let extractor = Extractor::new(
				|emit: Emitter<u32>| async move {
					for item in 0..3 {
						if emit.emit(item).await {
							break;
						}
					}
					anyhow::Ok(())
				},
				on_item,
			);
			assert_eq!(extractor.state(), ExtractionState::NotStarted);

			extractor.start().await.unwrap();
			assert_eq!(*seen.borrow(), [0, 1, 2]);
			assert!(extractor.is_stopped());
		})
		.await;
}

#[tokio::test]
async fn resume_delivers_only_the_latest_held_item() {
	LocalSet::new()
		.run_until(async {
			let (seen, on_item) = recorder();
			let extractor = Extractor::new(
				|emit: Emitter<u32>| async move {
					let discarded = emit.emit(1);
					let kept = emit.emit(2);
					drop(discarded);
					assert!(!kept.await);
					emit.emit(3).await;
					anyhow::Ok(())
				},
				on_item,
			);

			let completion = extractor.start();
			extractor.pause();
			assert_eq!(extractor.state(), ExtractionState::Paused);
			settle().await;
			assert!(seen.borrow().is_empty());

			let _ = extractor.start();
			completion.await.unwrap();
			assert_eq!(*seen.borrow(), [2, 3]);
		})
		.await;
}

#[tokio::test]
async fn stop_signals_a_waiting_producer_once() {
	LocalSet::new()
		.run_until(async {
			let (seen, on_item) = recorder();
			let signals = Rc::new(RefCell::new(Vec::new()));
			let log = Rc::clone(&signals);
			let extractor = Extractor::new(
				move |emit: Emitter<u32>| async move {
					let stop = emit.emit(1).await;
					log.borrow_mut().push(stop);
					emit.emit(2).await;
					log.borrow_mut().push(false);
					anyhow::Ok(())
				},
				on_item,
			);

			let _ = extractor.start();
			extractor.pause();
			settle().await;

			extractor.stop();
			extractor.stop();
			extractor.completion().await.unwrap();
			settle().await;

			assert!(seen.borrow().is_empty(), "held item is dropped on stop");
			assert_eq!(*signals.borrow(), [true]);
			assert!(extractor.is_stopped());
		})
		.await;
}

#[tokio::test]
async fn stop_signal_survives_a_dropped_emit() {
	LocalSet::new()
		.run_until(async {
			let (seen, on_item) = recorder();
			let signals = Rc::new(RefCell::new(Vec::new()));
			let log = Rc::clone(&signals);
			let extractor = Extractor::new(
				move |emit: Emitter<u32>| async move {
					drop(emit.emit(1));
					emit.cancelled().await;
					log.borrow_mut().push(emit.emit(2).await);
					anyhow::Ok(())
				},
				on_item,
			);

			let _ = extractor.start();
			extractor.pause();
			settle().await;

			extractor.stop();
			settle().await;

			assert!(seen.borrow().is_empty());
			assert_eq!(*signals.borrow(), [true]);
		})
		.await;
}

#[tokio::test]
async fn non_compliant_producer_is_parked_after_stop_signal() {
	LocalSet::new()
		.run_until(async {
			let seen = Rc::new(RefCell::new(Vec::new()));
			let slot: Rc<RefCell<Option<Extractor<u32>>>> = Rc::new(RefCell::new(None));
			let signals = Rc::new(RefCell::new(0));

			let sink = Rc::clone(&seen);
			let handle = Rc::clone(&slot);
			let count = Rc::clone(&signals);
			let extractor = Extractor::new(
				move |emit: Emitter<u32>| async move {
					for item in 0..10 {
						if emit.emit(item).await {
							*count.borrow_mut() += 1;
						}
					}
					anyhow::Ok(())
				},
				move |item| {
					sink.borrow_mut().push(item);
					if item == 1
						&& let Some(extractor) = handle.borrow().as_ref()
					{
						extractor.stop();
					}
				},
			);
			*slot.borrow_mut() = Some(extractor.clone());

			extractor.start().await.unwrap();
			settle().await;

			assert_eq!(*seen.borrow(), [0, 1]);
			assert_eq!(*signals.borrow(), 1);
			slot.borrow_mut().take();
		})
		.await;
}

#[tokio::test]
async fn producer_failures_settle_the_session() {
	LocalSet::new()
		.run_until(async {
			let failing = Extractor::new(|_: Emitter<u32>| async { Err::<(), _>(anyhow::anyhow!("index unavailable")) }, |_| {});
			let settled = Rc::new(RefCell::new(None));
			let record = Rc::clone(&settled);
			failing.on_settled(move |outcome| *record.borrow_mut() = Some(outcome.is_err()));

			let error = failing.start().await.unwrap_err();
			assert!(matches!(error, CollectionError::Producer(_)));
			assert_eq!(error.to_string(), "producer failed: index unavailable");
			assert_eq!(*settled.borrow(), Some(true));

			let panicking = Extractor::new(
				|_: Emitter<u32>| async {
					if true {
						panic!("provider bug");
					}
					anyhow::Ok(())
				},
				|_| {},
			);
			let error = panicking.start().await.unwrap_err();
			assert!(matches!(error, CollectionError::ProducerPanicked));
		})
		.await;
}

#[tokio::test]
async fn stop_cancels_the_emitter_token() {
	LocalSet::new()
		.run_until(async {
			let observed = Rc::new(RefCell::new(false));
			let flag = Rc::clone(&observed);
			let parent = CancellationToken::new();
			let extractor = Extractor::with_token(
				move |emit: Emitter<u32>| async move {
					emit.cancelled().await;
					*flag.borrow_mut() = emit.is_cancelled();
					anyhow::Ok(())
				},
				|_| {},
				&parent,
			);

			let _ = extractor.start();
			settle().await;
			assert!(!*observed.borrow());

			extractor.stop();
			settle().await;
			assert!(*observed.borrow());
			assert!(!parent.is_cancelled());
		})
		.await;
}

#[tokio::test]
async fn settled_callback_runs_immediately_when_already_settled() {
	LocalSet::new()
		.run_until(async {
			let extractor = Extractor::new(|_: Emitter<u32>| async { anyhow::Ok(()) }, |_| {});
			extractor.stop();
			assert!(extractor.start().await.is_ok());

			let ran = Rc::new(RefCell::new(false));
			let flag = Rc::clone(&ran);
			extractor.on_settled(move |outcome| *flag.borrow_mut() = outcome.is_ok());
			assert!(*ran.borrow());
		})
		.await;
}
