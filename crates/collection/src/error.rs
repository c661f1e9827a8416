//! Error types for collections and their configuration.

use std::rc::Rc;

use thiserror::Error;

/// Failures surfaced by asynchronous collection work.
///
/// Synchronous mutations never fail: selecting an absent entry or moving the
/// cursor onto a hidden one is ignored, since such requests routinely race
/// with in-flight searches. Only producers and priority recomputation report
/// errors, and those are kept so observers can render them next to the
/// loading state.
#[derive(Debug, Clone, Error)]
pub enum CollectionError {
	/// A producer returned an error while streaming entries.
	#[error("producer failed: {0}")]
	Producer(Rc<anyhow::Error>),

	/// A producer panicked while streaming entries.
	#[error("producer panicked")]
	ProducerPanicked,

	/// A priority recompute function failed during a content update.
	#[error("priority recompute failed: {0}")]
	Recompute(Rc<anyhow::Error>),

	/// The collection was destroyed before the operation completed.
	#[error("collection was destroyed")]
	Destroyed,
}

impl CollectionError {
	pub(crate) fn producer(error: anyhow::Error) -> Self {
		Self::Producer(Rc::new(error))
	}

	pub(crate) fn recompute(error: anyhow::Error) -> Self {
		Self::Recompute(Rc::new(error))
	}
}

/// Errors that can occur when loading collection options.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error parsing TOML syntax or shape.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// An option holds a value outside its accepted range.
	#[error("invalid value for option '{option}': {reason}")]
	InvalidValue {
		/// The option's key.
		option: &'static str,
		/// Why the value was rejected.
		reason: &'static str,
	},
}
