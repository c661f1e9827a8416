//! Construction options for a [`Collection`](crate::Collection).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Debounce window between a mutation and its automatic flush.
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Data-only collection options, loadable from TOML.
///
/// ```toml
/// max_category_item_count = 50
/// batch_interval_ms = 30
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectionOptions {
	/// Visible members kept per category; the lowest-ranked are evicted.
	/// Unbounded when unset.
	pub max_category_item_count: Option<usize>,
	pub batch_interval_ms: u64,
}

impl Default for CollectionOptions {
	fn default() -> Self {
		Self {
			max_category_item_count: None,
			batch_interval_ms: DEFAULT_BATCH_INTERVAL.as_millis() as u64,
		}
	}
}

impl CollectionOptions {
	pub fn batch_interval(&self) -> Duration {
		Duration::from_millis(self.batch_interval_ms)
	}

	/// Parses and validates options from a TOML document.
	pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
		let options: Self = toml::from_str(source)?;
		options.validate()?;
		Ok(options)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_category_item_count == Some(0) {
			return Err(ConfigError::InvalidValue {
				option: "max_category_item_count",
				reason: "must be at least 1; leave unset for no limit",
			});
		}
		Ok(())
	}
}
