//! Dispatch core configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Tunables for the service cache and its background tasks.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
	/// Period of the integrity reconciler.
	#[serde(default = "default_integrity_interval")]
	pub integrity_check_interval_ms: u64,
	/// Routing key that marks a catch-all service.
	#[serde(default = "default_catch_all")]
	pub catch_all_route: String,
	/// Capacity of the outbound cache event channel.
	#[serde(default = "default_event_buffer")]
	pub event_buffer: usize,
	/// Populate the cache from the store when the runtime starts.
	#[serde(default = "default_warm_start")]
	pub warm_start: bool,
	/// Name of the thread that tears down retired policies.
	#[serde(default = "default_disposal_thread")]
	pub disposal_thread: String,
}

fn default_integrity_interval() -> u64 {
	4000
}

fn default_catch_all() -> String {
	"/*".to_string()
}

fn default_event_buffer() -> usize {
	128
}

fn default_warm_start() -> bool {
	true
}

fn default_disposal_thread() -> String {
	"policy-disposal".to_string()
}

impl Default for DispatchConfig {
	fn default() -> Self {
		Self {
			integrity_check_interval_ms: default_integrity_interval(),
			catch_all_route: default_catch_all(),
			event_buffer: default_event_buffer(),
			warm_start: default_warm_start(),
			disposal_thread: default_disposal_thread(),
		}
	}
}

impl DispatchConfig {
	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(text)?)
	}

	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml_str(&text)
	}

	pub fn integrity_check_interval(&self) -> Duration {
		Duration::from_millis(self.integrity_check_interval_ms.max(1))
	}
}
