//! Runtime sizing configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading a [`RuntimeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		#[source]
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or an invalid value.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),
}

/// Queue sizes and fault-reporting knobs shared by the dispatch primitives.
///
/// Every field has a default, so an empty document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
	/// Maximum bytes of backtrace captured for contained panics. Zero disables capture.
	pub stack_buf_len: usize,
	/// Capacity of a call server mailbox.
	pub call_mailbox_len: usize,
	/// Capacity of a task dispatcher callback queue.
	pub go_len: usize,
	/// Capacity of a timer dispatcher queue.
	pub timer_dispatcher_len: usize,
	/// Capacity (and in-flight limit) of a client's asynchronous return queue.
	pub async_call_len: usize,
	/// `tracing` filter directive used by the logging bootstrap.
	pub log_level: String,
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		Self {
			stack_buf_len: 4096,
			call_mailbox_len: 10_000,
			go_len: 10_000,
			timer_dispatcher_len: 10_000,
			async_call_len: 10_000,
			log_level: "info".to_string(),
		}
	}
}

impl RuntimeConfig {
	/// Parses a config from TOML text.
	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(text)?)
	}

	/// Reads and parses a TOML config file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&text)
	}
}
