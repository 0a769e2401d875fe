//! Process-wide `tracing` subscriber setup.

use keel_worker::RuntimeConfig;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;

/// Failure to install the logging subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
	/// The configured filter directive did not parse.
	#[error("invalid log filter {directive:?}: {source}")]
	Filter {
		directive: String,
		#[source]
		source: ParseError,
	},
	/// Another global subscriber was installed first.
	#[error("global tracing subscriber already installed")]
	AlreadyInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Builds the filter: `RUST_LOG` when set, otherwise `config.log_level`.
pub fn filter(config: &RuntimeConfig) -> Result<EnvFilter, LoggingError> {
	if let Ok(filter) = EnvFilter::try_from_default_env() {
		return Ok(filter);
	}
	EnvFilter::try_new(&config.log_level).map_err(|source| LoggingError::Filter {
		directive: config.log_level.clone(),
		source,
	})
}

/// Installs a formatting subscriber as the global default.
pub fn init(config: &RuntimeConfig) -> Result<(), LoggingError> {
	let subscriber = tracing_subscriber::fmt().with_env_filter(filter(config)?).finish();
	tracing::subscriber::set_global_default(subscriber)?;
	tracing::debug!(level = %config.log_level, "logging.initialized");
	Ok(())
}
