use keel_worker::fault::{contain, log_fault};
use keel_worker::{RuntimeConfig, TaskClass};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Module;

/// Lifecycle misuse of a [`ModuleRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
	/// Modules were already initialized; the set is fixed.
	#[error("module registry already initialized")]
	AlreadyInitialized,
}

struct Running {
	name: &'static str,
	close: CancellationToken,
	task: JoinHandle<Box<dyn Module>>,
}

/// Ordered set of modules with init and reverse-order teardown.
pub struct ModuleRegistry {
	pending: Vec<Box<dyn Module>>,
	running: Vec<Running>,
	initialized: bool,
	stack_buf_len: usize,
}

impl Default for ModuleRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl ModuleRegistry {
	/// Empty registry with default fault capture.
	pub fn new() -> Self {
		Self::with_config(&RuntimeConfig::default())
	}

	/// Empty registry whose hook faults capture `config.stack_buf_len` bytes of backtrace.
	pub fn with_config(config: &RuntimeConfig) -> Self {
		Self {
			pending: Vec::new(),
			running: Vec::new(),
			initialized: false,
			stack_buf_len: config.stack_buf_len,
		}
	}

	/// Appends `module`. Registration order drives init and teardown.
	pub fn register(&mut self, module: impl Module) -> Result<(), RegistryError> {
		if self.initialized {
			return Err(RegistryError::AlreadyInitialized);
		}
		self.pending.push(Box::new(module));
		Ok(())
	}

	/// Calls every `on_init` in registration order, then starts every `run`.
	pub fn init(&mut self) -> Result<(), RegistryError> {
		if self.initialized {
			return Err(RegistryError::AlreadyInitialized);
		}
		self.initialized = true;

		for module in &mut self.pending {
			tracing::debug!(module = module.name(), "module.init");
			module.on_init();
		}
		for mut module in self.pending.drain(..) {
			let name = module.name();
			let close = CancellationToken::new();
			let token = close.clone();
			let task = keel_worker::spawn(TaskClass::Owner, async move {
				module.run(token).await;
				module
			});
			self.running.push(Running { name, close, task });
		}
		tracing::info!(modules = self.running.len(), "module.registry.started");
		Ok(())
	}

	/// Closes modules in reverse registration order.
	///
	/// Each module is signalled, its `run` awaited, and then `on_destroy`
	/// called. A module whose `run` panicked is logged and not destroyed.
	pub async fn destroy(&mut self) {
		while let Some(Running { name, close, task }) = self.running.pop() {
			close.cancel();
			let mut module = match task.await {
				Ok(module) => module,
				Err(err) => {
					tracing::error!(module = name, error = %err, "module.run.failed");
					continue;
				}
			};
			if let Err(fault) = contain(self.stack_buf_len, || module.on_destroy()) {
				log_fault("module.destroy", &fault);
			}
			tracing::debug!(module = name, "module.destroyed");
		}
	}

	/// Number of registered modules not yet destroyed.
	pub fn len(&self) -> usize {
		self.pending.len() + self.running.len()
	}

	/// Returns `true` when no module is registered or running.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
