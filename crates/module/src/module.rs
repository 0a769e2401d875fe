use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A long-lived unit driven by a [`ModuleRegistry`](crate::ModuleRegistry).
#[async_trait]
pub trait Module: Send + 'static {
	/// Name used in lifecycle logs.
	fn name(&self) -> &'static str {
		std::any::type_name::<Self>()
	}

	/// Called in registration order before any module runs.
	fn on_init(&mut self) {}

	/// Runs until `close` is cancelled, then drains and returns.
	async fn run(&mut self, close: CancellationToken);

	/// Called in reverse registration order after `run` returned.
	fn on_destroy(&mut self) {}
}
