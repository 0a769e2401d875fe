//! Entry points for every task the dispatchers start.
//!
//! Timer sleeps, task deliveries and module runs may be armed from threads
//! that have no tokio context (a plain test thread, a `Drop` impl, a blocking
//! worker). Those land on a shared two-thread fallback runtime.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::TaskClass;

static FALLBACK: OnceLock<Runtime> = OnceLock::new();

/// Handle of the caller's runtime, or of the fallback runtime outside one.
fn ambient() -> Handle {
	Handle::try_current().unwrap_or_else(|_| {
		FALLBACK
			.get_or_init(|| {
				Builder::new_multi_thread()
					.worker_threads(2)
					.thread_name("keel-fallback")
					.enable_all()
					.build()
					.expect("keel fallback runtime")
			})
			.handle()
			.clone()
	})
}

/// Starts `fut` on the ambient runtime, recording `class` in the trace.
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(class = class.as_str(), "keel.spawn");
	ambient().spawn(fut)
}

/// Runs `work` on the ambient runtime's blocking pool.
pub fn spawn_blocking<F, R>(class: TaskClass, work: F) -> JoinHandle<R>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	tracing::trace!(class = class.as_str(), "keel.spawn_blocking");
	ambient().spawn_blocking(work)
}
