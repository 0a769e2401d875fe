use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use super::{Job, TaskSpawner, job, run_job};
use crate::TaskClass;
use crate::fault::Fault;
use crate::spawn::spawn;

/// Ordered submission context over a [`TaskDispatcher`](super::TaskDispatcher).
///
/// Work submitted here runs one unit at a time, and callbacks reach the
/// owner queue in submission order. Every delivery task takes the execution
/// lock and then pops the front of the queue, so order holds no matter
/// which task wins the lock.
pub struct LinearContext<S> {
	spawner: TaskSpawner<S>,
	queue: Arc<Mutex<VecDeque<Job<S>>>>,
	execution: Arc<tokio::sync::Mutex<()>>,
}

impl<S> Clone for LinearContext<S> {
	fn clone(&self) -> Self {
		Self {
			spawner: self.spawner.clone(),
			queue: Arc::clone(&self.queue),
			execution: Arc::clone(&self.execution),
		}
	}
}

impl<S: 'static> LinearContext<S> {
	pub(super) fn new(spawner: TaskSpawner<S>) -> Self {
		Self {
			spawner,
			queue: Arc::new(Mutex::new(VecDeque::new())),
			execution: Arc::new(tokio::sync::Mutex::new(())),
		}
	}

	/// Queues `work` behind every unit submitted earlier through this context.
	pub fn go<T, W, F>(&self, work: W, callback: F)
	where
		T: Send + 'static,
		W: FnOnce() -> T + Send + 'static,
		F: FnOnce(&mut S, Result<T, Fault>) + Send + 'static,
	{
		self.spawner.pending.fetch_add(1, Ordering::AcqRel);
		self.queue.lock().push_back(job(self.spawner.stack_buf_len, work, callback));

		let queue = Arc::clone(&self.queue);
		let execution = Arc::clone(&self.execution);
		let tx = self.spawner.tx.clone();
		spawn(TaskClass::Delivery, async move {
			let _running = execution.lock().await;
			let Some(job) = queue.lock().pop_front() else {
				return;
			};
			run_job(job, &tx).await;
		});
	}

	/// Ordered form of [`TaskSpawner::spawn`].
	pub fn spawn<W>(&self, work: W)
	where
		W: FnOnce() + Send + 'static,
	{
		self.go(work, |_, _| {});
	}

	/// Number of units queued here and not yet started.
	pub fn queued(&self) -> usize {
		self.queue.lock().len()
	}
}
