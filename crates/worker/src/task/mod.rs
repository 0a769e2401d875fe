//! Offloading blocking work and collecting its completions on the owner.
//!
//! [`TaskDispatcher::go`] runs a unit of work on the blocking pool and queues
//! its completion callback for the owner, which runs it with [`TaskDispatcher::cb`]
//! against its state. [`LinearContext`] is the ordered variant: work runs one
//! unit at a time and callbacks arrive in submission order.

mod linear;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use linear::LinearContext;

use crate::TaskClass;
use crate::config::RuntimeConfig;
use crate::fault::{Fault, contain, log_fault};
use crate::mailbox::{self, MailboxReceiver, MailboxSender};
use crate::spawn::{spawn, spawn_blocking};

/// Completion of one unit of work, waiting to run on the owner.
pub struct TaskCallback<S> {
	callback: Box<dyn FnOnce(&mut S) + Send>,
}

impl<S: 'static> TaskCallback<S> {
	fn new(callback: impl FnOnce(&mut S) + Send + 'static) -> Self {
		Self {
			callback: Box::new(callback),
		}
	}

	fn noop() -> Self {
		Self::new(|_| {})
	}
}

impl<S> fmt::Debug for TaskCallback<S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TaskCallback").finish_non_exhaustive()
	}
}

/// Runs contained work and binds its outcome into the owner callback.
type Job<S> = Box<dyn FnOnce() -> TaskCallback<S> + Send>;

fn job<S, T, W, F>(stack_buf_len: usize, work: W, callback: F) -> Job<S>
where
	S: 'static,
	T: Send + 'static,
	W: FnOnce() -> T + Send + 'static,
	F: FnOnce(&mut S, Result<T, Fault>) + Send + 'static,
{
	Box::new(move || {
		let result = contain(stack_buf_len, work);
		if let Err(fault) = &result {
			log_fault("task.work", fault);
		}
		TaskCallback::new(move |state| callback(state, result))
	})
}

/// Runs `job` on the blocking pool and hands the callback to the owner queue.
///
/// A job lost to runtime shutdown still delivers an empty callback so the
/// in-flight count can reach zero.
async fn run_job<S: 'static>(job: Job<S>, tx: &MailboxSender<TaskCallback<S>>) {
	let callback = match spawn_blocking(TaskClass::Work, job).await {
		Ok(callback) => callback,
		Err(err) => {
			tracing::error!(error = %err, "task.work.lost");
			TaskCallback::noop()
		}
	};
	if tx.send(callback).await.is_err() {
		tracing::trace!("task.delivery.closed");
	}
}

/// Cloneable submit side of a [`TaskDispatcher`].
///
/// Owner state can hold one so callbacks can submit follow-up work.
pub struct TaskSpawner<S> {
	tx: MailboxSender<TaskCallback<S>>,
	pending: Arc<AtomicUsize>,
	stack_buf_len: usize,
}

impl<S> Clone for TaskSpawner<S> {
	fn clone(&self) -> Self {
		Self {
			tx: self.tx.clone(),
			pending: Arc::clone(&self.pending),
			stack_buf_len: self.stack_buf_len,
		}
	}
}

impl<S: 'static> TaskSpawner<S> {
	/// Runs `work` on the blocking pool, then queues `callback` with its outcome.
	///
	/// The callback is queued even when `work` panics; it then receives the
	/// [`Fault`].
	pub fn go<T, W, F>(&self, work: W, callback: F)
	where
		T: Send + 'static,
		W: FnOnce() -> T + Send + 'static,
		F: FnOnce(&mut S, Result<T, Fault>) + Send + 'static,
	{
		self.pending.fetch_add(1, Ordering::AcqRel);
		let job = job(self.stack_buf_len, work, callback);
		let tx = self.tx.clone();
		spawn(TaskClass::Delivery, async move { run_job(job, &tx).await });
	}

	/// Runs `work` with an empty callback, which is still acknowledged by the owner.
	pub fn spawn<W>(&self, work: W)
	where
		W: FnOnce() + Send + 'static,
	{
		self.go(work, |_, _| {});
	}

	/// Number of work units started but not yet acknowledged.
	pub fn pending(&self) -> usize {
		self.pending.load(Ordering::Acquire)
	}
}

/// Owner side of the task system: the callback queue and its in-flight count.
///
/// Drain with [`Self::close`] before dropping.
pub struct TaskDispatcher<S> {
	spawner: TaskSpawner<S>,
	rx: MailboxReceiver<TaskCallback<S>>,
}

impl<S: 'static> TaskDispatcher<S> {
	/// Creates a dispatcher whose callback queue holds `capacity` completions.
	///
	/// # Panics
	///
	/// Panics if `capacity` is zero.
	pub fn new(capacity: usize) -> Self {
		let (tx, rx) = mailbox::channel(capacity);
		Self {
			spawner: TaskSpawner {
				tx,
				pending: Arc::new(AtomicUsize::new(0)),
				stack_buf_len: RuntimeConfig::default().stack_buf_len,
			},
			rx,
		}
	}

	/// Creates a dispatcher sized from `config`.
	pub fn with_config(config: &RuntimeConfig) -> Self {
		Self::new(config.go_len).stack_buf_len(config.stack_buf_len)
	}

	/// Sets the backtrace capture bound for contained panics.
	#[must_use]
	pub fn stack_buf_len(mut self, len: usize) -> Self {
		self.spawner.stack_buf_len = len;
		self
	}

	/// Returns a cloneable submit handle.
	pub fn spawner(&self) -> TaskSpawner<S> {
		self.spawner.clone()
	}

	/// See [`TaskSpawner::go`].
	pub fn go<T, W, F>(&self, work: W, callback: F)
	where
		T: Send + 'static,
		W: FnOnce() -> T + Send + 'static,
		F: FnOnce(&mut S, Result<T, Fault>) + Send + 'static,
	{
		self.spawner.go(work, callback);
	}

	/// See [`TaskSpawner::spawn`].
	pub fn spawn<W>(&self, work: W)
	where
		W: FnOnce() + Send + 'static,
	{
		self.spawner.spawn(work);
	}

	/// Creates an ordered submission context sharing this dispatcher's queue.
	pub fn linear(&self) -> LinearContext<S> {
		LinearContext::new(self.spawner.clone())
	}

	/// Receives the next completed callback.
	pub async fn recv(&mut self) -> Option<TaskCallback<S>> {
		self.rx.recv().await
	}

	/// Acknowledges one completion and runs its callback against `state`.
	pub fn cb(&self, state: &mut S, callback: TaskCallback<S>) {
		let _ = self
			.spawner
			.pending
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
		if let Err(fault) = contain(self.spawner.stack_buf_len, || (callback.callback)(state)) {
			log_fault("task.callback", &fault);
		}
	}

	/// Runs callbacks until every submitted unit has been acknowledged.
	pub async fn close(&mut self, state: &mut S) {
		while self.spawner.pending() > 0 {
			let Some(callback) = self.rx.recv().await else {
				break;
			};
			self.cb(state, callback);
		}
	}

	/// Returns `true` when no submitted unit awaits acknowledgement.
	pub fn idle(&self) -> bool {
		self.spawner.pending() == 0
	}

	/// Number of work units started but not yet acknowledged.
	pub fn pending(&self) -> usize {
		self.spawner.pending()
	}
}
