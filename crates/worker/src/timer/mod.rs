//! One-shot and recurring timers delivered to an owner.
//!
//! An armed [`Timer`] sleeps on its own task. When it fires the timer is
//! pushed onto the dispatcher queue, and the owner runs it with
//! [`Timer::cb`] against its state. [`Cron`] re-arms a timer from a
//! [`Schedule`] after every firing.

mod cron;
mod expr;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub use cron::{Cron, Schedule};
pub use expr::{CronExpr, CronExprError, FieldError};

use crate::TaskClass;
use crate::config::RuntimeConfig;
use crate::fault::{contain, log_fault};
use crate::mailbox::{self, MailboxReceiver, MailboxSender};
use crate::spawn::spawn;

type TimerFn<S> = Box<dyn FnOnce(&mut S) + Send>;

struct TimerInner<S> {
	callback: Mutex<Option<TimerFn<S>>>,
	cancel: CancellationToken,
	stack_buf_len: usize,
}

/// Handle to one armed callback.
///
/// Clones refer to the same timer.
pub struct Timer<S> {
	inner: Arc<TimerInner<S>>,
}

impl<S> Clone for Timer<S> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<S> Timer<S> {
	/// Cancels the pending firing and clears the callback.
	///
	/// A timer that already fired but has not been run by its owner becomes
	/// a no-op.
	pub fn stop(&self) {
		self.inner.cancel.cancel();
		self.clear();
	}

	/// Runs the callback once against `state`, then clears it.
	///
	/// A panicking callback is logged and swallowed.
	pub fn cb(&self, state: &mut S) {
		let Some(callback) = self.inner.callback.lock().take() else {
			return;
		};
		if let Err(fault) = contain(self.inner.stack_buf_len, || callback(state)) {
			log_fault("timer.callback", &fault);
		}
	}

	/// Returns `true` while the callback has neither run nor been stopped.
	pub fn is_active(&self) -> bool {
		self.inner.callback.lock().is_some()
	}

	fn clear(&self) {
		self.inner.callback.lock().take();
	}
}

impl<S> fmt::Debug for Timer<S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Timer").field("active", &self.is_active()).finish()
	}
}

/// Cloneable arming side of a [`TimerDispatcher`].
pub struct TimerHandle<S> {
	tx: MailboxSender<Timer<S>>,
	cancel: CancellationToken,
	stack_buf_len: usize,
}

impl<S> Clone for TimerHandle<S> {
	fn clone(&self) -> Self {
		Self {
			tx: self.tx.clone(),
			cancel: self.cancel.clone(),
			stack_buf_len: self.stack_buf_len,
		}
	}
}

impl<S: 'static> TimerHandle<S> {
	/// Arms `callback` to be queued for the owner after `delay`.
	pub fn after_func(&self, delay: Duration, callback: impl FnOnce(&mut S) + Send + 'static) -> Timer<S> {
		let timer = Timer {
			inner: Arc::new(TimerInner {
				callback: Mutex::new(Some(Box::new(callback))),
				cancel: self.cancel.child_token(),
				stack_buf_len: self.stack_buf_len,
			}),
		};

		let fired = timer.clone();
		let tx = self.tx.clone();
		spawn(TaskClass::Timer, async move {
			let cancel = fired.inner.cancel.clone();
			tokio::select! {
				() = cancel.cancelled() => fired.clear(),
				() = tokio::time::sleep(delay) => {
					if let Err(err) = tx.send(fired).await {
						tracing::trace!("timer.delivery.closed");
						err.into_inner().clear();
					}
				}
			}
		});
		timer
	}

	/// Returns `true` once the dispatcher has been closed.
	pub fn is_closed(&self) -> bool {
		self.cancel.is_cancelled()
	}
}

/// Owner side of the timer system: the queue of fired timers.
pub struct TimerDispatcher<S> {
	handle: TimerHandle<S>,
	rx: MailboxReceiver<Timer<S>>,
}

impl<S: 'static> TimerDispatcher<S> {
	/// Creates a dispatcher whose queue holds `capacity` fired timers.
	///
	/// # Panics
	///
	/// Panics if `capacity` is zero.
	pub fn new(capacity: usize) -> Self {
		let (tx, rx) = mailbox::channel(capacity);
		Self {
			handle: TimerHandle {
				tx,
				cancel: CancellationToken::new(),
				stack_buf_len: RuntimeConfig::default().stack_buf_len,
			},
			rx,
		}
	}

	/// Creates a dispatcher sized from `config`.
	pub fn with_config(config: &RuntimeConfig) -> Self {
		Self::new(config.timer_dispatcher_len).stack_buf_len(config.stack_buf_len)
	}

	/// Sets the backtrace capture bound for contained panics.
	#[must_use]
	pub fn stack_buf_len(mut self, len: usize) -> Self {
		self.handle.stack_buf_len = len;
		self
	}

	/// Returns a cloneable arming handle.
	pub fn handle(&self) -> TimerHandle<S> {
		self.handle.clone()
	}

	/// See [`TimerHandle::after_func`].
	pub fn after_func(&self, delay: Duration, callback: impl FnOnce(&mut S) + Send + 'static) -> Timer<S> {
		self.handle.after_func(delay, callback)
	}

	/// See [`TimerHandle::cron_func`].
	pub fn cron_func(&self, schedule: impl Schedule, callback: impl FnMut(&mut S) + Send + 'static) -> Cron<S> {
		self.handle.cron_func(schedule, callback)
	}

	/// Receives the next fired timer.
	pub async fn recv(&mut self) -> Option<Timer<S>> {
		self.rx.recv().await
	}

	/// Number of fired timers waiting for the owner.
	pub fn len(&self) -> usize {
		self.rx.len()
	}

	/// Returns `true` when no fired timer is waiting.
	pub fn is_empty(&self) -> bool {
		self.rx.is_empty()
	}

	/// Cancels every armed timer and discards fired ones not yet run.
	///
	/// Returns how many fired timers were discarded.
	pub fn close(&mut self) -> usize {
		self.handle.cancel.cancel();
		self.rx.close();
		let mut discarded = 0;
		while let Some(timer) = self.rx.try_recv() {
			timer.clear();
			discarded += 1;
		}
		tracing::debug!(discarded, "timer.dispatcher.closed");
		discarded
	}
}

#[cfg(test)]
mod tests;
