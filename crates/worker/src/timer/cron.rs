use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local};
use parking_lot::Mutex;

use super::{CronExpr, Timer, TimerHandle};

/// Source of recurring fire times.
pub trait Schedule: Send + Sync + 'static {
	/// First fire time strictly after `now`, or `None` when the schedule is exhausted.
	fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>>;
}

impl Schedule for CronExpr {
	fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
		self.next(&now)
	}
}

type CronFn<S> = Box<dyn FnMut(&mut S) + Send>;

struct CronInner<S> {
	schedule: Box<dyn Schedule>,
	callback: Mutex<CronFn<S>>,
	armed: Mutex<Option<Timer<S>>>,
	stopped: AtomicBool,
	timers: TimerHandle<S>,
}

/// Recurring timer driven by a [`Schedule`].
///
/// Every firing arms the next occurrence before running the callback, so a
/// panicking callback does not end the schedule. Clones refer to the same
/// schedule.
pub struct Cron<S> {
	inner: Option<Arc<CronInner<S>>>,
}

impl<S> Clone for Cron<S> {
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<S> Cron<S> {
	/// Cancels the armed occurrence. No further occurrence is armed.
	pub fn stop(&self) {
		let Some(inner) = &self.inner else {
			return;
		};
		inner.stopped.store(true, Ordering::Release);
		if let Some(timer) = inner.armed.lock().take() {
			timer.stop();
		}
	}

	/// Returns `true` while an occurrence is armed.
	pub fn is_armed(&self) -> bool {
		self.inner.as_ref().is_some_and(|inner| inner.armed.lock().as_ref().is_some_and(Timer::is_active))
	}
}

impl<S> fmt::Debug for Cron<S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Cron").field("armed", &self.is_armed()).finish()
	}
}

impl<S: 'static> TimerHandle<S> {
	/// Runs `callback` on the owner at every occurrence of `schedule`.
	///
	/// A schedule with no upcoming occurrence yields an inert handle.
	pub fn cron_func(&self, schedule: impl Schedule, callback: impl FnMut(&mut S) + Send + 'static) -> Cron<S> {
		let inner = Arc::new(CronInner {
			schedule: Box::new(schedule),
			callback: Mutex::new(Box::new(callback)),
			armed: Mutex::new(None),
			stopped: AtomicBool::new(false),
			timers: self.clone(),
		});
		if !arm(&inner) {
			tracing::debug!("timer.cron.exhausted");
			return Cron { inner: None };
		}
		Cron { inner: Some(inner) }
	}
}

/// Arms the next occurrence, replacing the current timer.
///
/// `stopped` is checked again under the `armed` lock, so a concurrent
/// [`Cron::stop`] either sees the new timer or prevents it from being armed.
fn arm<S: 'static>(inner: &Arc<CronInner<S>>) -> bool {
	if inner.stopped.load(Ordering::Acquire) {
		return false;
	}
	let now = Local::now();
	let next = inner.schedule.next_after(now);
	let mut armed = inner.armed.lock();
	let Some(next) = next.filter(|_| !inner.stopped.load(Ordering::Acquire)) else {
		armed.take();
		return false;
	};
	let delay = (next - now).to_std().unwrap_or_default();
	let firing = Arc::clone(inner);
	*armed = Some(inner.timers.after_func(delay, move |state| {
		if firing.stopped.load(Ordering::Acquire) {
			return;
		}
		arm(&firing);
		(*firing.callback.lock())(state);
	}));
	true
}
