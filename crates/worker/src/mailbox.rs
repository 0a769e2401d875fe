use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

/// Mailbox send error. The rejected message is handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailboxSendError<T> {
	/// Queue is at capacity and a non-blocking send was used.
	#[error("mailbox full")]
	Full(T),
	/// Mailbox is closed.
	#[error("mailbox closed")]
	Closed(T),
}

impl<T> MailboxSendError<T> {
	/// Returns the message that could not be enqueued.
	pub fn into_inner(self) -> T {
		match self {
			Self::Full(msg) | Self::Closed(msg) => msg,
		}
	}

	/// Returns `true` for [`MailboxSendError::Full`].
	pub fn is_full(&self) -> bool {
		matches!(self, Self::Full(_))
	}
}

struct MailboxState<T> {
	queue: VecDeque<T>,
	closed: bool,
}

struct MailboxInner<T> {
	capacity: usize,
	state: Mutex<MailboxState<T>>,
	notify_recv: Notify,
	notify_send: Notify,
}

/// Multi-producer mailbox sender.
pub struct MailboxSender<T> {
	inner: Arc<MailboxInner<T>>,
}

/// Single-consumer mailbox receiver, held by the owning context.
///
/// Dropping the receiver closes the mailbox so that senders waiting on
/// backpressure fail instead of parking forever.
pub struct MailboxReceiver<T> {
	inner: Arc<MailboxInner<T>>,
}

impl<T> Clone for MailboxSender<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

/// Creates a bounded FIFO mailbox.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn channel<T>(capacity: usize) -> (MailboxSender<T>, MailboxReceiver<T>) {
	assert!(capacity > 0, "mailbox capacity must be > 0");
	let inner = Arc::new(MailboxInner {
		capacity,
		state: Mutex::new(MailboxState {
			queue: VecDeque::with_capacity(capacity.min(1024)),
			closed: false,
		}),
		notify_recv: Notify::new(),
		notify_send: Notify::new(),
	});
	(
		MailboxSender {
			inner: Arc::clone(&inner),
		},
		MailboxReceiver { inner },
	)
}

impl<T> MailboxInner<T> {
	fn close(&self) {
		self.state.lock().closed = true;
		self.notify_recv.notify_waiters();
		self.notify_send.notify_waiters();
	}
}

impl<T> MailboxSender<T> {
	/// Non-blocking enqueue. Never suspends, safe to call from any context.
	pub fn try_send(&self, msg: T) -> Result<(), MailboxSendError<T>> {
		let mut state = self.inner.state.lock();
		if state.closed {
			return Err(MailboxSendError::Closed(msg));
		}
		if state.queue.len() >= self.inner.capacity {
			return Err(MailboxSendError::Full(msg));
		}
		state.queue.push_back(msg);
		drop(state);
		self.inner.notify_recv.notify_one();
		Ok(())
	}

	/// Enqueue, waiting for capacity when full.
	///
	/// Only fails once the mailbox is closed, including when it closes while
	/// this sender is parked.
	pub async fn send(&self, msg: T) -> Result<(), MailboxSendError<T>> {
		loop {
			// Register before checking capacity so a pop between the check and
			// the await still wakes us.
			let notified = self.inner.notify_send.notified();
			{
				let mut state = self.inner.state.lock();
				if state.closed {
					return Err(MailboxSendError::Closed(msg));
				}
				if state.queue.len() < self.inner.capacity {
					state.queue.push_back(msg);
					drop(state);
					self.inner.notify_recv.notify_one();
					return Ok(());
				}
			}
			notified.await;
		}
	}

	/// Stops admission. Queued messages stay available to the receiver.
	pub fn close(&self) {
		self.inner.close();
	}

	/// Returns `true` once the mailbox no longer admits messages.
	pub fn is_closed(&self) -> bool {
		self.inner.state.lock().closed
	}

	/// Returns current queue length.
	pub fn len(&self) -> usize {
		self.inner.state.lock().queue.len()
	}

	/// Returns `true` when nothing is queued.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns queue capacity.
	pub fn capacity(&self) -> usize {
		self.inner.capacity
	}
}

impl<T> MailboxReceiver<T> {
	/// Receives one message. Returns `None` once the mailbox is closed and drained.
	pub async fn recv(&self) -> Option<T> {
		loop {
			let notified = self.inner.notify_recv.notified();
			{
				let mut state = self.inner.state.lock();
				if let Some(msg) = state.queue.pop_front() {
					drop(state);
					self.inner.notify_send.notify_one();
					return Some(msg);
				}
				if state.closed {
					return None;
				}
			}
			notified.await;
		}
	}

	/// Takes one queued message without waiting.
	pub fn try_recv(&self) -> Option<T> {
		let msg = self.inner.state.lock().queue.pop_front();
		if msg.is_some() {
			self.inner.notify_send.notify_one();
		}
		msg
	}

	/// Stops admission. Queued messages stay available to [`Self::try_recv`].
	pub fn close(&self) {
		self.inner.close();
	}

	/// Returns current queue length.
	pub fn len(&self) -> usize {
		self.inner.state.lock().queue.len()
	}

	/// Returns `true` when nothing is queued.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns queue capacity.
	pub fn capacity(&self) -> usize {
		self.inner.capacity
	}
}

impl<T> Drop for MailboxReceiver<T> {
	fn drop(&mut self) {
		self.inner.close();
	}
}
