use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::server::{CallKey, CallRequest, CallResult, ReturnChannel};
use super::{Arity, CallError, CallHandle, Callback};
use crate::fault::{contain, log_fault};
use crate::mailbox::{self, MailboxReceiver, MailboxSender};

/// A finished asynchronous call waiting in a client's return queue.
pub struct AsyncReturn<V, C> {
	result: CallResult<V>,
	callback: Callback<C, V>,
}

impl<V, C> AsyncReturn<V, C> {
	/// Returns `true` if the call failed.
	pub fn is_err(&self) -> bool {
		self.result.is_err()
	}

	/// Failure carried by this result, if any.
	pub fn error(&self) -> Option<&CallError> {
		self.result.as_ref().err()
	}
}

impl<V, C> fmt::Debug for AsyncReturn<V, C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AsyncReturn")
			.field("error", &self.error())
			.field("callback", &self.callback)
			.finish()
	}
}

/// Cloneable asynchronous-call side of a [`CallClient`].
///
/// Owner state can keep one of these so that code running inside a callback
/// can issue further asynchronous calls. All clones share the client's
/// in-flight counter and return queue; results are still consumed by the
/// client's owner.
pub struct AsyncCaller<K, V, C> {
	server: CallHandle<K, V>,
	tx: MailboxSender<AsyncReturn<V, C>>,
	pending: Arc<AtomicUsize>,
	capacity: usize,
}

impl<K, V, C> Clone for AsyncCaller<K, V, C> {
	fn clone(&self) -> Self {
		Self {
			server: self.server.clone(),
			tx: self.tx.clone(),
			pending: Arc::clone(&self.pending),
			capacity: self.capacity,
		}
	}
}

impl<K, V, C> AsyncCaller<K, V, C>
where
	K: CallKey,
	V: Send + 'static,
	C: 'static,
{
	/// Issues an asynchronous call whose result is delivered to `callback`.
	///
	/// When the in-flight count already equals the queue capacity the call is
	/// rejected on the spot: `callback` runs synchronously against `state` with
	/// [`CallError::TooManyCalls`] and the server is never contacted. Lookup
	/// failures and a full or closed mailbox are reported through the return
	/// queue like any other result.
	pub fn asyn_call(&self, state: &mut C, key: K, args: Vec<V>, callback: Callback<C, V>) {
		let admitted = self
			.pending
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.capacity).then_some(n + 1))
			.is_ok();
		if !admitted {
			tracing::debug!(key = ?key, capacity = self.capacity, "call.async.rejected");
			exec_callback(self.server.stack_buf_len, state, callback, Err(CallError::TooManyCalls));
			return;
		}

		let requested = callback.arity();
		let tx = self.tx.clone();
		let reply = ReturnChannel::Async(Box::new(move |result| {
			if tx.try_send(AsyncReturn { result, callback }).is_err() {
				tracing::trace!("call.async.client_gone");
			}
		}));
		let request = CallRequest {
			key,
			args,
			reply: Some(reply),
		};
		match self.server.lookup(&request.key, requested) {
			Ok(()) => self.server.try_submit(request),
			Err(err) => request.fail(err),
		}
	}

	/// Number of asynchronous calls issued but not yet acknowledged.
	pub fn pending(&self) -> usize {
		self.pending.load(Ordering::Acquire)
	}
}

/// Per-context call client bound to one [`CallServer`](super::CallServer).
///
/// Synchronous calls suspend the caller until the server replies; `&mut self`
/// keeps at most one of them outstanding. Asynchronous results land in a
/// bounded return queue that the owner drains through [`Self::recv`] and
/// [`Self::cb`]. The queue must be drained with [`Self::close`] before the
/// client is dropped.
pub struct CallClient<K, V, C> {
	caller: AsyncCaller<K, V, C>,
	rx: MailboxReceiver<AsyncReturn<V, C>>,
}

impl<K, V, C> CallClient<K, V, C>
where
	K: CallKey,
	V: Send + 'static,
	C: 'static,
{
	pub(crate) fn new(server: CallHandle<K, V>, capacity: usize) -> Self {
		// A zero-capacity client rejects every asynchronous call but the
		// mailbox itself needs room for one slot.
		let (tx, rx) = mailbox::channel(capacity.max(1));
		Self {
			caller: AsyncCaller {
				server,
				tx,
				pending: Arc::new(AtomicUsize::new(0)),
				capacity,
			},
			rx,
		}
	}

	/// Synchronous call to a [`Function::NoResult`](super::Function::NoResult).
	pub async fn call0(&mut self, key: K, args: Vec<V>) -> Result<(), CallError> {
		self.caller.server.call(key, args, Arity::NoResult).await?.into_none()
	}

	/// Synchronous call to a [`Function::Single`](super::Function::Single).
	pub async fn call1(&mut self, key: K, args: Vec<V>) -> Result<V, CallError> {
		self.caller.server.call(key, args, Arity::Single).await?.into_single()
	}

	/// Synchronous call to a [`Function::Multi`](super::Function::Multi).
	pub async fn calln(&mut self, key: K, args: Vec<V>) -> Result<Vec<V>, CallError> {
		self.caller.server.call(key, args, Arity::Multi).await?.into_multi()
	}

	/// Asynchronous call; see [`AsyncCaller::asyn_call`].
	pub fn asyn_call(&self, state: &mut C, key: K, args: Vec<V>, callback: Callback<C, V>) {
		self.caller.asyn_call(state, key, args, callback);
	}

	/// Returns a cloneable asynchronous-call handle sharing this client's queue.
	pub fn caller(&self) -> AsyncCaller<K, V, C> {
		self.caller.clone()
	}

	/// Receives the next finished asynchronous call.
	pub async fn recv(&mut self) -> Option<AsyncReturn<V, C>> {
		self.rx.recv().await
	}

	/// Acknowledges one finished call and runs its callback against `state`.
	pub fn cb(&self, state: &mut C, ret: AsyncReturn<V, C>) {
		let _ = self.caller.pending.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
		exec_callback(self.caller.server.stack_buf_len, state, ret.callback, ret.result);
	}

	/// Drains the return queue until no asynchronous call is in flight.
	pub async fn close(&mut self, state: &mut C) {
		while self.caller.pending() > 0 {
			let Some(ret) = self.rx.recv().await else {
				break;
			};
			self.cb(state, ret);
		}
	}

	/// Returns `true` when no asynchronous call is in flight.
	pub fn idle(&self) -> bool {
		self.caller.pending() == 0
	}

	/// Number of asynchronous calls issued but not yet acknowledged.
	pub fn pending(&self) -> usize {
		self.caller.pending()
	}

	/// Asynchronous queue capacity, which is also the in-flight limit.
	pub fn capacity(&self) -> usize {
		self.caller.capacity
	}
}

fn exec_callback<C, V>(stack_buf_len: usize, state: &mut C, callback: Callback<C, V>, result: CallResult<V>) {
	if let Err(fault) = contain(stack_buf_len, || callback.invoke(state, result)) {
		log_fault("call.callback", &fault);
	}
}
