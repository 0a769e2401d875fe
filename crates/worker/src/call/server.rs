use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{Arity, CallClient, CallError, Function, RegisterError, Ret};
use crate::config::RuntimeConfig;
use crate::fault::{contain, log_fault};
use crate::mailbox::{self, MailboxReceiver, MailboxSendError, MailboxSender};

/// Bound on keys accepted by call servers.
pub trait CallKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> CallKey for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

pub(crate) type CallResult<V> = Result<Ret<V>, CallError>;

/// Where a call result goes once the server has produced it.
pub(crate) enum ReturnChannel<V> {
	/// A caller suspended on a synchronous call.
	Sync(oneshot::Sender<CallResult<V>>),
	/// A client's asynchronous return queue, with the callback bound in.
	Async(Box<dyn FnOnce(CallResult<V>) + Send>),
}

impl<V> ReturnChannel<V> {
	pub(crate) fn deliver(self, result: CallResult<V>) {
		match self {
			Self::Sync(tx) => {
				if tx.send(result).is_err() {
					tracing::trace!("call.reply.abandoned");
				}
			}
			Self::Async(deliver) => deliver(result),
		}
	}
}

/// One pending call, consumed exactly once by the owning server.
pub struct CallRequest<K, V> {
	pub(crate) key: K,
	pub(crate) args: Vec<V>,
	pub(crate) reply: Option<ReturnChannel<V>>,
}

impl<K, V> CallRequest<K, V> {
	/// Target function key.
	pub fn key(&self) -> &K {
		&self.key
	}

	/// Returns `true` unless this is a fire-and-forget call.
	pub fn expects_reply(&self) -> bool {
		self.reply.is_some()
	}

	/// Completes the request with a failure without executing it.
	pub(crate) fn fail(self, err: CallError) {
		if let Some(reply) = self.reply {
			reply.deliver(Err(err));
		}
	}
}

impl<K: fmt::Debug, V> fmt::Debug for CallRequest<K, V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CallRequest")
			.field("key", &self.key)
			.field("args", &self.args.len())
			.field("expects_reply", &self.expects_reply())
			.finish()
	}
}

/// Cloneable entry point to a [`CallServer`], usable from any context.
pub struct CallHandle<K, V> {
	signatures: Arc<HashMap<K, Arity>>,
	tx: MailboxSender<CallRequest<K, V>>,
	drops: Arc<AtomicU64>,
	pub(crate) stack_buf_len: usize,
}

impl<K, V> Clone for CallHandle<K, V> {
	fn clone(&self) -> Self {
		Self {
			signatures: Arc::clone(&self.signatures),
			tx: self.tx.clone(),
			drops: Arc::clone(&self.drops),
			stack_buf_len: self.stack_buf_len,
		}
	}
}

impl<K, V> CallHandle<K, V>
where
	K: CallKey,
	V: Send + 'static,
{
	/// Fire-and-forget call. Never suspends.
	///
	/// Unknown keys are ignored. A full mailbox drops the call, a closed one
	/// discards it.
	pub fn go(&self, key: K, args: Vec<V>) {
		if !self.signatures.contains_key(&key) {
			tracing::trace!(key = ?key, "call.go.unregistered");
			return;
		}
		match self.tx.try_send(CallRequest { key, args, reply: None }) {
			Ok(()) => {}
			Err(MailboxSendError::Full(request)) => {
				let count = self.drops.fetch_add(1, Ordering::Relaxed);
				if count % 1024 == 0 {
					tracing::warn!(key = ?request.key, drops = count + 1, "call mailbox full, dropping call");
				}
			}
			Err(MailboxSendError::Closed(_)) => {}
		}
	}

	/// Opens a client bound to this server with an asynchronous queue of `capacity`.
	pub fn open<C: 'static>(&self, capacity: usize) -> CallClient<K, V, C> {
		CallClient::new(self.clone(), capacity)
	}

	/// Synchronous call to a [`Function::NoResult`].
	pub async fn call0(&self, key: K, args: Vec<V>) -> Result<(), CallError> {
		self.call(key, args, Arity::NoResult).await?.into_none()
	}

	/// Synchronous call to a [`Function::Single`].
	pub async fn call1(&self, key: K, args: Vec<V>) -> Result<V, CallError> {
		self.call(key, args, Arity::Single).await?.into_single()
	}

	/// Synchronous call to a [`Function::Multi`].
	pub async fn calln(&self, key: K, args: Vec<V>) -> Result<Vec<V>, CallError> {
		self.call(key, args, Arity::Multi).await?.into_multi()
	}

	/// Returns `true` once the server stopped accepting calls.
	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}

	/// Checks that `key` is registered with the `requested` arity.
	pub(crate) fn lookup(&self, key: &K, requested: Arity) -> Result<(), CallError> {
		let Some(&registered) = self.signatures.get(key) else {
			return Err(CallError::NotRegistered { key: format!("{key:?}") });
		};
		if registered != requested {
			return Err(CallError::ArityMismatch {
				key: format!("{key:?}"),
				registered,
				requested,
			});
		}
		Ok(())
	}

	/// Enqueues with backpressure and waits for the result.
	pub(crate) async fn call(&self, key: K, args: Vec<V>, requested: Arity) -> CallResult<V> {
		self.lookup(&key, requested)?;
		let (tx, rx) = oneshot::channel();
		let request = CallRequest {
			key,
			args,
			reply: Some(ReturnChannel::Sync(tx)),
		};
		if self.tx.send(request).await.is_err() {
			return Err(CallError::ServerClosed);
		}
		rx.await.unwrap_or(Err(CallError::ReplyDropped))
	}

	/// Non-blocking enqueue of a request that carries a return channel.
	///
	/// On failure the request is completed locally through its own channel.
	pub(crate) fn try_submit(&self, request: CallRequest<K, V>) {
		match self.tx.try_send(request) {
			Ok(()) => {}
			Err(MailboxSendError::Full(request)) => request.fail(CallError::ChannelFull),
			Err(MailboxSendError::Closed(request)) => request.fail(CallError::ServerClosed),
		}
	}
}

/// Function table plus bounded mailbox, owned by one execution context.
///
/// Register every function first, then hand out [`CallHandle`]s and clients.
/// The owner drives [`Self::recv`] and [`Self::exec`] (or [`Self::run`]) with
/// exclusive access to its state.
pub struct CallServer<K, V, S> {
	functions: HashMap<K, Function<S, V>>,
	signatures: Arc<HashMap<K, Arity>>,
	tx: MailboxSender<CallRequest<K, V>>,
	rx: MailboxReceiver<CallRequest<K, V>>,
	drops: Arc<AtomicU64>,
	stack_buf_len: usize,
}

impl<K, V, S> CallServer<K, V, S>
where
	K: CallKey,
	V: Send + 'static,
{
	/// Creates a server whose mailbox holds `capacity` pending calls.
	///
	/// # Panics
	///
	/// Panics if `capacity` is zero.
	pub fn new(capacity: usize) -> Self {
		let (tx, rx) = mailbox::channel(capacity);
		Self {
			functions: HashMap::new(),
			signatures: Arc::new(HashMap::new()),
			tx,
			rx,
			drops: Arc::new(AtomicU64::new(0)),
			stack_buf_len: RuntimeConfig::default().stack_buf_len,
		}
	}

	/// Creates a server sized from `config`.
	pub fn with_config(config: &RuntimeConfig) -> Self {
		Self::new(config.call_mailbox_len).stack_buf_len(config.stack_buf_len)
	}

	/// Sets the backtrace capture bound for contained panics.
	#[must_use]
	pub fn stack_buf_len(mut self, len: usize) -> Self {
		self.stack_buf_len = len;
		self
	}

	/// Registers `function` under `key`.
	///
	/// Must complete before any handle or client exists.
	pub fn register(&mut self, key: K, function: Function<S, V>) -> Result<(), RegisterError> {
		let Some(signatures) = Arc::get_mut(&mut self.signatures) else {
			return Err(RegisterError::Sealed { key: format!("{key:?}") });
		};
		match self.functions.entry(key) {
			Entry::Occupied(slot) => Err(RegisterError::AlreadyRegistered {
				key: format!("{:?}", slot.key()),
			}),
			Entry::Vacant(slot) => {
				signatures.insert(slot.key().clone(), function.arity());
				slot.insert(function);
				Ok(())
			}
		}
	}

	/// Returns a cloneable handle. Seals registration while it lives.
	pub fn handle(&self) -> CallHandle<K, V> {
		CallHandle {
			signatures: Arc::clone(&self.signatures),
			tx: self.tx.clone(),
			drops: Arc::clone(&self.drops),
			stack_buf_len: self.stack_buf_len,
		}
	}

	/// Fire-and-forget call; see [`CallHandle::go`].
	pub fn go(&self, key: K, args: Vec<V>) {
		self.handle().go(key, args);
	}

	/// Opens a client bound to this server; see [`CallHandle::open`].
	pub fn open<C: 'static>(&self, capacity: usize) -> CallClient<K, V, C> {
		self.handle().open(capacity)
	}

	/// Receives the next pending call. Returns `None` once closed and drained.
	pub async fn recv(&mut self) -> Option<CallRequest<K, V>> {
		self.rx.recv().await
	}

	/// Executes one call against `state` and delivers its result.
	///
	/// A panicking function is logged and reported to the caller as
	/// [`CallError::Faulted`]; the server stays usable.
	pub fn exec(&mut self, state: &mut S, request: CallRequest<K, V>) {
		let CallRequest { key, args, reply } = request;
		let Some(function) = self.functions.get_mut(&key) else {
			if let Some(reply) = reply {
				reply.deliver(Err(CallError::NotRegistered { key: format!("{key:?}") }));
			}
			return;
		};

		let result = contain(self.stack_buf_len, || function.invoke(state, args)).map_err(|fault| {
			log_fault("call.exec", &fault);
			CallError::Faulted(fault)
		});
		if let Some(reply) = reply {
			reply.deliver(result);
		}
	}

	/// Serves calls until `close` is cancelled, then [closes](Self::close) the server.
	pub async fn run(&mut self, state: &mut S, close: &CancellationToken) {
		loop {
			tokio::select! {
				biased;
				() = close.cancelled() => break,
				Some(request) = self.recv() => self.exec(state, request),
			}
		}
		self.close();
	}

	/// Stops accepting calls and fails every queued one with [`CallError::ServerClosed`].
	///
	/// Fire-and-forget calls are discarded. Returns how many requests were drained.
	pub fn close(&mut self) -> usize {
		self.rx.close();
		let mut drained = 0;
		while let Some(request) = self.rx.try_recv() {
			request.fail(CallError::ServerClosed);
			drained += 1;
		}
		tracing::debug!(drained, "call.server.closed");
		drained
	}

	/// Number of calls waiting in the mailbox.
	pub fn pending(&self) -> usize {
		self.rx.len()
	}
}
