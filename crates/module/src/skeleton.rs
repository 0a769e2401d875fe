use std::time::Duration;

use async_trait::async_trait;
use futures::future::{self, select_all};
use keel_worker::call::{AsyncReturn, CallKey};
use keel_worker::fault::Fault;
use keel_worker::{
	AsyncCaller, CallClient, CallHandle, CallServer, Cron, Function, LinearContext, RegisterError, RuntimeConfig, Schedule, TaskDispatcher,
	TaskSpawner, Timer, TimerDispatcher, TimerHandle,
};
use tokio_util::sync::CancellationToken;

use crate::Module;

/// Owner loop for one unit of state.
///
/// Serves calls made to its own server, runs task completions, fired timers
/// and asynchronous call results from connected peers, one at a time and
/// always with exclusive access to the state.
pub struct Skeleton<K, V, S> {
	state: S,
	server: CallServer<K, V, S>,
	tasks: TaskDispatcher<S>,
	timers: TimerDispatcher<S>,
	clients: Vec<CallClient<K, V, S>>,
	async_call_len: usize,
}

impl<K, V, S> Skeleton<K, V, S>
where
	K: CallKey,
	V: Send + 'static,
	S: Send + 'static,
{
	/// Creates a skeleton around `state` with queues sized from `config`.
	pub fn new(state: S, config: &RuntimeConfig) -> Self {
		Self {
			state,
			server: CallServer::with_config(config),
			tasks: TaskDispatcher::with_config(config),
			timers: TimerDispatcher::with_config(config),
			clients: Vec::new(),
			async_call_len: config.async_call_len,
		}
	}

	/// Registers a function on this skeleton's call server.
	pub fn register(&mut self, key: K, function: Function<S, V>) -> Result<(), RegisterError> {
		self.server.register(key, function)
	}

	/// Handle through which other contexts call this skeleton.
	pub fn handle(&self) -> CallHandle<K, V> {
		self.server.handle()
	}

	/// Connects a call client to `peer` and returns its asynchronous side.
	///
	/// Results are delivered by this skeleton's loop.
	pub fn connect(&mut self, peer: &CallHandle<K, V>) -> AsyncCaller<K, V, S> {
		let client = peer.open(self.async_call_len);
		let caller = client.caller();
		self.clients.push(client);
		caller
	}

	/// Submit side of the task dispatcher.
	pub fn spawner(&self) -> TaskSpawner<S> {
		self.tasks.spawner()
	}

	/// New ordered task context.
	pub fn linear(&self) -> LinearContext<S> {
		self.tasks.linear()
	}

	/// Arming side of the timer dispatcher.
	pub fn timer_handle(&self) -> TimerHandle<S> {
		self.timers.handle()
	}

	/// Runs `work` off the owner and `callback` back on it.
	pub fn go<T, W, F>(&self, work: W, callback: F)
	where
		T: Send + 'static,
		W: FnOnce() -> T + Send + 'static,
		F: FnOnce(&mut S, Result<T, Fault>) + Send + 'static,
	{
		self.tasks.go(work, callback);
	}

	/// Arms a one-shot timer that runs `callback` on the owner after `delay`.
	pub fn after_func(&self, delay: Duration, callback: impl FnOnce(&mut S) + Send + 'static) -> Timer<S> {
		self.timers.after_func(delay, callback)
	}

	/// Runs `callback` on the owner at every occurrence of `schedule`.
	pub fn cron_func(&self, schedule: impl Schedule, callback: impl FnMut(&mut S) + Send + 'static) -> Cron<S> {
		self.timers.cron_func(schedule, callback)
	}

	/// Owner state.
	pub fn state(&self) -> &S {
		&self.state
	}

	/// Owner state, mutably. Only reachable while the loop is not running.
	pub fn state_mut(&mut self) -> &mut S {
		&mut self.state
	}

	/// Consumes the skeleton and returns its state.
	pub fn into_state(self) -> S {
		self.state
	}

	/// Serves until `close` is cancelled, then drains.
	///
	/// Draining closes the call server, runs task and client callbacks until
	/// nothing is in flight (callbacks may start more work), and finally
	/// closes the timer dispatcher.
	pub async fn run(&mut self, close: CancellationToken) {
		tracing::debug!(clients = self.clients.len(), "skeleton.start");
		loop {
			tokio::select! {
				biased;
				() = close.cancelled() => break,
				Some((ret, index)) = next_return(&mut self.clients) => self.clients[index].cb(&mut self.state, ret),
				Some(request) = self.server.recv() => self.server.exec(&mut self.state, request),
				Some(callback) = self.tasks.recv() => self.tasks.cb(&mut self.state, callback),
				Some(timer) = self.timers.recv() => timer.cb(&mut self.state),
			}
		}
		self.drain().await;
	}

	async fn drain(&mut self) {
		let refused = self.server.close();
		loop {
			self.tasks.close(&mut self.state).await;
			for client in &mut self.clients {
				client.close(&mut self.state).await;
			}
			if self.tasks.idle() && self.clients.iter().all(CallClient::idle) {
				break;
			}
		}
		let discarded = self.timers.close();
		tracing::debug!(refused, discarded, "skeleton.closed");
	}
}

/// Next asynchronous result from any client, tagged with the client index.
async fn next_return<K, V, S>(clients: &mut [CallClient<K, V, S>]) -> Option<(AsyncReturn<V, S>, usize)>
where
	K: CallKey,
	V: Send + 'static,
	S: 'static,
{
	if clients.is_empty() {
		return future::pending().await;
	}
	let (ret, index, _) = select_all(clients.iter_mut().map(|client| Box::pin(client.recv()))).await;
	ret.map(|ret| (ret, index))
}

#[async_trait]
impl<K, V, S> Module for Skeleton<K, V, S>
where
	K: CallKey,
	V: Send + 'static,
	S: Send + 'static,
{
	async fn run(&mut self, close: CancellationToken) {
		Skeleton::run(self, close).await;
	}
}
