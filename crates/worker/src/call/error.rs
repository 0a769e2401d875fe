use thiserror::Error;

use super::Arity;
use crate::fault::Fault;

/// Failure of one call, delivered in place of a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
	/// No function is registered under the key.
	#[error("function id {key}: function not registered")]
	NotRegistered {
		/// Debug rendering of the key.
		key: String,
	},
	/// The call form does not match the registered function's arity.
	#[error("function id {key}: return type mismatch (registered {registered}, called as {requested})")]
	ArityMismatch {
		/// Debug rendering of the key.
		key: String,
		/// Arity the function was registered with.
		registered: Arity,
		/// Arity the caller asked for.
		requested: Arity,
	},
	/// The server mailbox was full for a non-blocking enqueue.
	#[error("call mailbox full")]
	ChannelFull,
	/// The client's in-flight asynchronous calls reached its queue capacity.
	#[error("too many calls")]
	TooManyCalls,
	/// The server stopped accepting calls before this one was executed.
	#[error("call server closed")]
	ServerClosed,
	/// The function panicked while executing.
	#[error("{0}")]
	Faulted(Fault),
	/// The request was dropped without a result, e.g. the server went away.
	#[error("call dropped before a result was delivered")]
	ReplyDropped,
	/// A result did not have the shape the callback expected.
	#[error("result shaped as {found}, expected {expected}")]
	ReturnShape {
		/// Shape the receiver expected.
		expected: Arity,
		/// Shape that arrived.
		found: Arity,
	},
}

/// Configuration fault raised while registering functions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
	/// The key already has a function.
	#[error("function id {key}: already registered")]
	AlreadyRegistered {
		/// Debug rendering of the key.
		key: String,
	},
	/// Handles or clients were already handed out; the table is frozen.
	#[error("function id {key}: registered after dispatch began")]
	Sealed {
		/// Debug rendering of the key.
		key: String,
	},
}
