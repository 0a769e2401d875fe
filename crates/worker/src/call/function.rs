use std::fmt;

use super::CallError;

/// Declared result shape of a registered function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arity {
	/// Returns nothing.
	NoResult,
	/// Returns one value.
	Single,
	/// Returns a list of values.
	Multi,
}

impl Arity {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::NoResult => "no-result",
			Self::Single => "single",
			Self::Multi => "multi",
		}
	}
}

impl fmt::Display for Arity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

type NoResultFn<S, V> = dyn FnMut(&mut S, Vec<V>) + Send;
type SingleFn<S, V> = dyn FnMut(&mut S, Vec<V>) -> V + Send;
type MultiFn<S, V> = dyn FnMut(&mut S, Vec<V>) -> Vec<V> + Send;

/// A callable registered on a call server.
///
/// Functions run on the server's owning context with exclusive access to its
/// state `S`.
pub enum Function<S, V> {
	/// `fn(&mut S, args)`.
	NoResult(Box<NoResultFn<S, V>>),
	/// `fn(&mut S, args) -> V`.
	Single(Box<SingleFn<S, V>>),
	/// `fn(&mut S, args) -> Vec<V>`.
	Multi(Box<MultiFn<S, V>>),
}

impl<S, V> Function<S, V> {
	/// Wraps a function that returns nothing.
	pub fn no_result(f: impl FnMut(&mut S, Vec<V>) + Send + 'static) -> Self {
		Self::NoResult(Box::new(f))
	}

	/// Wraps a function that returns one value.
	pub fn single(f: impl FnMut(&mut S, Vec<V>) -> V + Send + 'static) -> Self {
		Self::Single(Box::new(f))
	}

	/// Wraps a function that returns a list of values.
	pub fn multi(f: impl FnMut(&mut S, Vec<V>) -> Vec<V> + Send + 'static) -> Self {
		Self::Multi(Box::new(f))
	}

	/// Declared arity.
	pub fn arity(&self) -> Arity {
		match self {
			Self::NoResult(_) => Arity::NoResult,
			Self::Single(_) => Arity::Single,
			Self::Multi(_) => Arity::Multi,
		}
	}

	pub(crate) fn invoke(&mut self, state: &mut S, args: Vec<V>) -> Ret<V> {
		match self {
			Self::NoResult(f) => {
				f(state, args);
				Ret::None
			}
			Self::Single(f) => Ret::Single(f(state, args)),
			Self::Multi(f) => Ret::Multi(f(state, args)),
		}
	}
}

impl<S, V> fmt::Debug for Function<S, V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Function").field(&self.arity()).finish()
	}
}

/// Value produced by executing a [`Function`], shaped by its arity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ret<V> {
	/// Result of a [`Function::NoResult`].
	None,
	/// Result of a [`Function::Single`].
	Single(V),
	/// Result of a [`Function::Multi`].
	Multi(Vec<V>),
}

impl<V> Ret<V> {
	/// Shape of this result.
	pub fn arity(&self) -> Arity {
		match self {
			Self::None => Arity::NoResult,
			Self::Single(_) => Arity::Single,
			Self::Multi(_) => Arity::Multi,
		}
	}

	pub(crate) fn into_none(self) -> Result<(), CallError> {
		match self {
			Self::None => Ok(()),
			other => Err(shape_error(Arity::NoResult, other.arity())),
		}
	}

	pub(crate) fn into_single(self) -> Result<V, CallError> {
		match self {
			Self::Single(value) => Ok(value),
			other => Err(shape_error(Arity::Single, other.arity())),
		}
	}

	pub(crate) fn into_multi(self) -> Result<Vec<V>, CallError> {
		match self {
			Self::Multi(values) => Ok(values),
			other => Err(shape_error(Arity::Multi, other.arity())),
		}
	}
}

fn shape_error(expected: Arity, found: Arity) -> CallError {
	CallError::ReturnShape { expected, found }
}

type NoResultCb<C> = dyn FnOnce(&mut C, Result<(), CallError>) + Send;
type SingleCb<C, V> = dyn FnOnce(&mut C, Result<V, CallError>) + Send;
type MultiCb<C, V> = dyn FnOnce(&mut C, Result<Vec<V>, CallError>) + Send;

/// Completion callback for an asynchronous call.
///
/// Runs on the client's owning context with its state `C`. The variant must
/// match the arity of the called function.
pub enum Callback<C, V> {
	/// Completion of a [`Function::NoResult`] call.
	NoResult(Box<NoResultCb<C>>),
	/// Completion of a [`Function::Single`] call.
	Single(Box<SingleCb<C, V>>),
	/// Completion of a [`Function::Multi`] call.
	Multi(Box<MultiCb<C, V>>),
}

impl<C, V> Callback<C, V> {
	/// Wraps a completion for a function that returns nothing.
	pub fn no_result(f: impl FnOnce(&mut C, Result<(), CallError>) + Send + 'static) -> Self {
		Self::NoResult(Box::new(f))
	}

	/// Wraps a completion for a function that returns one value.
	pub fn single(f: impl FnOnce(&mut C, Result<V, CallError>) + Send + 'static) -> Self {
		Self::Single(Box::new(f))
	}

	/// Wraps a completion for a function that returns a list of values.
	pub fn multi(f: impl FnOnce(&mut C, Result<Vec<V>, CallError>) + Send + 'static) -> Self {
		Self::Multi(Box::new(f))
	}

	/// Arity this callback accepts.
	pub fn arity(&self) -> Arity {
		match self {
			Self::NoResult(_) => Arity::NoResult,
			Self::Single(_) => Arity::Single,
			Self::Multi(_) => Arity::Multi,
		}
	}

	pub(crate) fn invoke(self, state: &mut C, result: Result<Ret<V>, CallError>) {
		match self {
			Self::NoResult(cb) => cb(state, result.and_then(Ret::into_none)),
			Self::Single(cb) => cb(state, result.and_then(Ret::into_single)),
			Self::Multi(cb) => cb(state, result.and_then(Ret::into_multi)),
		}
	}
}

impl<C, V> fmt::Debug for Callback<C, V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Callback").field(&self.arity()).finish()
	}
}
