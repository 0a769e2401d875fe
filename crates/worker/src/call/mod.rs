//! Cross-context calls into an owner's function table.
//!
//! A [`CallServer`] owns a table of [`Function`]s and a bounded mailbox of
//! pending [`CallRequest`]s. Other contexts reach it through a cloneable
//! [`CallHandle`] (fire-and-forget or one-shot synchronous calls) or through a
//! [`CallClient`], which adds asynchronous calls whose results come back on the
//! client's own return queue and run as [`Callback`]s against the client's
//! owner state.

mod client;
mod error;
mod function;
mod server;

pub use client::{AsyncCaller, AsyncReturn, CallClient};
pub use error::{CallError, RegisterError};
pub use function::{Arity, Callback, Function, Ret};
pub use server::{CallHandle, CallKey, CallRequest, CallServer};

#[cfg(test)]
mod tests;
