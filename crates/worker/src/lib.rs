//! Single-owner execution primitives.
//!
//! Each unit of state is owned by one task and never shared. Other tasks
//! reach it only through bounded mailboxes:
//!
//! * [`call`]: a function table served by the owner, with synchronous,
//!   asynchronous and fire-and-forget calls.
//! * [`task`]: blocking work offloaded to the pool, completed by callbacks
//!   run back on the owner, optionally in submission order.
//! * [`timer`]: one-shot and cron timers whose callbacks run on the owner.
//!
//! User code runs behind [`fault::contain`]; a panic becomes a logged
//! [`Fault`] instead of unwinding through the owner.

pub mod call;
mod class;
pub mod config;
pub mod fault;
pub mod mailbox;
mod spawn;
pub mod task;
pub mod timer;

pub use call::{AsyncCaller, AsyncReturn, CallClient, CallError, CallHandle, CallServer, Callback, Function, RegisterError};
pub use class::TaskClass;
pub use config::{ConfigError, RuntimeConfig};
pub use fault::Fault;
pub use spawn::{spawn, spawn_blocking};
pub use task::{LinearContext, TaskDispatcher, TaskSpawner};
pub use timer::{Cron, CronExpr, Schedule, Timer, TimerDispatcher, TimerHandle};
