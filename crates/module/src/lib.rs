//! Module lifecycle on top of `keel-worker`.
//!
//! A process is a set of [`Module`]s held in a [`ModuleRegistry`]. Most
//! modules are a [`Skeleton`]: one owner task multiplexing a call server,
//! a task dispatcher, a timer dispatcher and call clients over one state.

pub mod logging;
mod module;
mod registry;
mod skeleton;

pub use module::Module;
pub use registry::{ModuleRegistry, RegistryError};
pub use skeleton::Skeleton;
