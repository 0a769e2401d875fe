//! Panic containment at dispatch boundaries.
//!
//! User functions, offloaded work and callbacks all run behind [`contain`].
//! A panic never unwinds past the primitive that invoked the user code; it is
//! turned into a [`Fault`] value and logged through [`log_fault`].

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe, catch_unwind};
use std::sync::Once;

thread_local! {
	static CAPTURING: Cell<bool> = const { Cell::new(false) };
	static CAPTURED: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Chains a panic hook that records a backtrace at the panic site while the
/// panicking thread is inside a capturing [`contain`].
fn install_capture_hook() {
	static HOOK: Once = Once::new();
	HOOK.call_once(|| {
		let previous = panic::take_hook();
		panic::set_hook(Box::new(move |info| {
			if CAPTURING.with(Cell::get) {
				CAPTURED.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
			}
			previous(info);
		}));
	});
}

/// A panic caught at a dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
	message: String,
	backtrace: Option<String>,
}

impl Fault {
	/// Creates a fault from a plain message, without a backtrace.
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			backtrace: None,
		}
	}

	fn from_panic(payload: &(dyn Any + Send), captured: Option<Backtrace>, stack_buf_len: usize) -> Self {
		let backtrace = (stack_buf_len > 0).then(|| {
			let backtrace = captured.unwrap_or_else(Backtrace::force_capture);
			truncate_at_boundary(backtrace.to_string(), stack_buf_len)
		});
		Self {
			message: panic_message(payload),
			backtrace,
		}
	}

	/// Panic message.
	pub fn message(&self) -> &str {
		&self.message
	}

	/// Captured backtrace, present when stack capture was enabled.
	pub fn backtrace(&self) -> Option<&str> {
		self.backtrace.as_deref()
	}
}

impl fmt::Display for Fault {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.message)
	}
}

impl std::error::Error for Fault {}

/// Runs `f`, converting a panic into a [`Fault`].
///
/// `stack_buf_len` bounds the captured backtrace in bytes; zero disables capture.
/// The backtrace is taken by a panic hook before unwinding, so it includes
/// the panicking frame.
pub fn contain<R>(stack_buf_len: usize, f: impl FnOnce() -> R) -> Result<R, Fault> {
	let capture = stack_buf_len > 0;
	if capture {
		install_capture_hook();
	}
	let outer = CAPTURING.replace(capture);
	let result = catch_unwind(AssertUnwindSafe(f));
	CAPTURING.set(outer);
	result.map_err(|payload| {
		let captured = CAPTURED.take();
		Fault::from_panic(payload.as_ref(), captured, stack_buf_len)
	})
}

/// Logs a contained fault at error level.
pub fn log_fault(site: &'static str, fault: &Fault) {
	match fault.backtrace() {
		Some(backtrace) => tracing::error!(site, panic = %fault.message, %backtrace, "keel.fault"),
		None => tracing::error!(site, panic = %fault.message, "keel.fault"),
	}
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&str>() {
		(*msg).to_string()
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg.clone()
	} else {
		"panic with non-string payload".to_string()
	}
}

fn truncate_at_boundary(mut text: String, max: usize) -> String {
	if text.len() > max {
		let mut end = max;
		while !text.is_char_boundary(end) {
			end -= 1;
		}
		text.truncate(end);
	}
	text
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_static_str_payload() {
		let fault = contain(0, || panic!("boom-str")).unwrap_err();
		assert_eq!(fault.message(), "boom-str");
		assert!(fault.backtrace().is_none());
	}

	#[test]
	fn extracts_string_payload() {
		let fault = contain(0, || panic!("{}", String::from("boom-string"))).unwrap_err();
		assert_eq!(fault.message(), "boom-string");
	}

	#[test]
	fn non_string_payload_gets_placeholder() {
		let fault = contain(0, || std::panic::panic_any(17u32)).unwrap_err();
		assert_eq!(fault.message(), "panic with non-string payload");
	}

	#[test]
	fn backtrace_respects_stack_buf_len() {
		let fault = contain(64, || panic!("with-trace")).unwrap_err();
		let backtrace = fault.backtrace().expect("capture enabled");
		assert!(backtrace.len() <= 64, "backtrace should be truncated, got {} bytes", backtrace.len());
	}

	#[inline(never)]
	fn settle_ledger_entry() -> u32 {
		panic!("ledger entry unbalanced")
	}

	#[test]
	fn backtrace_includes_the_panicking_frame() {
		let fault = contain(1 << 20, settle_ledger_entry).unwrap_err();
		let backtrace = fault.backtrace().expect("capture enabled");
		assert!(backtrace.contains("settle_ledger_entry"), "panic site missing from backtrace:\n{backtrace}");
	}

	#[test]
	fn nested_contain_restores_capture_flag() {
		let outer = contain(1 << 20, || {
			let inner = contain(0, || panic!("inner")).unwrap_err();
			assert!(inner.backtrace().is_none());
			settle_ledger_entry()
		})
		.unwrap_err();
		assert!(outer.backtrace().is_some_and(|bt| bt.contains("settle_ledger_entry")));
	}

	#[test]
	fn passes_through_values() {
		assert_eq!(contain(0, || 5 + 5), Ok(10));
	}

	#[test]
	fn truncation_respects_char_boundaries() {
		assert_eq!(truncate_at_boundary("héllo".to_string(), 2), "h");
		assert_eq!(truncate_at_boundary("abc".to_string(), 8), "abc");
	}
}
