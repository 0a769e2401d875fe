/// Execution classes attached to every spawn for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Owner event loops holding one unit of state.
	Owner,
	/// Blocking or CPU-heavy work offloaded by a task dispatcher.
	Work,
	/// Plumbing that hands finished work back to an owner queue.
	Delivery,
	/// Armed timers waiting for their deadline.
	Timer,
}

impl TaskClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Owner => "owner",
			Self::Work => "work",
			Self::Delivery => "delivery",
			Self::Timer => "timer",
		}
	}
}
