use std::time::Duration;

/// Deadline and decode-retry bound for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokePolicy {
	pub deadline: Duration,
	/// Extra sends allowed after a decode failure; `0` means a single send.
	pub max_retries: u32,
}

impl InvokePolicy {
	pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(12);

	pub const fn new(deadline: Duration) -> Self {
		Self { deadline, max_retries: 0 }
	}

	pub const fn with_retries(self, max_retries: u32) -> Self {
		Self { max_retries, ..self }
	}
}

impl Default for InvokePolicy {
	fn default() -> Self {
		Self::new(Self::DEFAULT_DEADLINE)
	}
}

/// Bounds for the error recovery sub-machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
	/// Consecutive `401` replies tolerated before giving up.
	pub unauthorized_limit: u32,
}

impl Default for RecoveryPolicy {
	fn default() -> Self {
		Self { unauthorized_limit: 3 }
	}
}
