use std::time::Duration;

use rps_protocol::ServerIdentity;
use rps_runtime::{InvokePolicy, RecoveryPolicy};

/// Tunables shared by the dispatcher and every workflow.
#[derive(Debug, Clone)]
pub struct EngineSettings {
	pub identity: ServerIdentity,
	/// Deadline for each exchange with a device.
	pub invoke_deadline: Duration,
	pub enterprise_assistant_deadline: Duration,
	/// Pause between updating the remote and the local TLS settings.
	pub tls_settle: Duration,
	/// Decode retries granted to enumerations.
	pub decode_retries: u32,
	pub unauthorized_limit: u32,
	/// Bound on re-entered steps within one workflow run.
	pub step_retries: u32,
	/// Oldest supported firmware, `major.minor.revision`.
	pub min_firmware: String,
}

impl EngineSettings {
	pub fn invoke_policy(&self) -> InvokePolicy {
		InvokePolicy::new(self.invoke_deadline)
	}

	pub fn enumeration_policy(&self) -> InvokePolicy {
		self.invoke_policy().with_retries(self.decode_retries)
	}

	pub fn recovery_policy(&self) -> RecoveryPolicy {
		RecoveryPolicy {
			unauthorized_limit: self.unauthorized_limit,
		}
	}
}

impl Default for EngineSettings {
	fn default() -> Self {
		Self {
			identity: ServerIdentity::default(),
			invoke_deadline: InvokePolicy::DEFAULT_DEADLINE,
			enterprise_assistant_deadline: Duration::from_secs(30),
			tls_settle: Duration::from_secs(5),
			decode_retries: 2,
			unauthorized_limit: RecoveryPolicy::default().unauthorized_limit,
			step_retries: 3,
			min_firmware: "7.0.0".into(),
		}
	}
}
