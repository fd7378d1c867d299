//! Maintenance of an activated device.
//!
//! A single entry point selects the task by name. Unknown names and
//! malformed arguments are rejected before anything is sent to the device.

pub mod change_password;
pub mod hostname_sync;
pub mod ip_sync;
pub mod time_sync;

use serde_json::Value;

pub use change_password::ChangePassword;
pub use hostname_sync::HostnameSync;
pub use ip_sync::{IpConfiguration, IpSync};
pub use time_sync::TimeSync;

use crate::device::DeviceInfo;
use crate::error::{Error, Result};
use crate::password;
use crate::workflow::{Context, execute};

pub const SYNC_CLOCK: &str = "syncclock";
pub const SYNC_IP: &str = "syncip";
pub const SYNC_HOSTNAME: &str = "synchostname";
pub const CHANGE_PASSWORD: &str = "changepassword";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceTask {
	SyncClock,
	SyncIp(IpConfiguration),
	SyncHostname { hostname: String, dns_suffix: Option<String> },
	ChangePassword(Option<String>),
}

impl MaintenanceTask {
	/// Resolves a task name and its argument.
	pub fn parse(client_id: &str, device: &DeviceInfo, task: &str, arg: Option<&Value>) -> Result<Self> {
		match task.to_ascii_lowercase().as_str() {
			SYNC_CLOCK => Ok(MaintenanceTask::SyncClock),
			SYNC_IP => {
				let arg = arg.ok_or_else(|| Error::validation(format!("device {client_id}: {SYNC_IP} requires the desired IP configuration")))?;
				let desired: IpConfiguration = serde_json::from_value(arg.clone())
					.map_err(|e| Error::validation(format!("device {client_id}: invalid {SYNC_IP} argument: {e}")))?;
				Ok(MaintenanceTask::SyncIp(desired))
			}
			SYNC_HOSTNAME => {
				let hostname = arg
					.and_then(|a| a.get("hostname"))
					.and_then(Value::as_str)
					.map(str::to_string)
					.or_else(|| device.hostname.clone())
					.ok_or_else(|| Error::validation(format!("device {client_id}: {SYNC_HOSTNAME} requires a hostname")))?;
				let dns_suffix = arg
					.and_then(|a| a.get("dnsSuffix"))
					.and_then(Value::as_str)
					.map(str::to_string)
					.or_else(|| device.dns_suffix().map(str::to_string));
				Ok(MaintenanceTask::SyncHostname { hostname, dns_suffix })
			}
			CHANGE_PASSWORD => {
				let requested = match arg {
					Some(Value::String(p)) => Some(p.clone()),
					Some(other) => other.get("password").and_then(Value::as_str).map(str::to_string),
					None => None,
				}
				.filter(|p| !p.is_empty());
				if requested.as_deref().is_some_and(|p| !password::is_compliant(p)) {
					return Err(Error::validation(format!("device {client_id}: requested password does not meet the engine's rules")));
				}
				Ok(MaintenanceTask::ChangePassword(requested))
			}
			_ => Err(Error::UnknownTask {
				client_id: client_id.to_string(),
				task: task.to_string(),
			}),
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			MaintenanceTask::SyncClock => SYNC_CLOCK,
			MaintenanceTask::SyncIp(_) => SYNC_IP,
			MaintenanceTask::SyncHostname { .. } => SYNC_HOSTNAME,
			MaintenanceTask::ChangePassword(_) => CHANGE_PASSWORD,
		}
	}
}

/// Runs `task` as a top-level workflow.
pub async fn run_task(task: MaintenanceTask, device: DeviceInfo, cx: Context) -> std::result::Result<(), String> {
	match task {
		MaintenanceTask::SyncClock => execute(TimeSync::new(), cx).await,
		MaintenanceTask::SyncIp(desired) => execute(IpSync::new(desired), cx).await,
		MaintenanceTask::SyncHostname { hostname, dns_suffix } => execute(HostnameSync::new(device, hostname, dns_suffix), cx).await,
		MaintenanceTask::ChangePassword(password) => execute(ChangePassword::new(device, password), cx).await,
	}
}
