//! `rps.toml`.
//!
//! Every field has a default, so a missing or empty file yields a server
//! listening on `0.0.0.0:8080` with no profiles configured.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rps::{Domain, EngineSettings, Profile};
use rps_protocol::{ProtocolVersion, ServerIdentity};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
	pub server: ServerConfig,
	pub timeouts: TimeoutConfig,
	pub retries: RetryConfig,
	pub firmware: FirmwareConfig,
	pub collaborators: CollaboratorConfig,
	pub profiles: Vec<Profile>,
	pub domains: Vec<Domain>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
	pub listen: SocketAddr,
	pub enterprise_assistant_path: String,
	pub protocol_version: String,
	pub app_version: String,
}

impl Default for ServerConfig {
	fn default() -> Self {
		let identity = ServerIdentity::default();
		Self {
			listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
			enterprise_assistant_path: "/ea".into(),
			protocol_version: identity.protocol_version,
			app_version: env!("CARGO_PKG_VERSION").into(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
	/// Deadline for each exchange with a device.
	pub delay_timer_secs: u64,
	pub enterprise_assistant_secs: u64,
	pub tls_settle_secs: u64,
}

impl Default for TimeoutConfig {
	fn default() -> Self {
		Self {
			delay_timer_secs: 12,
			enterprise_assistant_secs: 30,
			tls_settle_secs: 5,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
	pub decode_retries: u32,
	pub unauthorized_limit: u32,
	pub workflow_step_retries: u32,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			decode_retries: 2,
			unauthorized_limit: 3,
			workflow_step_retries: 3,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FirmwareConfig {
	pub min_version: String,
}

impl Default for FirmwareConfig {
	fn default() -> Self {
		Self { min_version: "7.0.0".into() }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollaboratorConfig {
	pub secrets_file: PathBuf,
	/// Remote-access registry base URL.
	pub mps_url: Option<String>,
	/// Certificate signing service base URL.
	pub ca_url: Option<String>,
	pub http_timeout_secs: u64,
}

impl Default for CollaboratorConfig {
	fn default() -> Self {
		Self {
			secrets_file: PathBuf::from("rps-secrets.json"),
			mps_url: None,
			ca_url: None,
			http_timeout_secs: 10,
		}
	}
}

impl Config {
	/// Reads `path`; a missing file means defaults.
	pub fn load(path: &Path) -> Result<Self> {
		match std::fs::read_to_string(path) {
			Ok(raw) => Self::parse(&raw).with_context(|| format!("invalid configuration in {}", path.display())),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
				info!(target = "rps.config", path = %path.display(), "no configuration file; using defaults");
				Ok(Self::default())
			}
			Err(err) => Err(err).with_context(|| format!("cannot read {}", path.display())),
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		let config: Config = toml::from_str(raw)?;
		config
			.server
			.protocol_version
			.parse::<ProtocolVersion>()
			.with_context(|| format!("[server].protocol_version '{}'", config.server.protocol_version))?;
		Ok(config)
	}

	pub fn settings(&self) -> EngineSettings {
		EngineSettings {
			identity: ServerIdentity {
				app_version: self.server.app_version.clone(),
				protocol_version: self.server.protocol_version.clone(),
			},
			invoke_deadline: Duration::from_secs(self.timeouts.delay_timer_secs),
			enterprise_assistant_deadline: Duration::from_secs(self.timeouts.enterprise_assistant_secs),
			tls_settle: Duration::from_secs(self.timeouts.tls_settle_secs),
			decode_retries: self.retries.decode_retries,
			unauthorized_limit: self.retries.unauthorized_limit,
			step_retries: self.retries.workflow_step_retries,
			min_firmware: self.firmware.min_version.clone(),
		}
	}
}
