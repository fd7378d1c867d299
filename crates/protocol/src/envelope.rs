//! The JSON transport envelope exchanged over the persistent device connection.
//!
//! Inbound (device to server):
//! ```json
//! {
//!   "method": "activation",
//!   "apiKey": "key",
//!   "appVersion": "2.3.0",
//!   "protocolVersion": "4.0.0",
//!   "status": "ok",
//!   "message": "ok",
//!   "payload": "eyJ2ZXIiOiIxNi4xLjI1In0="
//! }
//! ```
//!
//! `payload` is base64. For commands it wraps a JSON [`CommandPayload`]; for
//! `response` it wraps the raw HTTP reply from the management engine.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Methods a device may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMethod {
	Activation,
	Deactivation,
	Maintenance,
	Response,
	HeartbeatResponse,
}

impl ClientMethod {
	/// Commands carry an encoded [`CommandPayload`]; replies and heartbeats do not.
	pub fn is_command(self) -> bool {
		!matches!(self, ClientMethod::Response | ClientMethod::HeartbeatResponse)
	}
}

/// Envelope received from a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMsg {
	pub method: ClientMethod,
	#[serde(default)]
	pub api_key: String,
	#[serde(default)]
	pub app_version: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub protocol_version: Option<String>,
	#[serde(default)]
	pub status: String,
	#[serde(default)]
	pub message: String,
	#[serde(default)]
	pub payload: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tenant_id: Option<String>,
}

impl ClientMsg {
	pub fn parse(raw: &str) -> Result<Self> {
		Ok(serde_json::from_str(raw)?)
	}

	/// Base64-decodes the payload into raw bytes.
	pub fn payload_bytes(&self) -> Result<Vec<u8>> {
		Ok(STANDARD.decode(self.payload.trim())?)
	}

	/// Decodes the nested command structure carried by command methods.
	pub fn command_payload(&self) -> Result<CommandPayload> {
		let bytes = self.payload_bytes()?;
		Ok(serde_json::from_slice(&bytes)?)
	}
}

/// Command payload decoded from a device envelope.
///
/// Every field is optional on the wire; the dispatcher decides which ones a
/// given method requires.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
	/// Firmware version, e.g. `16.1.25`.
	#[serde(default)]
	pub ver: Option<String>,
	#[serde(default)]
	pub build: Option<String>,
	#[serde(default)]
	pub sku: Option<String>,
	/// Device identifier (36 character UUID).
	#[serde(default)]
	pub uuid: Option<String>,
	#[serde(default)]
	pub username: Option<String>,
	#[serde(default)]
	pub password: Option<String>,
	/// 0 = pre-provisioning, 1 = client control, 2 = admin control.
	#[serde(default)]
	pub current_mode: Option<u8>,
	#[serde(default)]
	pub hostname: Option<String>,
	#[serde(default)]
	pub fqdn: Option<String>,
	#[serde(default)]
	pub client: Option<String>,
	#[serde(default)]
	pub cert_hashes: Vec<String>,
	#[serde(default)]
	pub profile: Option<String>,
	#[serde(default)]
	pub friendly_name: Option<String>,
	/// Maintenance task name.
	#[serde(default)]
	pub task: Option<String>,
	/// Maintenance task argument, task-specific shape.
	#[serde(default)]
	pub task_arg: Option<Value>,
}

/// Methods the server sends to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMethod {
	Wsman,
	Success,
	Error,
	HeartbeatRequest,
}

/// Envelope sent to a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMsg {
	pub method: ServerMethod,
	pub api_key: String,
	pub app_version: String,
	pub protocol_version: String,
	pub status: String,
	pub message: String,
	#[serde(default)]
	pub payload: String,
}

impl ServerMsg {
	fn new(method: ServerMethod, identity: &ServerIdentity, status: &str, message: String, payload: String) -> Self {
		Self {
			method,
			api_key: "key".into(),
			app_version: identity.app_version.clone(),
			protocol_version: identity.protocol_version.clone(),
			status: status.into(),
			message,
			payload,
		}
	}

	/// Wraps a framed HTTP request for the device to relay to its engine.
	pub fn wsman(identity: &ServerIdentity, http_request: &str) -> Self {
		Self::new(ServerMethod::Wsman, identity, "ok", "ok".into(), STANDARD.encode(http_request))
	}

	/// Terminal success notification.
	pub fn success(identity: &ServerIdentity, message: String) -> Self {
		Self::new(ServerMethod::Success, identity, "success", message, String::new())
	}

	/// Terminal failure notification.
	pub fn error(identity: &ServerIdentity, message: String) -> Self {
		Self::new(ServerMethod::Error, identity, "failed", message, String::new())
	}

	pub fn to_json(&self) -> Result<String> {
		serde_json::to_string(self).map_err(Error::from)
	}
}

/// Versions stamped on every outgoing envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
	pub app_version: String,
	pub protocol_version: String,
}

impl Default for ServerIdentity {
	fn default() -> Self {
		Self {
			app_version: env!("CARGO_PKG_VERSION").into(),
			protocol_version: "4.0.0".into(),
		}
	}
}

/// Base64-encodes a command payload; the inverse of [`ClientMsg::command_payload`].
pub fn encode_payload(payload: &CommandPayload) -> Result<String> {
	Ok(STANDARD.encode(serde_json::to_vec(payload)?))
}
