//! Enterprise Assistant "satellite" protocol.
//!
//! Requests carry `nodeid` equal to the originating device session id; the
//! assistant echoes it so replies can be routed back to the waiting workflow.
//!
//! ```json
//! {
//!   "action": "satellite",
//!   "subaction": "802.1x-ProFile-Request",
//!   "satelliteFlags": 2,
//!   "nodeid": "0d3c2f1e-...",
//!   "domain": "",
//!   "reqid": "",
//!   "authProtocol": 0,
//!   "osname": "win11",
//!   "devname": "host1",
//!   "icon": 1,
//!   "ver": ""
//! }
//! ```

use serde::{Deserialize, Serialize};

pub const ACTION: &str = "satellite";
pub const PROFILE_REQUEST: &str = "802.1x-ProFile-Request";
pub const KEY_PAIR_RESPONSE: &str = "802.1x-KeyPair-Response";
pub const CSR_RESPONSE: &str = "802.1x-CSR-Response";

/// Kind-specific part of an outgoing satellite request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "subaction")]
pub enum SatelliteRequestKind {
	#[serde(rename = "802.1x-ProFile-Request")]
	ProfileRequest,
	#[serde(rename = "802.1x-KeyPair-Response")]
	KeyPairResponse {
		#[serde(rename = "DevicePublicKey")]
		device_public_key: String,
		#[serde(rename = "KeyInstanceId")]
		key_instance_id: String,
	},
	#[serde(rename = "802.1x-CSR-Response")]
	CsrResponse {
		#[serde(rename = "SignedCSR")]
		signed_csr: String,
	},
}

impl SatelliteRequestKind {
	pub fn subaction(&self) -> &'static str {
		match self {
			SatelliteRequestKind::ProfileRequest => PROFILE_REQUEST,
			SatelliteRequestKind::KeyPairResponse { .. } => KEY_PAIR_RESPONSE,
			SatelliteRequestKind::CsrResponse { .. } => CSR_RESPONSE,
		}
	}
}

/// Outgoing request to the Enterprise Assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SatelliteRequest {
	pub action: String,
	#[serde(flatten)]
	pub kind: SatelliteRequestKind,
	pub satellite_flags: u32,
	pub nodeid: String,
	pub domain: String,
	pub reqid: String,
	pub auth_protocol: u32,
	pub osname: String,
	pub devname: String,
	pub icon: u32,
	pub ver: String,
}

impl SatelliteRequest {
	pub fn new(nodeid: impl Into<String>, devname: impl Into<String>, auth_protocol: u32, kind: SatelliteRequestKind) -> Self {
		Self {
			action: ACTION.into(),
			kind,
			satellite_flags: 2,
			nodeid: nodeid.into(),
			domain: String::new(),
			reqid: String::new(),
			auth_protocol,
			osname: "win11".into(),
			devname: devname.into(),
			icon: 1,
			ver: String::new(),
		}
	}
}

/// Reply from the Enterprise Assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatelliteReply {
	pub action: String,
	#[serde(default)]
	pub subaction: String,
	pub nodeid: String,
	#[serde(default)]
	pub response: SatelliteResponse,
}

/// Material handed back by the assistant; which fields are set depends on
/// the step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SatelliteResponse {
	/// 802.1x identity to configure on the device.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub username: Option<String>,
	/// Null-signed CSR the device must sign.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub csr: Option<String>,
	/// Issued client certificate, base64 DER.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub certificate: Option<String>,
	/// Root certificate of the RADIUS server chain, base64 DER.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub root_cert: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn profile_request_wire_shape() {
		let req = SatelliteRequest::new("node-1", "host1", 0, SatelliteRequestKind::ProfileRequest);
		let value = serde_json::to_value(&req).unwrap();
		assert_eq!(value["action"], "satellite");
		assert_eq!(value["subaction"], PROFILE_REQUEST);
		assert_eq!(value["nodeid"], "node-1");
		assert_eq!(value["satelliteFlags"], 2);
		assert_eq!(value["authProtocol"], 0);
	}

	#[test]
	fn csr_response_carries_signed_csr() {
		let req = SatelliteRequest::new(
			"node-1",
			"host1",
			0,
			SatelliteRequestKind::CsrResponse {
				signed_csr: "MIIB...".into(),
			},
		);
		let value = serde_json::to_value(&req).unwrap();
		assert_eq!(value["subaction"], CSR_RESPONSE);
		assert_eq!(value["SignedCSR"], "MIIB...");
		let back: SatelliteRequest = serde_json::from_value(value).unwrap();
		assert_eq!(back.kind.subaction(), CSR_RESPONSE);
	}

	#[test]
	fn parses_reply_with_missing_response() {
		let reply: SatelliteReply = serde_json::from_str(r#"{"action":"satellite","subaction":"802.1x-KeyPair-Request","nodeid":"n"}"#).unwrap();
		assert_eq!(reply.nodeid, "n");
		assert_eq!(reply.response, SatelliteResponse::default());
	}
}
