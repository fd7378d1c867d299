use rps_protocol::CommandPayload;

/// Identity and state a device reported with its command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
	pub guid: String,
	pub firmware: String,
	/// 0 = pre-provisioning, 1 = client control, 2 = admin control.
	pub current_mode: u8,
	pub hostname: Option<String>,
	pub fqdn: Option<String>,
	pub friendly_name: Option<String>,
	pub tenant_id: String,
	/// Lower-case hex SHA-256 hashes of the trusted provisioning roots.
	pub cert_hashes: Vec<String>,
}

impl DeviceInfo {
	pub fn from_payload(guid: &str, payload: &CommandPayload, tenant_id: &str) -> Self {
		Self {
			guid: guid.to_string(),
			firmware: payload.ver.clone().unwrap_or_default(),
			current_mode: payload.current_mode.unwrap_or(0),
			hostname: payload.hostname.clone().filter(|h| !h.is_empty()),
			fqdn: payload.fqdn.clone().filter(|f| !f.is_empty()),
			friendly_name: payload.friendly_name.clone().filter(|n| !n.is_empty()),
			tenant_id: tenant_id.to_string(),
			cert_hashes: payload.cert_hashes.iter().map(|h| h.to_ascii_lowercase()).collect(),
		}
	}

	/// DNS suffix of the FQDN, if the FQDN has one.
	pub fn dns_suffix(&self) -> Option<&str> {
		self.fqdn.as_deref().and_then(|fqdn| fqdn.split_once('.')).map(|(_, suffix)| suffix)
	}

	/// Name presented to the Enterprise Assistant and the remote-access registry.
	pub fn display_name(&self) -> &str {
		self.hostname.as_deref().unwrap_or(&self.guid)
	}
}
