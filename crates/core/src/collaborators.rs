//! Contracts of the services the workflows consume.
//!
//! Only the consumed surface is modelled: lookups, credential storage, the
//! remote-access registry and certificate signing. Implementations live in
//! [`crate::memory`], [`crate::secrets_file`] and the server binary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Control mode a profile activates into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationMode {
	/// Admin control mode, certificate based.
	#[serde(rename = "acmactivate")]
	Admin,
	/// Client control mode, host based.
	#[serde(rename = "ccmactivate")]
	Client,
}

impl ActivationMode {
	/// Value of the device's `currentMode` once activated into this mode.
	pub fn device_mode(self) -> u8 {
		match self {
			ActivationMode::Client => 1,
			ActivationMode::Admin => 2,
		}
	}

	pub fn status(self) -> &'static str {
		match self {
			ActivationMode::Client => "Client control mode.",
			ActivationMode::Admin => "Admin control mode.",
		}
	}
}

/// TLS configuration of the remote (802.3) endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TlsMode {
	Server = 1,
	ServerAndNonTls = 2,
	Mutual = 3,
	MutualAndNonTls = 4,
}

impl TlsMode {
	pub fn mutual(self) -> bool {
		matches!(self, TlsMode::Mutual | TlsMode::MutualAndNonTls)
	}

	pub fn accepts_non_tls(self) -> bool {
		matches!(self, TlsMode::ServerAndNonTls | TlsMode::MutualAndNonTls)
	}
}

impl TryFrom<u8> for TlsMode {
	type Error = String;

	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			1 => Ok(TlsMode::Server),
			2 => Ok(TlsMode::ServerAndNonTls),
			3 => Ok(TlsMode::Mutual),
			4 => Ok(TlsMode::MutualAndNonTls),
			other => Err(format!("unsupported TLS mode {other}")),
		}
	}
}

impl From<TlsMode> for u8 {
	fn from(mode: TlsMode) -> Self {
		mode as u8
	}
}

/// Wired 802.1x settings of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ieee8021xProfile {
	pub profile_name: String,
	/// `0` is EAP-TLS.
	#[serde(default)]
	pub auth_protocol: u32,
	#[serde(default = "default_pxe_timeout")]
	pub pxe_timeout: u32,
}

fn default_pxe_timeout() -> u32 {
	120
}

/// Configuration profile driving activation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
	pub name: String,
	#[serde(default)]
	pub tenant_id: String,
	pub activation: ActivationMode,
	#[serde(default)]
	pub amt_password: Option<String>,
	#[serde(default)]
	pub mebx_password: Option<String>,
	#[serde(default)]
	pub generate_random_password: bool,
	#[serde(default)]
	pub generate_random_mebx_password: bool,
	#[serde(default)]
	pub tls_mode: Option<TlsMode>,
	#[serde(default)]
	pub ieee8021x: Option<Ieee8021xProfile>,
	#[serde(default)]
	pub tags: Vec<String>,
}

impl std::fmt::Debug for Profile {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Profile")
			.field("name", &self.name)
			.field("tenant_id", &self.tenant_id)
			.field("activation", &self.activation)
			.field("tls_mode", &self.tls_mode)
			.field("ieee8021x", &self.ieee8021x)
			.finish_non_exhaustive()
	}
}

/// Provisioning domain used for admin control activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
	pub name: String,
	/// DNS suffix the device's FQDN must end with.
	pub suffix: String,
	#[serde(default)]
	pub tenant_id: String,
	/// Provisioning certificate chain as base64 DER, leaf first, root last.
	pub certificate_chain: Vec<String>,
}

impl Domain {
	pub fn root_certificate(&self) -> Option<&str> {
		self.certificate_chain.last().map(String::as_str)
	}

	pub fn matches(&self, fqdn: &str) -> bool {
		let fqdn = fqdn.trim_end_matches('.').to_ascii_lowercase();
		let suffix = self.suffix.trim_start_matches('.').to_ascii_lowercase();
		fqdn == suffix || fqdn.ends_with(&format!(".{suffix}"))
	}
}

/// Credentials stored for a provisioned device.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCredentials {
	pub amt_password: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mebx_password: Option<String>,
}

impl std::fmt::Debug for DeviceCredentials {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DeviceCredentials").finish_non_exhaustive()
	}
}

/// Fields pushed to the remote-access registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
	pub guid: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub hostname: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub dns_suffix: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub friendly_name: Option<String>,
	/// `None` leaves the registry's stored tags untouched.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tags: Option<Vec<String>>,
	#[serde(default)]
	pub tenant_id: String,
}

/// Certificate issued for the device's TLS endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCertificate {
	/// Base64 DER.
	pub certificate: String,
	pub common_name: String,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
	async fn profile(&self, name: &str, tenant_id: &str) -> CollaboratorResult<Option<Profile>>;
}

#[async_trait]
pub trait DomainStore: Send + Sync {
	/// Domain whose suffix matches `fqdn`.
	async fn domain_for(&self, fqdn: &str, tenant_id: &str) -> CollaboratorResult<Option<Domain>>;
}

#[async_trait]
pub trait SecretsStore: Send + Sync {
	async fn credentials(&self, guid: &str) -> CollaboratorResult<Option<DeviceCredentials>>;

	async fn store_credentials(&self, guid: &str, credentials: &DeviceCredentials) -> CollaboratorResult<()>;

	/// Fails with [`CollaboratorError::NotFound`] when nothing is stored.
	async fn delete_credentials(&self, guid: &str) -> CollaboratorResult<()>;
}

#[async_trait]
pub trait RemoteAccessRegistry: Send + Sync {
	async fn update_device(&self, record: &DeviceRecord) -> CollaboratorResult<()>;

	async fn delete_device(&self, guid: &str) -> CollaboratorResult<()>;
}

#[async_trait]
pub trait CertificateAuthority: Send + Sync {
	/// Root certificate the device should trust, base64 DER.
	async fn root_certificate(&self) -> CollaboratorResult<String>;

	/// Issues a TLS certificate for the device's public key (base64 DER).
	async fn issue_tls_certificate(&self, public_key: &str, common_name: &str) -> CollaboratorResult<IssuedCertificate>;

	/// Signs `data` with the domain's provisioning key; returns base64.
	async fn sign_provisioning_nonce(&self, domain: &Domain, data: &[u8]) -> CollaboratorResult<String>;
}
