//! In-process collaborator implementations.
//!
//! The static profile and domain stores back the server's configured
//! profiles. The rest record what they were asked to do, which is what the
//! workflow tests assert on.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::collaborators::{
	CertificateAuthority, CollaboratorResult, DeviceCredentials, DeviceRecord, Domain, DomainStore, IssuedCertificate, Profile, ProfileStore,
	RemoteAccessRegistry, SecretsStore,
};
use crate::error::CollaboratorError;

/// Profiles fixed at startup.
#[derive(Debug, Default)]
pub struct StaticProfiles {
	profiles: Vec<Profile>,
}

impl StaticProfiles {
	pub fn new(profiles: Vec<Profile>) -> Self {
		Self { profiles }
	}
}

#[async_trait]
impl ProfileStore for StaticProfiles {
	async fn profile(&self, name: &str, tenant_id: &str) -> CollaboratorResult<Option<Profile>> {
		Ok(self.profiles.iter().find(|p| p.name == name && p.tenant_id == tenant_id).cloned())
	}
}

/// Domains fixed at startup; the longest matching suffix wins.
#[derive(Debug, Default)]
pub struct StaticDomains {
	domains: Vec<Domain>,
}

impl StaticDomains {
	pub fn new(domains: Vec<Domain>) -> Self {
		Self { domains }
	}
}

#[async_trait]
impl DomainStore for StaticDomains {
	async fn domain_for(&self, fqdn: &str, tenant_id: &str) -> CollaboratorResult<Option<Domain>> {
		Ok(self
			.domains
			.iter()
			.filter(|d| d.tenant_id == tenant_id && d.matches(fqdn))
			.max_by_key(|d| d.suffix.len())
			.cloned())
	}
}

#[derive(Debug, Default)]
pub struct MemorySecrets {
	devices: Mutex<HashMap<String, DeviceCredentials>>,
}

impl MemorySecrets {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_device(self, guid: &str, credentials: DeviceCredentials) -> Self {
		self.devices.lock().insert(guid.to_string(), credentials);
		self
	}

	pub fn get(&self, guid: &str) -> Option<DeviceCredentials> {
		self.devices.lock().get(guid).cloned()
	}
}

#[async_trait]
impl SecretsStore for MemorySecrets {
	async fn credentials(&self, guid: &str) -> CollaboratorResult<Option<DeviceCredentials>> {
		Ok(self.get(guid))
	}

	async fn store_credentials(&self, guid: &str, credentials: &DeviceCredentials) -> CollaboratorResult<()> {
		self.devices.lock().insert(guid.to_string(), credentials.clone());
		Ok(())
	}

	async fn delete_credentials(&self, guid: &str) -> CollaboratorResult<()> {
		match self.devices.lock().remove(guid) {
			Some(_) => Ok(()),
			None => Err(CollaboratorError::NotFound(format!("secrets for device {guid}"))),
		}
	}
}

/// Remote-access registry that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryRemoteAccess {
	devices: Mutex<HashMap<String, DeviceRecord>>,
	updates: Mutex<Vec<DeviceRecord>>,
	deleted: Mutex<Vec<String>>,
}

impl MemoryRemoteAccess {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn updates(&self) -> Vec<DeviceRecord> {
		self.updates.lock().clone()
	}

	/// Current record for `guid`, with updates merged the way a PATCH would.
	pub fn device(&self, guid: &str) -> Option<DeviceRecord> {
		self.devices.lock().get(guid).cloned()
	}

	pub fn deleted(&self) -> Vec<String> {
		self.deleted.lock().clone()
	}
}

#[async_trait]
impl RemoteAccessRegistry for MemoryRemoteAccess {
	async fn update_device(&self, record: &DeviceRecord) -> CollaboratorResult<()> {
		self.updates.lock().push(record.clone());
		let mut devices = self.devices.lock();
		let mut stored = record.clone();
		if stored.tags.is_none() {
			stored.tags = devices.get(&record.guid).and_then(|previous| previous.tags.clone());
		}
		devices.insert(record.guid.clone(), stored);
		Ok(())
	}

	async fn delete_device(&self, guid: &str) -> CollaboratorResult<()> {
		self.deleted.lock().push(guid.to_string());
		match self.devices.lock().remove(guid) {
			Some(_) => Ok(()),
			None => Err(CollaboratorError::NotFound(format!("device {guid}"))),
		}
	}
}

/// Certificate authority producing deterministic material.
///
/// Issued "certificates" are the SHA-256 of the request; signatures are the
/// SHA-256 of the signed data keyed by the domain name.
#[derive(Debug)]
pub struct MemoryCertificateAuthority {
	root: String,
	common_name: String,
	signed: Mutex<Vec<Vec<u8>>>,
}

impl MemoryCertificateAuthority {
	pub fn new(root: impl Into<String>, common_name: impl Into<String>) -> Self {
		Self {
			root: root.into(),
			common_name: common_name.into(),
			signed: Mutex::new(Vec::new()),
		}
	}

	/// Every payload passed to [`CertificateAuthority::sign_provisioning_nonce`].
	pub fn signed(&self) -> Vec<Vec<u8>> {
		self.signed.lock().clone()
	}
}

impl Default for MemoryCertificateAuthority {
	fn default() -> Self {
		Self::new(STANDARD.encode(b"memory root certificate"), "rps.local")
	}
}

#[async_trait]
impl CertificateAuthority for MemoryCertificateAuthority {
	async fn root_certificate(&self) -> CollaboratorResult<String> {
		Ok(self.root.clone())
	}

	async fn issue_tls_certificate(&self, public_key: &str, common_name: &str) -> CollaboratorResult<IssuedCertificate> {
		let common_name = if common_name.is_empty() { self.common_name.as_str() } else { common_name };
		let digest = Sha256::new().chain_update(common_name.as_bytes()).chain_update(public_key.as_bytes()).finalize();
		Ok(IssuedCertificate {
			certificate: STANDARD.encode(digest),
			common_name: common_name.to_string(),
		})
	}

	async fn sign_provisioning_nonce(&self, domain: &Domain, data: &[u8]) -> CollaboratorResult<String> {
		self.signed.lock().push(data.to_vec());
		let digest = Sha256::new().chain_update(domain.name.as_bytes()).chain_update(data).finalize();
		Ok(STANDARD.encode(digest))
	}
}
