//! HTTP clients for the remote-access registry and the certificate service.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Response, StatusCode};
use rps::collaborators::{CertificateAuthority, CollaboratorResult, DeviceRecord, Domain, IssuedCertificate, RemoteAccessRegistry};
use rps::error::CollaboratorError;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

fn client(timeout: Duration) -> CollaboratorResult<Client> {
	Client::builder()
		.timeout(timeout)
		.build()
		.map_err(|e| CollaboratorError::Unavailable(format!("failed to create HTTP client: {e}")))
}

fn base_url(url: &str) -> String {
	url.trim_end_matches('/').to_string()
}

fn unavailable(url: &str, err: reqwest::Error) -> CollaboratorError {
	CollaboratorError::Unavailable(format!("{url}: {err}"))
}

/// Maps a non-success status onto the collaborator error taxonomy.
async fn check(response: Response, what: &str) -> CollaboratorResult<Response> {
	let status = response.status();
	if status.is_success() {
		return Ok(response);
	}
	let body = response.text().await.unwrap_or_default();
	match status {
		StatusCode::NOT_FOUND => Err(CollaboratorError::NotFound(what.to_string())),
		s if s.is_server_error() => Err(CollaboratorError::Unavailable(format!("{what}: HTTP {s}"))),
		s => Err(CollaboratorError::Rejected(format!("{what}: HTTP {s} {body}"))),
	}
}

/// Remote-access (MPS) device registry.
#[derive(Debug, Clone)]
pub struct HttpRemoteAccess {
	client: Client,
	base: String,
}

impl HttpRemoteAccess {
	pub fn new(base: &str, timeout: Duration) -> CollaboratorResult<Self> {
		Ok(Self {
			client: client(timeout)?,
			base: base_url(base),
		})
	}
}

#[async_trait]
impl RemoteAccessRegistry for HttpRemoteAccess {
	async fn update_device(&self, record: &DeviceRecord) -> CollaboratorResult<()> {
		let url = format!("{}/api/v1/devices", self.base);
		debug!(target = "rps.collaborators", guid = %record.guid, %url, "updating remote access record");
		let response = self.client.patch(&url).json(record).send().await.map_err(|e| unavailable(&url, e))?;
		check(response, &format!("device {}", record.guid)).await?;
		Ok(())
	}

	async fn delete_device(&self, guid: &str) -> CollaboratorResult<()> {
		let url = format!("{}/api/v1/devices/{guid}", self.base);
		let response = self.client.delete(&url).send().await.map_err(|e| unavailable(&url, e))?;
		check(response, &format!("device {guid}")).await?;
		Ok(())
	}
}

/// Used when no registry URL is configured; every call is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemoteAccess;

#[async_trait]
impl RemoteAccessRegistry for NoRemoteAccess {
	async fn update_device(&self, record: &DeviceRecord) -> CollaboratorResult<()> {
		debug!(target = "rps.collaborators", guid = %record.guid, "no remote access registry configured; update skipped");
		Ok(())
	}

	async fn delete_device(&self, guid: &str) -> CollaboratorResult<()> {
		debug!(target = "rps.collaborators", %guid, "no remote access registry configured; delete skipped");
		Ok(())
	}
}

#[derive(Debug, Deserialize)]
struct RootReply {
	certificate: String,
}

#[derive(Debug, Deserialize)]
struct SignatureReply {
	signature: String,
}

/// Certificate signing service.
#[derive(Debug, Clone)]
pub struct HttpCertificateAuthority {
	client: Client,
	base: String,
}

impl HttpCertificateAuthority {
	pub fn new(base: &str, timeout: Duration) -> CollaboratorResult<Self> {
		Ok(Self {
			client: client(timeout)?,
			base: base_url(base),
		})
	}
}

#[async_trait]
impl CertificateAuthority for HttpCertificateAuthority {
	async fn root_certificate(&self) -> CollaboratorResult<String> {
		let url = format!("{}/root", self.base);
		let response = self.client.get(&url).send().await.map_err(|e| unavailable(&url, e))?;
		let reply: RootReply = check(response, "root certificate").await?.json().await.map_err(|e| unavailable(&url, e))?;
		Ok(reply.certificate)
	}

	async fn issue_tls_certificate(&self, public_key: &str, common_name: &str) -> CollaboratorResult<IssuedCertificate> {
		let url = format!("{}/sign", self.base);
		let body = json!({ "publicKey": public_key, "commonName": common_name });
		let response = self.client.post(&url).json(&body).send().await.map_err(|e| unavailable(&url, e))?;
		check(response, "certificate signing").await?.json().await.map_err(|e| unavailable(&url, e))
	}

	async fn sign_provisioning_nonce(&self, domain: &Domain, data: &[u8]) -> CollaboratorResult<String> {
		let url = format!("{}/provisioning/sign", self.base);
		let body = json!({ "domain": domain.name, "data": STANDARD.encode(data) });
		let response = self.client.post(&url).json(&body).send().await.map_err(|e| unavailable(&url, e))?;
		let reply: SignatureReply = check(response, &format!("provisioning signature for domain {}", domain.name))
			.await?
			.json()
			.await
			.map_err(|e| unavailable(&url, e))?;
		Ok(reply.signature)
	}
}

/// Used when no signing service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCertificateAuthority;

impl NoCertificateAuthority {
	fn unavailable<T>(&self) -> CollaboratorResult<T> {
		warn!(target = "rps.collaborators", "certificate signing requested but [collaborators].ca_url is not set");
		Err(CollaboratorError::Unavailable("no certificate signing service configured".into()))
	}
}

#[async_trait]
impl CertificateAuthority for NoCertificateAuthority {
	async fn root_certificate(&self) -> CollaboratorResult<String> {
		self.unavailable()
	}

	async fn issue_tls_certificate(&self, _public_key: &str, _common_name: &str) -> CollaboratorResult<IssuedCertificate> {
		self.unavailable()
	}

	async fn sign_provisioning_nonce(&self, _domain: &Domain, _data: &[u8]) -> CollaboratorResult<String> {
		self.unavailable()
	}
}
