//! Device credentials persisted to a JSON file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::collaborators::{CollaboratorResult, DeviceCredentials, SecretsStore};
use crate::error::CollaboratorError;

const SECRETS_SCHEMA_VERSION: u32 = 1;

/// On-disk format of the secrets file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretsFile {
	schema: u32,
	#[serde(default)]
	devices: BTreeMap<String, DeviceCredentials>,
}

impl Default for SecretsFile {
	fn default() -> Self {
		Self {
			schema: SECRETS_SCHEMA_VERSION,
			devices: BTreeMap::new(),
		}
	}
}

/// Secrets store backed by a single JSON file.
///
/// Every operation re-reads the file so external edits are honoured; writes
/// are serialized through a lock and replace the file atomically.
#[derive(Debug)]
pub struct JsonFileSecrets {
	path: PathBuf,
	lock: Mutex<()>,
}

impl JsonFileSecrets {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			lock: Mutex::new(()),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	async fn load(&self) -> CollaboratorResult<SecretsFile> {
		match tokio::fs::read_to_string(&self.path).await {
			Ok(content) => serde_json::from_str(&content)
				.map_err(|e| CollaboratorError::Unavailable(format!("corrupt secrets file {}: {e}", self.path.display()))),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SecretsFile::default()),
			Err(e) => Err(io_error(&self.path, e)),
		}
	}

	async fn save(&self, file: &SecretsFile) -> CollaboratorResult<()> {
		if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
			tokio::fs::create_dir_all(parent).await.map_err(|e| io_error(parent, e))?;
		}
		let json = serde_json::to_string_pretty(file).map_err(|e| CollaboratorError::Rejected(e.to_string()))?;
		let tmp = self.path.with_extension("json.tmp");
		tokio::fs::write(&tmp, json).await.map_err(|e| io_error(&tmp, e))?;
		tokio::fs::rename(&tmp, &self.path).await.map_err(|e| io_error(&self.path, e))
	}
}

fn io_error(path: &Path, err: std::io::Error) -> CollaboratorError {
	CollaboratorError::Unavailable(format!("{}: {err}", path.display()))
}

#[async_trait]
impl SecretsStore for JsonFileSecrets {
	async fn credentials(&self, guid: &str) -> CollaboratorResult<Option<DeviceCredentials>> {
		let _guard = self.lock.lock().await;
		Ok(self.load().await?.devices.get(guid).cloned())
	}

	async fn store_credentials(&self, guid: &str, credentials: &DeviceCredentials) -> CollaboratorResult<()> {
		let _guard = self.lock.lock().await;
		let mut file = self.load().await?;
		file.devices.insert(guid.to_string(), credentials.clone());
		self.save(&file).await?;
		debug!(target = "rps.secrets", %guid, "stored device credentials");
		Ok(())
	}

	async fn delete_credentials(&self, guid: &str) -> CollaboratorResult<()> {
		let _guard = self.lock.lock().await;
		let mut file = self.load().await?;
		if file.devices.remove(guid).is_none() {
			return Err(CollaboratorError::NotFound(format!("secrets for device {guid}")));
		}
		self.save(&file).await
	}
}
