//! TLS enrollment of the remote and local management endpoints.

use async_trait::async_trait;
use rps_protocol::wsman::{Envelope, Param, amt, properties_from_json};
use rps_runtime::StatusCategory;
use serde_json::{Map, Value};
use tracing::debug;

use crate::collaborators::{IssuedCertificate, TlsMode};
use crate::device::DeviceInfo;
use crate::error::{Error, Result};
use crate::workflow::maintenance::TimeSync;
use crate::workflow::{Context, Flow, Workflow, check_return, drive, output_reference, text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	PullCertificates,
	AddTrustedRoot,
	GenerateKeyPair,
	PullKeyPairs,
	AddCertificate,
	CreateCredentialContext,
	SyncTime,
	PullTlsSettings,
	PutRemoteSettings,
	Settle,
	PutLocalSettings,
	CommitChanges,
}

#[derive(Debug)]
pub struct TlsEnrollment {
	device: DeviceInfo,
	mode: TlsMode,
	certificates: Vec<Map<String, Value>>,
	key_pair: Option<String>,
	public_key: Option<String>,
	issued: Option<IssuedCertificate>,
	certificate: Option<String>,
	settings: Vec<Map<String, Value>>,
}

impl TlsEnrollment {
	pub fn new(device: DeviceInfo, mode: TlsMode) -> Self {
		Self {
			device,
			mode,
			certificates: Vec::new(),
			key_pair: None,
			public_key: None,
			issued: None,
			certificate: None,
			settings: Vec::new(),
		}
	}

	fn setting(&self, instance: &str) -> Option<&Map<String, Value>> {
		self.settings.iter().find(|s| text(s, "InstanceID") == Some(instance))
	}

	fn put_setting(&self, instance: &str, updates: Vec<(&str, Param)>) -> Option<Envelope> {
		let mut properties = properties_from_json(self.setting(instance)?);
		for (name, value) in updates {
			match properties.iter_mut().find(|(n, _)| n == name) {
				Some((_, param)) => *param = value,
				None => properties.push((name.to_string(), value)),
			}
		}
		Some(Envelope::put(amt::TLS_SETTING_DATA, &properties).with_selector("InstanceID", instance))
	}
}

fn returned(response: &rps_protocol::wsman::WsmanResponse, method: &str, next: State) -> Flow<State> {
	match check_return(response, method) {
		Ok(()) => Flow::Continue(next),
		Err(reason) => Flow::Fail(reason),
	}
}

#[async_trait]
impl Workflow for TlsEnrollment {
	type State = State;

	const NAME: &'static str = "tls";
	const CATEGORY: StatusCategory = StatusCategory::Tls;

	fn initial(&self) -> State {
		State::PullCertificates
	}

	async fn step(&mut self, cx: &Context, state: State) -> Result<Flow<State>> {
		match state {
			State::PullCertificates => {
				self.certificates = cx.enumerate(amt::PUBLIC_KEY_CERTIFICATE).await?;
				Ok(Flow::Continue(State::AddTrustedRoot))
			}
			State::AddTrustedRoot => {
				let root = cx.collaborators().certificates.root_certificate().await?;
				if self.certificates.iter().any(|c| text(c, "X509Certificate") == Some(root.as_str())) {
					debug!(target = "rps.workflow", client_id = %cx.client_id(), "trusted root already present");
					return Ok(Flow::Continue(State::GenerateKeyPair));
				}
				let response = cx.invoke(&amt::add_trusted_root_certificate(&root)).await?;
				Ok(returned(&response, "AddTrustedRootCertificate", State::GenerateKeyPair))
			}
			State::GenerateKeyPair => {
				let response = cx.invoke(&amt::generate_key_pair()).await?;
				if let Err(reason) = check_return(&response, "GenerateKeyPair") {
					return Ok(Flow::Fail(reason));
				}
				self.key_pair = output_reference(&response, "GenerateKeyPair", "KeyPair");
				match self.key_pair {
					Some(_) => Ok(Flow::Continue(State::PullKeyPairs)),
					None => Ok(Flow::Fail("GenerateKeyPair reply names no key pair".into())),
				}
			}
			State::PullKeyPairs => {
				let key_pairs = cx.enumerate(amt::PUBLIC_PRIVATE_KEY_PAIR).await?;
				let Some(wanted) = self.key_pair.as_deref() else {
					return Ok(Flow::Retry(State::GenerateKeyPair));
				};
				let generated = key_pairs.iter().find(|k| text(k, "InstanceID") == Some(wanted));
				match generated.and_then(|k| text(k, "DERKey")) {
					Some(der) => {
						self.public_key = Some(der.to_string());
						Ok(Flow::Continue(State::AddCertificate))
					}
					None => Ok(Flow::Fail("generated key pair not found on the device".into())),
				}
			}
			State::AddCertificate => {
				let Some(public_key) = self.public_key.as_deref() else {
					return Ok(Flow::Retry(State::PullKeyPairs));
				};
				let common_name = self.device.fqdn.clone().unwrap_or_else(|| self.device.display_name().to_string());
				let issued = match &self.issued {
					Some(issued) => issued.clone(),
					None => cx.collaborators().certificates.issue_tls_certificate(public_key, &common_name).await?,
				};
				self.issued = Some(issued.clone());
				let response = cx.invoke(&amt::add_certificate(&issued.certificate)).await?;
				if let Err(reason) = check_return(&response, "AddCertificate") {
					return Ok(Flow::Fail(reason));
				}
				self.certificate = output_reference(&response, "AddCertificate", "CreatedCertificate");
				match self.certificate {
					Some(_) => Ok(Flow::Continue(State::CreateCredentialContext)),
					None => Ok(Flow::Fail("AddCertificate reply names no certificate".into())),
				}
			}
			State::CreateCredentialContext => {
				let Some(certificate) = self.certificate.as_deref() else {
					return Ok(Flow::Retry(State::AddCertificate));
				};
				match cx.invoke(&amt::create_tls_credential_context(certificate)).await {
					Ok(_) => Ok(Flow::Continue(State::SyncTime)),
					Err(Error::Runtime(err)) if err.fault().and_then(|f| f.subcode).as_deref() == Some("AlreadyExists") => {
						debug!(target = "rps.workflow", client_id = %cx.client_id(), "TLS credential context already exists");
						Ok(Flow::Continue(State::SyncTime))
					}
					Err(err) => Err(err),
				}
			}
			State::SyncTime => Ok(match drive(&mut TimeSync::new(), cx).await {
				Ok(()) => Flow::Continue(State::PullTlsSettings),
				Err(reason) => Flow::Fail(format!("time synchronization failed: {reason}")),
			}),
			State::PullTlsSettings => {
				self.settings = cx.enumerate(amt::TLS_SETTING_DATA).await?;
				if self.setting(amt::REMOTE_TLS_INSTANCE).is_none() || self.setting(amt::LOCAL_TLS_INSTANCE).is_none() {
					return Ok(Flow::Fail("TLS setting data is missing the remote or local endpoint".into()));
				}
				Ok(Flow::Continue(State::PutRemoteSettings))
			}
			State::PutRemoteSettings => {
				let trusted = self.issued.as_ref().map(|i| i.common_name.clone()).into_iter().collect();
				let updates = vec![
					("Enabled", Param::text(true)),
					("AcceptNonSecureConnections", Param::text(self.mode.accepts_non_tls())),
					("MutualAuthentication", Param::text(self.mode.mutual())),
					("TrustedCN", Param::Many(trusted)),
				];
				let Some(envelope) = self.put_setting(amt::REMOTE_TLS_INSTANCE, updates) else {
					return Ok(Flow::Retry(State::PullTlsSettings));
				};
				cx.invoke(&envelope).await?;
				Ok(Flow::Continue(State::Settle))
			}
			State::Settle => {
				tokio::time::sleep(cx.settings().tls_settle).await;
				Ok(Flow::Continue(State::PutLocalSettings))
			}
			State::PutLocalSettings => {
				let Some(envelope) = self.put_setting(amt::LOCAL_TLS_INSTANCE, vec![("Enabled", Param::text(true))]) else {
					return Ok(Flow::Retry(State::PullTlsSettings));
				};
				cx.invoke(&envelope).await?;
				Ok(Flow::Continue(State::CommitChanges))
			}
			State::CommitChanges => {
				let response = cx.invoke(&amt::commit_changes()).await?;
				Ok(match check_return(&response, "CommitChanges") {
					Ok(()) => Flow::Succeed,
					Err(reason) => Flow::Fail(reason),
				})
			}
		}
	}

	fn success_status(&self) -> String {
		"Configured".into()
	}
}
