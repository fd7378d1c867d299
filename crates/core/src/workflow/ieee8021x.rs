//! Wired 802.1x enrollment brokered by the Enterprise Assistant.
//!
//! The assistant supplies the identity and issues the client certificate;
//! the device generates the key pair and signs its own request so the
//! private key never leaves the engine.

use async_trait::async_trait;
use rps_protocol::satellite::{SatelliteReply, SatelliteRequest, SatelliteRequestKind};
use rps_protocol::wsman::{Envelope, Param, amt, ips, properties_from_json};
use rps_runtime::StatusCategory;
use serde_json::{Map, Value};
use tracing::debug;

use crate::collaborators::Ieee8021xProfile;
use crate::device::DeviceInfo;
use crate::error::{Error, Result};
use crate::workflow::{Context, Flow, Workflow, check_return, output_reference, text};

/// `Enabled = 2` turns wired 802.1x on.
const ENABLED: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	CheckProfile,
	GetSettings,
	RequestProfile,
	GenerateKeyPair,
	PullKeyPairs,
	SendKeyPair,
	SignRequest,
	SendSignedRequest,
	AddCertificate,
	AddRootCertificate,
	PutSettings,
	SetCertificates,
}

#[derive(Debug)]
pub struct Ieee8021xEnrollment {
	device: DeviceInfo,
	profile: Option<Ieee8021xProfile>,
	settings: Option<Map<String, Value>>,
	username: Option<String>,
	key_pair: Option<String>,
	public_key: Option<String>,
	null_signed_csr: Option<String>,
	signed_csr: Option<String>,
	certificate: Option<String>,
	root_certificate: Option<String>,
	certificate_instance: Option<String>,
	root_instance: Option<String>,
}

impl Ieee8021xEnrollment {
	pub fn new(device: DeviceInfo, profile: Option<Ieee8021xProfile>) -> Self {
		Self {
			device,
			profile,
			settings: None,
			username: None,
			key_pair: None,
			public_key: None,
			null_signed_csr: None,
			signed_csr: None,
			certificate: None,
			root_certificate: None,
			certificate_instance: None,
			root_instance: None,
		}
	}

	async fn satellite(&self, cx: &Context, profile: &Ieee8021xProfile, kind: SatelliteRequestKind) -> Result<SatelliteReply> {
		let request = SatelliteRequest::new(cx.client_id(), self.device.display_name(), profile.auth_protocol, kind);
		Ok(cx.services().enterprise.request(&request).await?)
	}
}

macro_rules! require {
	($value:expr, $back:expr) => {
		match $value {
			Some(value) => value,
			None => return Ok(Flow::Retry($back)),
		}
	};
}

#[async_trait]
impl Workflow for Ieee8021xEnrollment {
	type State = State;

	const NAME: &'static str = "802.1x";
	const CATEGORY: StatusCategory = StatusCategory::Ieee8021x;

	fn initial(&self) -> State {
		State::CheckProfile
	}

	async fn step(&mut self, cx: &Context, state: State) -> Result<Flow<State>> {
		let Some(profile) = self.profile.clone() else {
			return Ok(Flow::Succeed);
		};
		match state {
			State::CheckProfile => Ok(Flow::Continue(State::GetSettings)),
			State::GetSettings => {
				let response = cx.invoke(&ips::ieee8021x_settings_get()).await?;
				self.settings = response.instance(ips::IEEE8021X_SETTINGS).cloned();
				match self.settings {
					Some(_) => Ok(Flow::Continue(State::RequestProfile)),
					None => Ok(Flow::Fail("802.1x settings missing from reply".into())),
				}
			}
			State::RequestProfile => {
				let reply = self.satellite(cx, &profile, SatelliteRequestKind::ProfileRequest).await?;
				self.username = reply.response.username;
				Ok(Flow::Continue(State::GenerateKeyPair))
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
				let wanted = require!(self.key_pair.clone(), State::GenerateKeyPair);
				let key_pairs = match cx.enumerate(amt::PUBLIC_PRIVATE_KEY_PAIR).await {
					Ok(key_pairs) => key_pairs,
					Err(Error::Runtime(err)) if err.is_decode() => {
						debug!(target = "rps.workflow", client_id = %cx.client_id(), error = %err, "key pair pull undecodable; enumerating again");
						return Ok(Flow::Retry(State::PullKeyPairs));
					}
					Err(err) => return Err(err),
				};
				let generated = key_pairs.iter().find(|k| text(k, "InstanceID") == Some(wanted.as_str()));
				match generated.and_then(|k| text(k, "DERKey")) {
					Some(der) => {
						self.public_key = Some(der.to_string());
						Ok(Flow::Continue(State::SendKeyPair))
					}
					None => Ok(Flow::Fail("generated key pair not found on the device".into())),
				}
			}
			State::SendKeyPair => {
				let kind = SatelliteRequestKind::KeyPairResponse {
					device_public_key: require!(self.public_key.clone(), State::PullKeyPairs),
					key_instance_id: require!(self.key_pair.clone(), State::GenerateKeyPair),
				};
				let reply = self.satellite(cx, &profile, kind).await?;
				match reply.response.csr {
					Some(csr) => {
						self.null_signed_csr = Some(csr);
						Ok(Flow::Continue(State::SignRequest))
					}
					None => Ok(Flow::Fail("enterprise assistant returned no certificate request".into())),
				}
			}
			State::SignRequest => {
				let key_pair = require!(self.key_pair.as_deref(), State::GenerateKeyPair);
				let csr = require!(self.null_signed_csr.as_deref(), State::SendKeyPair);
				let response = cx.invoke(&amt::generate_pkcs10_request(key_pair, csr)).await?;
				if let Err(reason) = check_return(&response, "GeneratePKCS10RequestEx") {
					return Ok(Flow::Fail(reason));
				}
				let signed = response.output("GeneratePKCS10RequestEx").and_then(|o| o.get("SignedCertificateRequest")).and_then(Value::as_str);
				match signed {
					Some(signed) => {
						self.signed_csr = Some(signed.to_string());
						Ok(Flow::Continue(State::SendSignedRequest))
					}
					None => Ok(Flow::Fail("device returned no signed certificate request".into())),
				}
			}
			State::SendSignedRequest => {
				let signed_csr = require!(self.signed_csr.clone(), State::SignRequest);
				let reply = self.satellite(cx, &profile, SatelliteRequestKind::CsrResponse { signed_csr }).await?;
				match (reply.response.certificate, reply.response.root_cert) {
					(Some(certificate), Some(root)) => {
						self.certificate = Some(certificate);
						self.root_certificate = Some(root);
						Ok(Flow::Continue(State::AddCertificate))
					}
					_ => Ok(Flow::Fail("enterprise assistant returned no certificate".into())),
				}
			}
			State::AddCertificate => {
				let certificate = require!(self.certificate.as_deref(), State::SendSignedRequest);
				let response = cx.invoke(&amt::add_certificate(certificate)).await?;
				if let Err(reason) = check_return(&response, "AddCertificate") {
					return Ok(Flow::Fail(reason));
				}
				self.certificate_instance = output_reference(&response, "AddCertificate", "CreatedCertificate");
				Ok(Flow::Continue(State::AddRootCertificate))
			}
			State::AddRootCertificate => {
				let root = require!(self.root_certificate.as_deref(), State::SendSignedRequest);
				let response = cx.invoke(&amt::add_trusted_root_certificate(root)).await?;
				if let Err(reason) = check_return(&response, "AddTrustedRootCertificate") {
					return Ok(Flow::Fail(reason));
				}
				self.root_instance = output_reference(&response, "AddTrustedRootCertificate", "CreatedCertificate");
				Ok(Flow::Continue(State::PutSettings))
			}
			State::PutSettings => {
				let settings = require!(self.settings.as_ref(), State::GetSettings);
				let username = self.username.clone().unwrap_or_else(|| self.device.display_name().to_string());
				let mut properties = properties_from_json(settings);
				let updates = [
					("Enabled", Param::text(ENABLED)),
					("AuthenticationProtocol", Param::text(profile.auth_protocol)),
					("PxeTimeout", Param::text(profile.pxe_timeout)),
					("Username", Param::text(username)),
				];
				for (name, value) in updates {
					match properties.iter_mut().find(|(n, _)| n == name) {
						Some((_, param)) => *param = value,
						None => properties.push((name.to_string(), value)),
					}
				}
				let mut envelope = Envelope::put(ips::IEEE8021X_SETTINGS, &properties);
				if let Some(instance) = text(settings, "InstanceID") {
					envelope = envelope.with_selector("InstanceID", instance);
				}
				cx.invoke(&envelope).await?;
				Ok(Flow::Continue(State::SetCertificates))
			}
			State::SetCertificates => {
				let (Some(root), Some(client)) = (&self.root_instance, &self.certificate_instance) else {
					return Ok(Flow::Fail("certificate handles missing for 802.1x binding".into()));
				};
				let response = cx.invoke(&ips::ieee8021x_set_certificates(root, client)).await?;
				Ok(match check_return(&response, "SetCertificates") {
					Ok(()) => Flow::Succeed,
					Err(reason) => Flow::Fail(reason),
				})
			}
		}
	}

	fn success_status(&self) -> String {
		if self.profile.is_some() { "Configured".into() } else { "Not configured".into() }
	}
}
