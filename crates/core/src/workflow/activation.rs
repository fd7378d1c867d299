//! Activation into client or admin control mode.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rps_protocol::DigestChallenge;
use rps_protocol::digest::hash_credentials;
use rps_protocol::wsman::{amt, ips};
use rps_runtime::StatusCategory;
use tracing::{debug, info};

use crate::collaborators::{ActivationMode, DeviceCredentials, DeviceRecord, Domain, Profile};
use crate::device::DeviceInfo;
use crate::error::Result;
use crate::password;
use crate::workflow::ieee8021x::Ieee8021xEnrollment;
use crate::workflow::tls::TlsEnrollment;
use crate::workflow::{Context, Flow, Workflow, check_return, run, text};

const ADMIN: &str = "admin";
const MC_NONCE_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	CheckMode,
	GetGeneralSettings,
	Setup,
	AddNextCertInChain,
	GetConfigurationNonce,
	AdminSetup,
	SetMebxPassword,
	SaveCredentials,
	UpdateRemoteAccess,
	ConfigureTls,
	ConfigureIeee8021x,
}

pub struct Activation {
	device: DeviceInfo,
	profile: Profile,
	domain: Option<Domain>,
	amt_password: String,
	mebx_password: Option<String>,
	realm: Option<String>,
	next_cert: usize,
	configuration_nonce: Option<Vec<u8>>,
}

impl Activation {
	/// `domain` is required for admin control mode.
	pub fn new(device: DeviceInfo, profile: Profile, domain: Option<Domain>) -> Self {
		let amt_password = match &profile.amt_password {
			Some(password) if !profile.generate_random_password => password.clone(),
			_ => password::generate(password::MAX_LEN),
		};
		let mebx_password = match &profile.mebx_password {
			Some(password) if !profile.generate_random_mebx_password => Some(password.clone()),
			_ if profile.generate_random_mebx_password => Some(password::generate(password::MAX_LEN)),
			_ => None,
		};
		Self {
			device,
			profile,
			domain,
			amt_password,
			mebx_password,
			realm: None,
			next_cert: 0,
			configuration_nonce: None,
		}
	}

	fn mode(&self) -> ActivationMode {
		self.profile.activation
	}

	fn hashed_password(&self) -> Option<String> {
		self.realm.as_deref().map(|realm| hash_credentials(ADMIN, realm, &self.amt_password))
	}

	fn after_activation(&self) -> State {
		match self.mode() {
			ActivationMode::Admin if self.mebx_password.is_some() => State::SetMebxPassword,
			_ => State::SaveCredentials,
		}
	}
}

impl std::fmt::Debug for Activation {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Activation")
			.field("device", &self.device.guid)
			.field("profile", &self.profile.name)
			.field("mode", &self.profile.activation)
			.field("realm", &self.realm)
			.finish_non_exhaustive()
	}
}

fn returned(response: &rps_protocol::wsman::WsmanResponse, method: &str, next: State) -> Flow<State> {
	match check_return(response, method) {
		Ok(()) => Flow::Continue(next),
		Err(reason) => Flow::Fail(reason),
	}
}

#[async_trait]
impl Workflow for Activation {
	type State = State;

	const NAME: &'static str = "activation";
	const CATEGORY: StatusCategory = StatusCategory::Overall;

	fn initial(&self) -> State {
		State::CheckMode
	}

	async fn step(&mut self, cx: &Context, state: State) -> Result<Flow<State>> {
		match state {
			State::CheckMode => match self.device.current_mode {
				0 => Ok(Flow::Continue(State::GetGeneralSettings)),
				mode if mode == self.mode().device_mode() => {
					info!(target = "rps.workflow", client_id = %cx.client_id(), mode, "already activated in the requested mode");
					Ok(Flow::Continue(State::ConfigureTls))
				}
				mode => Ok(Flow::Fail(format!(
					"device is already activated in {} mode; deactivate it before activating in {}",
					if mode == 1 { "client control" } else { "admin control" },
					if self.mode() == ActivationMode::Admin { "admin control" } else { "client control" }
				))),
			},
			State::GetGeneralSettings => {
				let response = cx.invoke(&amt::general_settings_get()).await?;
				let realm = response.instance(amt::GENERAL_SETTINGS).and_then(|s| text(s, "DigestRealm"));
				match realm {
					Some(realm) if DigestChallenge::realm_is_valid(realm) => {
						self.realm = Some(realm.to_string());
						Ok(Flow::Continue(match self.mode() {
							ActivationMode::Client => State::Setup,
							ActivationMode::Admin => State::AddNextCertInChain,
						}))
					}
					Some(realm) => Ok(Flow::Fail(format!("invalid digest realm '{realm}'"))),
					None => Ok(Flow::Fail("general settings carry no digest realm".into())),
				}
			}
			State::Setup => {
				let Some(hash) = self.hashed_password() else {
					return Ok(Flow::Retry(State::GetGeneralSettings));
				};
				let response = cx.invoke(&ips::setup(&hash)).await?;
				let flow = returned(&response, "Setup", State::SaveCredentials);
				if matches!(flow, Flow::Continue(_)) {
					cx.session().set_credentials(ADMIN, &self.amt_password);
				}
				Ok(flow)
			}
			State::AddNextCertInChain => {
				let Some(domain) = &self.domain else {
					return Ok(Flow::Fail("admin control activation requires a provisioning domain".into()));
				};
				let chain = &domain.certificate_chain;
				let Some(certificate) = chain.get(self.next_cert) else {
					return Ok(Flow::Fail(format!("provisioning certificate chain of domain '{}' is empty", domain.name)));
				};
				let is_leaf = self.next_cert == 0;
				let is_root = self.next_cert + 1 == chain.len();
				let response = cx.invoke(&ips::add_next_cert_in_chain(certificate, is_leaf, is_root)).await?;
				if let Err(reason) = check_return(&response, "AddNextCertInChain") {
					return Ok(Flow::Fail(reason));
				}
				debug!(target = "rps.workflow", client_id = %cx.client_id(), index = self.next_cert, is_leaf, is_root, "certificate added to chain");
				self.next_cert += 1;
				Ok(Flow::Continue(if is_root { State::GetConfigurationNonce } else { State::AddNextCertInChain }))
			}
			State::GetConfigurationNonce => {
				let response = cx.invoke(&ips::host_based_setup_get()).await?;
				let nonce = response.instance(ips::HOST_BASED_SETUP_SERVICE).and_then(|s| text(s, "ConfigurationNonce"));
				match nonce.map(|n| STANDARD.decode(n)) {
					Some(Ok(nonce)) => {
						self.configuration_nonce = Some(nonce);
						Ok(Flow::Continue(State::AdminSetup))
					}
					Some(Err(err)) => Ok(Flow::Fail(format!("malformed configuration nonce: {err}"))),
					None => Ok(Flow::Fail("setup service reports no configuration nonce".into())),
				}
			}
			State::AdminSetup => {
				let (Some(hash), Some(nonce), Some(domain)) = (self.hashed_password(), self.configuration_nonce.clone(), self.domain.clone()) else {
					return Ok(Flow::Retry(State::GetGeneralSettings));
				};
				let mut mc_nonce = [0u8; MC_NONCE_LEN];
				rand::thread_rng().fill_bytes(&mut mc_nonce);
				let mut signed = nonce;
				signed.extend_from_slice(&mc_nonce);
				let signature = cx.collaborators().certificates.sign_provisioning_nonce(&domain, &signed).await?;

				let response = cx.invoke(&ips::admin_setup(&hash, &STANDARD.encode(mc_nonce), &signature)).await?;
				let flow = returned(&response, "AdminSetup", self.after_activation());
				if matches!(flow, Flow::Continue(_)) {
					cx.session().set_credentials(ADMIN, &self.amt_password);
				}
				Ok(flow)
			}
			State::SetMebxPassword => {
				let Some(mebx) = &self.mebx_password else {
					return Ok(Flow::Continue(State::SaveCredentials));
				};
				let response = cx.invoke(&amt::set_mebx_password(mebx)).await?;
				Ok(returned(&response, "SetMEBxPassword", State::SaveCredentials))
			}
			State::SaveCredentials => {
				let credentials = DeviceCredentials {
					amt_password: self.amt_password.clone(),
					mebx_password: self.mebx_password.clone(),
				};
				cx.collaborators().secrets.store_credentials(&self.device.guid, &credentials).await?;
				Ok(Flow::Continue(State::UpdateRemoteAccess))
			}
			State::UpdateRemoteAccess => {
				let record = DeviceRecord {
					guid: self.device.guid.clone(),
					hostname: self.device.hostname.clone(),
					dns_suffix: self.device.dns_suffix().map(str::to_string),
					friendly_name: self.device.friendly_name.clone(),
					tags: Some(self.profile.tags.clone()),
					tenant_id: self.profile.tenant_id.clone(),
				};
				cx.collaborators().remote_access.update_device(&record).await?;
				cx.set_status(StatusCategory::Overall, self.mode().status());
				Ok(Flow::Continue(State::ConfigureTls))
			}
			State::ConfigureTls => {
				let Some(mode) = self.profile.tls_mode else {
					return Ok(Flow::Continue(State::ConfigureIeee8021x));
				};
				let mut tls = TlsEnrollment::new(self.device.clone(), mode);
				Ok(match run(&mut tls, cx).await {
					Ok(()) => Flow::Continue(State::ConfigureIeee8021x),
					Err(reason) => Flow::Fail(format!("TLS configuration failed: {reason}")),
				})
			}
			State::ConfigureIeee8021x => {
				if self.profile.ieee8021x.is_none() {
					return Ok(Flow::Succeed);
				}
				let mut enrollment = Ieee8021xEnrollment::new(self.device.clone(), self.profile.ieee8021x.clone());
				Ok(match run(&mut enrollment, cx).await {
					Ok(()) => Flow::Succeed,
					Err(reason) => Flow::Fail(format!("802.1x configuration failed: {reason}")),
				})
			}
		}
	}

	fn success_status(&self) -> String {
		self.mode().status().into()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::workflow::{execute, testing};

	fn profile(mode: ActivationMode) -> Profile {
		Profile {
			name: "p".into(),
			tenant_id: String::new(),
			activation: mode,
			amt_password: Some("Amt#Passw0rd".into()),
			mebx_password: None,
			generate_random_password: false,
			generate_random_mebx_password: false,
			tls_mode: None,
			ieee8021x: None,
			tags: Vec::new(),
		}
	}

	#[test]
	fn random_password_when_requested() {
		let mut random = profile(ActivationMode::Client);
		random.generate_random_password = true;
		random.generate_random_mebx_password = true;
		let activation = Activation::new(DeviceInfo::default(), random, None);
		assert_ne!(activation.amt_password, "Amt#Passw0rd");
		assert!(password::is_compliant(&activation.amt_password));
		assert!(activation.mebx_password.as_deref().is_some_and(password::is_compliant));
	}

	#[tokio::test]
	async fn rejects_device_in_other_mode_without_exchange() {
		let (cx, controller) = testing::context(testing::collaborators());
		let device = DeviceInfo {
			current_mode: 1,
			..DeviceInfo::default()
		};
		let reason = execute(Activation::new(device, profile(ActivationMode::Admin), None), cx.clone()).await.unwrap_err();
		assert!(reason.contains("client control mode"));
		assert_eq!(controller.sent_count(), 1);
		assert_eq!(controller.sent()[0].message.status, "failed");
	}

	#[tokio::test]
	async fn already_activated_skips_to_handoff() {
		let (cx, controller) = testing::context(testing::collaborators());
		let device = DeviceInfo {
			current_mode: 1,
			..DeviceInfo::default()
		};
		execute(Activation::new(device, profile(ActivationMode::Client), None), cx.clone()).await.unwrap();
		assert_eq!(cx.session().status().get(StatusCategory::Overall), Some("Client control mode."));
		assert_eq!(controller.sent_count(), 1);
	}
}
