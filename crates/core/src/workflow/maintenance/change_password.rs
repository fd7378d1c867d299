//! Rotates the admin password and records it with the secrets store.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rps_protocol::DigestChallenge;
use rps_protocol::digest::hash_credentials_raw;
use rps_protocol::wsman::amt;
use rps_runtime::StatusCategory;

use crate::collaborators::DeviceCredentials;
use crate::device::DeviceInfo;
use crate::error::Result;
use crate::password;
use crate::workflow::{Context, Flow, Workflow, check_return, text};

const ADMIN: &str = "admin";
const METHOD: &str = "SetAdminAclEntryEx";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	GetGeneralSettings,
	SetAdminAclEntry,
	StoreCredentials,
}

pub struct ChangePassword {
	device: DeviceInfo,
	password: String,
	realm: Option<String>,
}

impl ChangePassword {
	/// Uses `password` when given, otherwise a random compliant one.
	pub fn new(device: DeviceInfo, password: Option<String>) -> Self {
		Self {
			device,
			password: password.unwrap_or_else(|| password::generate(password::MAX_LEN)),
			realm: None,
		}
	}
}

impl std::fmt::Debug for ChangePassword {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChangePassword").field("device", &self.device.guid).field("realm", &self.realm).finish_non_exhaustive()
	}
}

#[async_trait]
impl Workflow for ChangePassword {
	type State = State;

	const NAME: &'static str = "change-password";
	const CATEGORY: StatusCategory = StatusCategory::Overall;

	fn initial(&self) -> State {
		State::GetGeneralSettings
	}

	async fn step(&mut self, cx: &Context, state: State) -> Result<Flow<State>> {
		match state {
			State::GetGeneralSettings => {
				let response = cx.invoke(&amt::general_settings_get()).await?;
				let realm = response.instance(amt::GENERAL_SETTINGS).and_then(|s| text(s, "DigestRealm"));
				match realm {
					Some(realm) if DigestChallenge::realm_is_valid(realm) => {
						self.realm = Some(realm.to_string());
						Ok(Flow::Continue(State::SetAdminAclEntry))
					}
					Some(realm) => Ok(Flow::Fail(format!("invalid digest realm '{realm}'"))),
					None => Ok(Flow::Fail("general settings carry no digest realm".into())),
				}
			}
			State::SetAdminAclEntry => {
				let Some(realm) = &self.realm else {
					return Ok(Flow::Retry(State::GetGeneralSettings));
				};
				let digest = STANDARD.encode(hash_credentials_raw(ADMIN, realm, &self.password));
				let response = cx.invoke(&amt::set_admin_acl_entry(ADMIN, &digest)).await?;
				if let Err(reason) = check_return(&response, METHOD) {
					return Ok(Flow::Fail(reason));
				}
				cx.session().set_credentials(ADMIN, &self.password);
				Ok(Flow::Continue(State::StoreCredentials))
			}
			State::StoreCredentials => {
				let secrets = &cx.collaborators().secrets;
				let mebx_password = secrets.credentials(&self.device.guid).await?.and_then(|c| c.mebx_password);
				let credentials = DeviceCredentials {
					amt_password: self.password.clone(),
					mebx_password,
				};
				secrets.store_credentials(&self.device.guid, &credentials).await?;
				Ok(Flow::Succeed)
			}
		}
	}

	fn success_status(&self) -> String {
		"Password updated".into()
	}
}
