//! Returns a device to pre-provisioning and forgets it.

use async_trait::async_trait;
use rps_protocol::wsman::amt;
use rps_runtime::StatusCategory;
use tracing::info;

use crate::device::DeviceInfo;
use crate::error::Result;
use crate::workflow::{Context, Flow, Workflow, check_return};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	Unprovision,
	DeleteSecrets,
	DeleteRemoteAccess,
}

#[derive(Debug)]
pub struct Deactivation {
	device: DeviceInfo,
}

impl Deactivation {
	pub fn new(device: DeviceInfo) -> Self {
		Self { device }
	}
}

#[async_trait]
impl Workflow for Deactivation {
	type State = State;

	const NAME: &'static str = "deactivation";
	const CATEGORY: StatusCategory = StatusCategory::Overall;

	fn initial(&self) -> State {
		State::Unprovision
	}

	async fn step(&mut self, cx: &Context, state: State) -> Result<Flow<State>> {
		let guid = self.device.guid.as_str();
		match state {
			State::Unprovision => {
				let response = cx.invoke(&amt::unprovision()).await?;
				Ok(match check_return(&response, "Unprovision") {
					Ok(()) => Flow::Continue(State::DeleteSecrets),
					Err(reason) => Flow::Fail(reason),
				})
			}
			State::DeleteSecrets => match cx.collaborators().secrets.delete_credentials(guid).await {
				Ok(()) => Ok(Flow::Continue(State::DeleteRemoteAccess)),
				Err(err) if err.is_not_found() => {
					info!(target = "rps.workflow", client_id = %cx.client_id(), %guid, "no stored secrets; nothing to remove");
					Ok(Flow::Continue(State::DeleteRemoteAccess))
				}
				Err(err) => Err(err.into()),
			},
			State::DeleteRemoteAccess => match cx.collaborators().remote_access.delete_device(guid).await {
				Ok(()) => Ok(Flow::Succeed),
				Err(err) if err.is_not_found() => {
					info!(target = "rps.workflow", client_id = %cx.client_id(), %guid, "device unknown to remote access registry");
					Ok(Flow::Succeed)
				}
				Err(err) => Err(err.into()),
			},
		}
	}

	fn success_status(&self) -> String {
		"Deactivated".into()
	}
}
