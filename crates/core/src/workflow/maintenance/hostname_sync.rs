//! Hostname synchronization between the host OS and the engine.

use async_trait::async_trait;
use rps_protocol::wsman::{Envelope, Param, amt, properties_from_json};
use rps_runtime::StatusCategory;
use serde_json::{Map, Value};

use crate::collaborators::DeviceRecord;
use crate::device::DeviceInfo;
use crate::error::Result;
use crate::workflow::{Context, Flow, Workflow, text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	GetGeneralSettings,
	PutGeneralSettings,
	UpdateRemoteAccess,
}

#[derive(Debug)]
pub struct HostnameSync {
	device: DeviceInfo,
	hostname: String,
	dns_suffix: Option<String>,
	settings: Option<Map<String, Value>>,
	changed: bool,
}

impl HostnameSync {
	pub fn new(device: DeviceInfo, hostname: String, dns_suffix: Option<String>) -> Self {
		Self {
			device,
			hostname,
			dns_suffix,
			settings: None,
			changed: false,
		}
	}
}

#[async_trait]
impl Workflow for HostnameSync {
	type State = State;

	const NAME: &'static str = "hostname-sync";
	const CATEGORY: StatusCategory = StatusCategory::Overall;

	fn initial(&self) -> State {
		State::GetGeneralSettings
	}

	async fn step(&mut self, cx: &Context, state: State) -> Result<Flow<State>> {
		match state {
			State::GetGeneralSettings => {
				let response = cx.invoke(&amt::general_settings_get()).await?;
				let Some(settings) = response.instance(amt::GENERAL_SETTINGS) else {
					return Ok(Flow::Fail("general settings missing from reply".into()));
				};
				let same_host = text(settings, "HostName") == Some(self.hostname.as_str());
				let same_domain = self.dns_suffix.as_deref().is_none_or(|suffix| text(settings, "DomainName") == Some(suffix));
				if same_host && same_domain {
					return Ok(Flow::Continue(State::UpdateRemoteAccess));
				}
				self.settings = Some(settings.clone());
				Ok(Flow::Continue(State::PutGeneralSettings))
			}
			State::PutGeneralSettings => {
				let Some(settings) = &self.settings else {
					return Ok(Flow::Retry(State::GetGeneralSettings));
				};
				let mut properties = properties_from_json(settings);
				let mut updates = vec![("HostName", self.hostname.as_str())];
				if let Some(suffix) = &self.dns_suffix {
					updates.push(("DomainName", suffix.as_str()));
				}
				for (name, value) in updates {
					match properties.iter_mut().find(|(n, _)| n == name) {
						Some((_, param)) => *param = Param::text(value),
						None => properties.push((name.to_string(), Param::text(value))),
					}
				}
				let response = cx.invoke(&Envelope::put(amt::GENERAL_SETTINGS, &properties)).await?;
				let applied = response
					.instance(amt::GENERAL_SETTINGS)
					.is_some_and(|settings| text(settings, "HostName") == Some(self.hostname.as_str()));
				if !applied {
					return Ok(Flow::Fail("engine did not apply the hostname".into()));
				}
				self.changed = true;
				Ok(Flow::Continue(State::UpdateRemoteAccess))
			}
			State::UpdateRemoteAccess => {
				let record = DeviceRecord {
					guid: self.device.guid.clone(),
					hostname: Some(self.hostname.clone()),
					dns_suffix: self.dns_suffix.clone(),
					friendly_name: self.device.friendly_name.clone(),
					tags: None,
					tenant_id: self.device.tenant_id.clone(),
				};
				cx.collaborators().remote_access.update_device(&record).await?;
				Ok(Flow::Succeed)
			}
		}
	}

	fn success_status(&self) -> String {
		if self.changed { format!("Hostname synchronized to {}", self.hostname) } else { "Hostname already synchronized".into() }
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use rps_runtime::Invoker;
	use rps_runtime::fake_transport::reply_ok;

	use super::*;
	use crate::memory::MemoryRemoteAccess;
	use crate::workflow::{execute, testing};

	const GENERAL: &str = "<g:AMT_GeneralSettings xmlns:g=\"x\"><g:DomainName>corp.example.com</g:DomainName><g:HostName>old-host</g:HostName><g:DigestRealm>Digest:A3829B3827DE4D33D4449B366831FD01</g:DigestRealm></g:AMT_GeneralSettings>";

	#[tokio::test]
	async fn puts_new_hostname_and_notifies_registry() {
		let registry = Arc::new(MemoryRemoteAccess::new());
		let mut collaborators = testing::collaborators();
		collaborators.remote_access = registry.clone();
		let (cx, mut controller) = testing::context(collaborators);
		let device = DeviceInfo {
			guid: "4c4c4544-0044-4210-8031-b2c04f504d33".into(),
			..DeviceInfo::default()
		};
		let task = tokio::spawn(execute(HostnameSync::new(device, "new-host".into(), None), cx.clone()));

		let get = controller.next_sent().await.unwrap();
		Invoker::deliver(cx.session(), &reply_ok(&get.message_id().unwrap(), GENERAL));

		let put = controller.next_sent().await.unwrap();
		let body = &put.request.as_ref().unwrap().body["AMT_GeneralSettings"];
		assert_eq!(body["HostName"], "new-host");
		assert_eq!(body["DomainName"], "corp.example.com");
		Invoker::deliver(cx.session(), &reply_ok(&put.message_id().unwrap(), &GENERAL.replace("old-host", "new-host")));

		task.await.unwrap().unwrap();
		let updates = registry.updates();
		assert_eq!(updates.len(), 1);
		assert_eq!(updates[0].hostname.as_deref(), Some("new-host"));
		assert!(serde_json::to_value(&updates[0]).unwrap().get("tags").is_none());
		assert_eq!(cx.session().status().get(StatusCategory::Overall), Some("Hostname synchronized to new-host"));
	}

	#[tokio::test]
	async fn skips_put_when_already_in_sync() {
		let (cx, mut controller) = testing::context(testing::collaborators());
		let task = tokio::spawn(execute(HostnameSync::new(DeviceInfo::default(), "old-host".into(), None), cx.clone()));

		let get = controller.next_sent().await.unwrap();
		Invoker::deliver(cx.session(), &reply_ok(&get.message_id().unwrap(), GENERAL));

		task.await.unwrap().unwrap();
		assert_eq!(controller.next_sent().await.unwrap().message.status, "success");
		assert_eq!(cx.session().status().get(StatusCategory::Overall), Some("Hostname already synchronized"));
	}
}
