//! Static IP synchronization of the wired port.
//!
//! Only applies to a wired port using shared static addressing; wireless-only
//! devices and DHCP configurations are reported as not applicable.

use async_trait::async_trait;
use rps_protocol::wsman::{Envelope, Param, amt, properties_from_json};
use rps_runtime::StatusCategory;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::workflow::{Context, Flow, Workflow, text};

/// Addressing the host reports for its wired interface.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfiguration {
	pub ip_address: String,
	#[serde(default)]
	pub netmask: Option<String>,
	#[serde(default)]
	pub gateway: Option<String>,
	#[serde(default)]
	pub primary_dns: Option<String>,
	#[serde(default)]
	pub secondary_dns: Option<String>,
}

impl IpConfiguration {
	/// Engine property names paired with the desired values that are set.
	fn properties(&self) -> Vec<(&'static str, &str)> {
		let mut properties = vec![("IPAddress", self.ip_address.as_str())];
		let optional = [
			("SubnetMask", &self.netmask),
			("DefaultGateway", &self.gateway),
			("PrimaryDNS", &self.primary_dns),
			("SecondaryDNS", &self.secondary_dns),
		];
		properties.extend(optional.into_iter().filter_map(|(name, value)| value.as_deref().map(|v| (name, v))));
		properties
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	PullPortSettings,
	PutPortSettings,
}

#[derive(Debug)]
pub struct IpSync {
	desired: IpConfiguration,
	wired: Option<Map<String, Value>>,
	outcome: &'static str,
}

impl IpSync {
	pub fn new(desired: IpConfiguration) -> Self {
		Self {
			desired,
			wired: None,
			outcome: "Synchronized",
		}
	}

	fn not_applicable(&mut self, why: &'static str) -> Flow<State> {
		self.outcome = why;
		Flow::Succeed
	}
}

fn flag(instance: &Map<String, Value>, name: &str) -> bool {
	text(instance, name).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

#[async_trait]
impl Workflow for IpSync {
	type State = State;

	const NAME: &'static str = "ip-sync";
	const CATEGORY: StatusCategory = StatusCategory::Network;

	fn initial(&self) -> State {
		State::PullPortSettings
	}

	async fn step(&mut self, cx: &Context, state: State) -> Result<Flow<State>> {
		match state {
			State::PullPortSettings => {
				let ports = cx.enumerate(amt::ETHERNET_PORT_SETTINGS).await?;
				let Some(wired) = ports.into_iter().find(|p| text(p, "InstanceID") == Some(amt::WIRED_PORT_INSTANCE)) else {
					return Ok(self.not_applicable("Not applicable: no wired interface"));
				};
				if flag(&wired, "DHCPEnabled") || !flag(&wired, "SharedStaticIp") {
					return Ok(self.not_applicable("Not applicable: wired interface is not using shared static addressing"));
				}
				let in_sync = self.desired.properties().into_iter().all(|(name, value)| text(&wired, name) == Some(value));
				if in_sync {
					self.outcome = "Already synchronized";
					return Ok(Flow::Succeed);
				}
				self.wired = Some(wired);
				Ok(Flow::Continue(State::PutPortSettings))
			}
			State::PutPortSettings => {
				let Some(wired) = &self.wired else {
					return Ok(Flow::Retry(State::PullPortSettings));
				};
				let mut properties = properties_from_json(wired);
				for (name, value) in self.desired.properties() {
					match properties.iter_mut().find(|(n, _)| n == name) {
						Some((_, param)) => *param = Param::text(value),
						None => properties.push((name.to_string(), Param::text(value))),
					}
				}
				let envelope = Envelope::put(amt::ETHERNET_PORT_SETTINGS, &properties).with_selector("InstanceID", amt::WIRED_PORT_INSTANCE);
				let response = cx.invoke(&envelope).await?;
				let applied = response
					.instance(amt::ETHERNET_PORT_SETTINGS)
					.is_some_and(|instance| text(instance, "IPAddress") == Some(self.desired.ip_address.as_str()));
				Ok(if applied { Flow::Succeed } else { Flow::Fail("engine did not apply the IP configuration".into()) })
			}
		}
	}

	fn success_status(&self) -> String {
		self.outcome.into()
	}
}

#[cfg(test)]
mod tests {
	use rps_runtime::Invoker;
	use rps_runtime::fake_transport::{FakeTransportController, reply_ok};

	use super::*;
	use crate::workflow::{execute, testing};

	fn desired() -> IpConfiguration {
		IpConfiguration {
			ip_address: "192.168.1.50".into(),
			netmask: Some("255.255.255.0".into()),
			gateway: None,
			primary_dns: None,
			secondary_dns: None,
		}
	}

	fn port(instance: &str, dhcp: bool, shared: bool, ip: &str) -> String {
		format!(
			"<g:AMT_EthernetPortSettings><g:InstanceID>{instance}</g:InstanceID><g:DHCPEnabled>{dhcp}</g:DHCPEnabled><g:SharedStaticIp>{shared}</g:SharedStaticIp><g:IPAddress>{ip}</g:IPAddress><g:SubnetMask>255.255.255.0</g:SubnetMask></g:AMT_EthernetPortSettings>"
		)
	}

	async fn answer_enumeration(cx: &Context, controller: &mut FakeTransportController, items: &str) {
		let enumerate = controller.next_sent().await.unwrap();
		let body = "<e:EnumerateResponse xmlns:e=\"x\"><e:EnumerationContext>ctx-1</e:EnumerationContext></e:EnumerateResponse>";
		Invoker::deliver(cx.session(), &reply_ok(&enumerate.message_id().unwrap(), body));
		let pull = controller.next_sent().await.unwrap();
		let body = format!("<e:PullResponse xmlns:e=\"x\" xmlns:g=\"y\"><e:Items>{items}</e:Items><e:EndOfSequence/></e:PullResponse>");
		Invoker::deliver(cx.session(), &reply_ok(&pull.message_id().unwrap(), &body));
	}

	#[tokio::test]
	async fn updates_shared_static_wired_port() {
		let (cx, mut controller) = testing::context(testing::collaborators());
		let task = tokio::spawn(execute(IpSync::new(desired()), cx.clone()));

		answer_enumeration(&cx, &mut controller, &port(amt::WIRED_PORT_INSTANCE, false, true, "192.168.1.10")).await;

		let put = controller.next_sent().await.unwrap();
		let request = put.request.as_ref().unwrap();
		assert_eq!(request.body["AMT_EthernetPortSettings"]["IPAddress"], "192.168.1.50");
		let reply = "<g:AMT_EthernetPortSettings xmlns:g=\"y\"><g:IPAddress>192.168.1.50</g:IPAddress></g:AMT_EthernetPortSettings>";
		Invoker::deliver(cx.session(), &reply_ok(&put.message_id().unwrap(), reply));

		task.await.unwrap().unwrap();
		assert_eq!(cx.session().status().get(StatusCategory::Network), Some("Synchronized"));
	}

	#[tokio::test]
	async fn dhcp_port_is_not_applicable() {
		let (cx, mut controller) = testing::context(testing::collaborators());
		let task = tokio::spawn(execute(IpSync::new(desired()), cx.clone()));

		answer_enumeration(&cx, &mut controller, &port(amt::WIRED_PORT_INSTANCE, true, false, "10.0.0.2")).await;

		task.await.unwrap().unwrap();
		assert!(cx.session().status().get(StatusCategory::Network).unwrap().starts_with("Not applicable"));
		assert_eq!(controller.sent_count(), 3);
	}

	#[tokio::test]
	async fn wireless_only_is_not_applicable() {
		let (cx, mut controller) = testing::context(testing::collaborators());
		let task = tokio::spawn(execute(IpSync::new(desired()), cx.clone()));

		answer_enumeration(&cx, &mut controller, &port("Intel(r) AMT Ethernet Port Settings 1", false, true, "10.0.0.2")).await;

		task.await.unwrap().unwrap();
		assert_eq!(cx.session().status().get(StatusCategory::Network), Some("Not applicable: no wired interface"));
	}
}
