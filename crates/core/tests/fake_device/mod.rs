//! A scripted device on the far end of a dispatcher session.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rps::memory::{MemoryCertificateAuthority, MemoryRemoteAccess, MemorySecrets, StaticDomains, StaticProfiles};
use rps::{ActivationMode, Collaborators, Dispatched, Dispatcher, Domain, EngineSettings, Profile, Services};
use rps_protocol::ServerMsg;
use rps_runtime::fake_transport::{FakeTransportBuilder, FakeTransportController, SentFrame, reply_ok};
use rps_runtime::{EnterpriseAssistant, Session, SessionRegistry, Settlement};
use serde_json::{Value, json};

pub const CLIENT_ID: &str = "7f0c7c4e-2f3a-4b51-9a55-2d6f01c3a9e1";
pub const GUID: &str = "4c4c4544-0035-5910-8044-b9c04f564d33";
pub const REALM: &str = "Digest:A3829B3827DE4D33D4449B366831FD01";
pub const PROFILE_PASSWORD: &str = "Amt#Passw0rd1";

pub fn profile(name: &str, activation: ActivationMode) -> Profile {
	Profile {
		name: name.into(),
		tenant_id: String::new(),
		activation,
		amt_password: Some(PROFILE_PASSWORD.into()),
		mebx_password: None,
		generate_random_password: false,
		generate_random_mebx_password: false,
		tls_mode: None,
		ieee8021x: None,
		tags: vec!["lab".into()],
	}
}

pub struct Setup {
	pub profiles: Vec<Profile>,
	pub domains: Vec<Domain>,
	pub secrets: MemorySecrets,
}

impl Default for Setup {
	fn default() -> Self {
		Self {
			profiles: Vec::new(),
			domains: Vec::new(),
			secrets: MemorySecrets::new(),
		}
	}
}

pub struct FakeDevice {
	pub dispatcher: Dispatcher,
	pub session: Arc<Session>,
	pub controller: FakeTransportController,
	pub secrets: Arc<MemorySecrets>,
	pub remote_access: Arc<MemoryRemoteAccess>,
	pub certificates: Arc<MemoryCertificateAuthority>,
}

impl FakeDevice {
	pub fn connect(setup: Setup) -> Self {
		let secrets = Arc::new(setup.secrets);
		let remote_access = Arc::new(MemoryRemoteAccess::new());
		let certificates = Arc::new(MemoryCertificateAuthority::default());
		let collaborators = Collaborators {
			profiles: Arc::new(StaticProfiles::new(setup.profiles)),
			domains: Arc::new(StaticDomains::new(setup.domains)),
			secrets: secrets.clone(),
			remote_access: remote_access.clone(),
			certificates: certificates.clone(),
		};
		let settings = EngineSettings {
			tls_settle: Duration::from_millis(10),
			..EngineSettings::default()
		};
		let services = Services::new(settings, SessionRegistry::new(), Arc::new(EnterpriseAssistant::default()), collaborators);
		let dispatcher = Dispatcher::new(Arc::new(services));

		let (transport, controller) = FakeTransportBuilder::new().build();
		let session = dispatcher.connect(CLIENT_ID, transport);
		Self {
			dispatcher,
			session,
			controller,
			secrets,
			remote_access,
			certificates,
		}
	}

	/// Sends a command envelope whose payload is `payload`.
	pub async fn command(&self, method: &str, payload: Value) -> rps::Result<Dispatched> {
		let raw = json!({
			"method": method,
			"apiKey": "key",
			"appVersion": "2.3.0",
			"protocolVersion": "4.0.0",
			"status": "ok",
			"message": "ok",
			"payload": STANDARD.encode(payload.to_string()),
		});
		self.dispatcher.handle(CLIENT_ID, &raw.to_string()).await
	}

	/// Relays a raw HTTP reply the way the device agent does.
	pub async fn reply(&self, http: &[u8]) -> Settlement {
		let raw = json!({
			"method": "response",
			"apiKey": "key",
			"appVersion": "2.3.0",
			"protocolVersion": "4.0.0",
			"status": "ok",
			"message": "ok",
			"payload": STANDARD.encode(http),
		});
		match self.dispatcher.handle(CLIENT_ID, &raw.to_string()).await {
			Ok(Dispatched::Reply(settlement)) => settlement,
			other => panic!("unexpected dispatch outcome: {other:?}"),
		}
	}

	pub async fn next_frame(&mut self) -> SentFrame {
		tokio::time::timeout(Duration::from_secs(5), self.controller.next_sent())
			.await
			.expect("server went quiet")
			.expect("transport closed")
	}

	/// Answers every request with `respond` until the server sends a terminal
	/// notification, which is returned.
	pub async fn serve(&mut self, mut respond: impl FnMut(&SentFrame) -> String) -> ServerMsg {
		loop {
			let frame = self.next_frame().await;
			if frame.request.is_none() {
				return frame.message;
			}
			let body = respond(&frame);
			let message_id = frame.message_id().expect("request without MessageID");
			assert_eq!(self.reply(&reply_ok(&message_id, &body)).await, Settlement::Resolved);
		}
	}
}

pub fn activation_payload(profile: &str) -> Value {
	json!({
		"ver": "16.1.25",
		"build": "3425",
		"uuid": GUID,
		"username": "admin",
		"password": "P@ssw0rd",
		"currentMode": 0,
		"hostname": "host1",
		"fqdn": "host1.vprodemo.com",
		"client": "rpc",
		"certHashes": [],
		"profile": profile,
	})
}

pub fn general_settings() -> String {
	format!(r#"<g:AMT_GeneralSettings xmlns:g="x"><g:DigestRealm>{REALM}</g:DigestRealm><g:HostName>host1</g:HostName></g:AMT_GeneralSettings>"#)
}

pub fn output(method: &str, extra: &str) -> String {
	format!(r#"<g:{method}_OUTPUT xmlns:g="x">{extra}<g:ReturnValue>0</g:ReturnValue></g:{method}_OUTPUT>"#)
}

pub fn reference(name: &str, instance: &str) -> String {
	format!(
		r#"<g:{name} xmlns:w="urn:w"><a:Address>/wsman</a:Address><a:ReferenceParameters><w:ResourceURI>x</w:ResourceURI><w:SelectorSet><w:Selector Name="InstanceID">{instance}</w:Selector></w:SelectorSet></a:ReferenceParameters></g:{name}>"#
	)
}

pub fn enumerate_response() -> String {
	r#"<g:EnumerateResponse xmlns:g="x"><g:EnumerationContext>ctx-1</g:EnumerationContext></g:EnumerateResponse>"#.into()
}

pub fn pull_response(items: &str) -> String {
	format!(r#"<g:PullResponse xmlns:g="x"><g:Items>{items}</g:Items><g:EndOfSequence/></g:PullResponse>"#)
}

pub fn notification_message(message: &ServerMsg) -> Value {
	serde_json::from_str(&message.message).expect("notification message is status JSON")
}
