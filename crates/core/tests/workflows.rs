//! End-to-end workflow runs through the dispatcher against a scripted device.

mod fake_device;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use fake_device::*;
use rps::memory::MemorySecrets;
use std::sync::Arc;

use rps::{ActivationMode, DeviceCredentials, Dispatched, Domain, Error, Ieee8021xProfile, TlsMode};
use rps_protocol::ServerMethod;
use rps_protocol::digest::hash_credentials;
use rps_protocol::wsman::{amt, ips};
use rps_runtime::ChannelTransport;
use rps_runtime::fake_transport::{SentFrame, reply_unauthorized};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

const KEY_PAIR: &str = "Intel(r) AMT Key: Handle: 0";
const CERTIFICATE: &str = "Intel(r) AMT Certificate: Handle: 1";
const RADIUS_ROOT: &str = "Intel(r) AMT Certificate: Handle: 2";

fn started(dispatched: rps::Result<Dispatched>) -> tokio::task::JoinHandle<Result<(), String>> {
	match dispatched {
		Ok(Dispatched::Started(handle)) => handle,
		other => panic!("command did not start a workflow: {other:?}"),
	}
}

/// Answers the client control activation exchange.
fn ccm_device(frame: &SentFrame) -> Option<String> {
	if frame.invokes("Setup") {
		return Some(output("Setup", ""));
	}
	if frame.targets(amt::GENERAL_SETTINGS) {
		return Some(general_settings());
	}
	None
}

fn tls_device(frame: &SentFrame) -> String {
	if let Some(body) = ccm_device(frame) {
		return body;
	}
	if frame.invokes("Enumerate") {
		return enumerate_response();
	}
	if frame.invokes("Pull") {
		if frame.targets(amt::PUBLIC_PRIVATE_KEY_PAIR) {
			return pull_response(&format!(
				"<g:AMT_PublicPrivateKeyPair><g:InstanceID>{KEY_PAIR}</g:InstanceID><g:DERKey>MIIBCgKCAQEAv3</g:DERKey></g:AMT_PublicPrivateKeyPair>"
			));
		}
		if frame.targets(amt::TLS_SETTING_DATA) {
			return pull_response(&format!(
				concat!(
					"<g:AMT_TLSSettingData><g:ElementName>Intel(r) AMT 802.3 TLS Settings</g:ElementName><g:Enabled>false</g:Enabled><g:InstanceID>{}</g:InstanceID></g:AMT_TLSSettingData>",
					"<g:AMT_TLSSettingData><g:ElementName>Intel(r) AMT LMS TLS Settings</g:ElementName><g:Enabled>false</g:Enabled><g:InstanceID>{}</g:InstanceID></g:AMT_TLSSettingData>"
				),
				amt::REMOTE_TLS_INSTANCE,
				amt::LOCAL_TLS_INSTANCE
			));
		}
		return pull_response("");
	}
	for method in ["AddTrustedRootCertificate", "SetHighAccuracyTimeSynch", "CommitChanges"] {
		if frame.invokes(method) {
			return output(method, "");
		}
	}
	if frame.invokes("GenerateKeyPair") {
		return output("GenerateKeyPair", &reference("KeyPair", KEY_PAIR));
	}
	if frame.invokes("AddCertificate") {
		return output("AddCertificate", &reference("CreatedCertificate", CERTIFICATE));
	}
	if frame.invokes("GetLowAccuracyTimeSynch") {
		return output("GetLowAccuracyTimeSynch", "<g:Ta0>1700000000</g:Ta0>");
	}
	if frame.invokes("Create") {
		return r#"<g:ResourceCreated xmlns:g="x"/>"#.into();
	}
	if frame.invokes("Put") {
		return r#"<g:AMT_TLSSettingData xmlns:g="x"/>"#.into();
	}
	panic!("unscripted request: {:?} {:?}", frame.action(), frame.resource_uri());
}

/// Adds the 802.1x settings and signing calls on top of the TLS script.
fn ieee8021x_device(frame: &SentFrame) -> String {
	if frame.targets(ips::IEEE8021X_SETTINGS) {
		if frame.invokes("SetCertificates") {
			return output("SetCertificates", "");
		}
		return concat!(
			r#"<g:IPS_IEEE8021xSettings xmlns:g="x"><g:ElementName>Intel(r) AMT: 8021X Settings</g:ElementName>"#,
			r#"<g:Enabled>3</g:Enabled><g:InstanceID>Intel(r) AMT: 8021X Settings</g:InstanceID></g:IPS_IEEE8021xSettings>"#
		)
		.into();
	}
	if frame.invokes("GeneratePKCS10RequestEx") {
		return output("GeneratePKCS10RequestEx", "<g:SignedCertificateRequest>c2lnbmVkLWNzcg==</g:SignedCertificateRequest>");
	}
	if frame.invokes("AddTrustedRootCertificate") {
		return output("AddTrustedRootCertificate", &reference("CreatedCertificate", RADIUS_ROOT));
	}
	tls_device(frame)
}

#[tokio::test]
async fn deactivation_succeeds_when_no_secrets_are_stored() {
	let mut device = FakeDevice::connect(Setup::default());
	let handle = started(device.command("deactivation", json!({ "uuid": GUID, "password": "P@ssw0rd" })).await);

	let done = device
		.serve(|frame| {
			assert!(frame.invokes("Unprovision"));
			output("Unprovision", "")
		})
		.await;

	assert_eq!(done.method, ServerMethod::Success);
	assert_eq!(done.status, "success");
	assert_eq!(notification_message(&done)["Status"], "Deactivated");
	handle.await.unwrap().unwrap();
	assert!(!device.dispatcher.is_busy(CLIENT_ID));
}

#[tokio::test]
async fn deactivation_uses_stored_password() {
	let secrets = MemorySecrets::new().with_device(
		GUID,
		DeviceCredentials {
			amt_password: PROFILE_PASSWORD.into(),
			mebx_password: None,
		},
	);
	let mut device = FakeDevice::connect(Setup {
		secrets,
		..Setup::default()
	});
	let handle = started(device.command("deactivation", json!({ "uuid": GUID })).await);
	assert_eq!(device.session.params().password, PROFILE_PASSWORD);

	let done = device.serve(|_| output("Unprovision", "")).await;
	assert_eq!(done.status, "success");
	handle.await.unwrap().unwrap();
	assert!(device.secrets.get(GUID).is_none());
}

#[tokio::test]
async fn unknown_maintenance_task_fails_before_any_exchange() {
	let mut device = FakeDevice::connect(Setup::default());
	let err = device
		.command("maintenance", json!({ "uuid": GUID, "password": "P@ssw0rd", "task": "reboot" }))
		.await
		.unwrap_err();

	assert!(matches!(err, Error::UnknownTask { .. }));
	let message = err.to_string();
	assert!(message.contains(CLIENT_ID), "{message}");
	assert!(message.contains("reboot"), "{message}");

	let sent = device.next_frame().await;
	assert_eq!(sent.message.method, ServerMethod::Error);
	assert!(sent.request.is_none());
	assert!(device.controller.try_next_sent().is_none());
}

#[tokio::test]
async fn unreadable_messages_are_reported_to_the_device() {
	let device = FakeDevice::connect(Setup::default());
	for raw in ["not json", r#"{"method":"reboot","payload":""}"#] {
		let err = device.dispatcher.handle(CLIENT_ID, raw).await.unwrap_err();
		assert!(matches!(err, Error::Protocol(_)), "{err}");
	}
	let sent = device.controller.sent();
	assert_eq!(sent.len(), 2);
	assert!(sent.iter().all(|frame| frame.message.method == ServerMethod::Error && frame.request.is_none()));
	assert!(notification_message(&sent[0].message)["Status"].as_str().unwrap().starts_with("Failed: "));
}

#[tokio::test]
async fn incompatible_protocol_version_is_rejected() {
	let device = FakeDevice::connect(Setup::default());
	let raw = json!({
		"method": "deactivation",
		"protocolVersion": "5.0.0",
		"payload": STANDARD.encode(json!({ "uuid": GUID, "password": "P@ssw0rd" }).to_string()),
	});
	let err = device.dispatcher.handle(CLIENT_ID, &raw.to_string()).await.unwrap_err();
	assert!(err.to_string().contains("5.0.0"));
	assert_eq!(device.controller.sent_count(), 1);
	assert_eq!(device.controller.sent()[0].message.method, ServerMethod::Error);
}

#[tokio::test]
async fn activation_requires_a_known_profile() {
	let device = FakeDevice::connect(Setup::default());
	let err = device.command("activation", activation_payload("missing")).await.unwrap_err();
	assert!(matches!(err, Error::Validation(_)));
	assert!(err.to_string().contains("profile 'missing' not found"));
	assert_eq!(device.controller.sent_count(), 1);
}

#[tokio::test]
async fn client_control_activation() {
	let mut device = FakeDevice::connect(Setup {
		profiles: vec![profile("ccm", ActivationMode::Client)],
		..Setup::default()
	});
	let handle = started(device.command("activation", activation_payload("ccm")).await);

	let mut setup_request = None;
	let done = device
		.serve(|frame| {
			if frame.invokes("Setup") {
				setup_request = frame.http.clone();
			}
			ccm_device(frame).expect("unscripted request")
		})
		.await;

	assert_eq!(done.status, "success");
	assert_eq!(notification_message(&done)["Status"], "Client control mode.");
	handle.await.unwrap().unwrap();

	let setup_request = setup_request.expect("Setup was not sent");
	assert!(setup_request.contains(&hash_credentials("admin", REALM, PROFILE_PASSWORD)));

	assert_eq!(device.secrets.get(GUID).unwrap().amt_password, PROFILE_PASSWORD);
	let params = device.session.params();
	assert_eq!((params.username.as_str(), params.password.as_str()), ("admin", PROFILE_PASSWORD));
	let updates = device.remote_access.updates();
	assert_eq!(updates.len(), 1);
	assert_eq!(updates[0].tags, Some(vec!["lab".to_string()]));
	assert_eq!(updates[0].hostname.as_deref(), Some("host1"));
}

#[tokio::test]
async fn admin_control_activation_pushes_chain_and_signs_nonce() {
	let chain = vec![STANDARD.encode(b"leaf"), STANDARD.encode(b"intermediate"), STANDARD.encode(b"root")];
	let root_hash = hex::encode(Sha256::digest(b"root"));
	let mut payload = activation_payload("acm");
	payload["certHashes"] = json!([root_hash.to_uppercase()]);
	let mut device = FakeDevice::connect(Setup {
		profiles: vec![profile("acm", ActivationMode::Admin)],
		domains: vec![Domain {
			name: "vprodemo".into(),
			suffix: "vprodemo.com".into(),
			tenant_id: String::new(),
			certificate_chain: chain.clone(),
		}],
		..Setup::default()
	});
	let handle = started(device.command("activation", payload).await);

	let config_nonce = [7u8; 20];
	let mut pushed = Vec::new();
	let done = device
		.serve(|frame| {
			if frame.invokes("AddNextCertInChain") {
				pushed.push(frame.http.clone().unwrap_or_default());
				return output("AddNextCertInChain", "");
			}
			if frame.invokes("AdminSetup") {
				return output("AdminSetup", "");
			}
			if frame.targets(ips::HOST_BASED_SETUP_SERVICE) {
				return format!(
					r#"<g:IPS_HostBasedSetupService xmlns:g="x"><g:ConfigurationNonce>{}</g:ConfigurationNonce></g:IPS_HostBasedSetupService>"#,
					STANDARD.encode(config_nonce)
				);
			}
			ccm_device(frame).expect("unscripted request")
		})
		.await;

	assert_eq!(done.status, "success", "{}", done.message);
	assert_eq!(notification_message(&done)["Status"], "Admin control mode.");
	handle.await.unwrap().unwrap();

	assert_eq!(pushed.len(), 3);
	for (request, certificate) in pushed.iter().zip(&chain) {
		assert!(request.contains(certificate.as_str()));
	}
	let signed = device.certificates.signed();
	assert_eq!(signed.len(), 1);
	assert_eq!(signed[0].len(), 40);
	assert_eq!(&signed[0][..20], &config_nonce);
}

#[tokio::test]
async fn admin_control_requires_a_trusted_root() {
	let device = FakeDevice::connect(Setup {
		profiles: vec![profile("acm", ActivationMode::Admin)],
		domains: vec![Domain {
			name: "vprodemo".into(),
			suffix: "vprodemo.com".into(),
			tenant_id: String::new(),
			certificate_chain: vec![STANDARD.encode(b"root")],
		}],
		..Setup::default()
	});
	let err = device.command("activation", activation_payload("acm")).await.unwrap_err();
	assert!(err.to_string().contains("not trusted"), "{err}");
	assert_eq!(device.controller.sent_count(), 1);
}

#[tokio::test]
async fn activation_hands_off_to_tls_enrollment() {
	let mut tls_profile = profile("ccm-tls", ActivationMode::Client);
	tls_profile.tls_mode = Some(TlsMode::Server);
	let mut device = FakeDevice::connect(Setup {
		profiles: vec![tls_profile],
		..Setup::default()
	});
	let handle = started(device.command("activation", activation_payload("ccm-tls")).await);

	let mut puts = Vec::new();
	let done = device
		.serve(|frame| {
			if frame.invokes("Put") {
				puts.push(frame.http.clone().unwrap_or_default());
			}
			tls_device(frame)
		})
		.await;

	assert_eq!(done.status, "success", "{}", done.message);
	let status = notification_message(&done);
	assert_eq!(status["Status"], "Client control mode.");
	assert_eq!(status["TLSConfiguration"], "Configured");
	handle.await.unwrap().unwrap();

	assert_eq!(puts.len(), 2);
	assert!(puts[0].contains(amt::REMOTE_TLS_INSTANCE));
	assert!(puts[0].contains("host1.vprodemo.com"));
	assert!(puts[1].contains(amt::LOCAL_TLS_INSTANCE));
}

#[tokio::test]
async fn repeated_unauthorized_replies_exhaust_retries() {
	let mut device = FakeDevice::connect(Setup {
		profiles: vec![profile("ccm", ActivationMode::Client)],
		..Setup::default()
	});
	let handle = started(device.command("activation", activation_payload("ccm")).await);

	let mut requests = 0;
	let done = loop {
		let frame = device.next_frame().await;
		if frame.request.is_none() {
			break frame.message;
		}
		requests += 1;
		if requests > 1 {
			assert!(frame.authorization().is_some_and(|a| a.starts_with("Digest ")));
		}
		device.reply(&reply_unauthorized(REALM, &format!("nonce-{requests}"))).await;
	};

	assert_eq!(requests, 3);
	assert_eq!(done.status, "failed");
	assert_eq!(notification_message(&done)["Status"], "Failed: Exceeded retry attempts");
	assert_eq!(handle.await.unwrap().unwrap_err(), "Exceeded retry attempts");
	assert_eq!(device.session.unauthorized_attempts(), 0);
}

#[tokio::test]
async fn heartbeat_is_ignored_and_disconnect_closes_session() {
	let device = FakeDevice::connect(Setup::default());
	let heartbeat = device.dispatcher.handle(CLIENT_ID, r#"{"method":"heartbeat_response"}"#).await.unwrap();
	assert!(matches!(heartbeat, Dispatched::Heartbeat));
	assert_eq!(device.controller.sent_count(), 0);

	device.dispatcher.disconnect(CLIENT_ID);
	assert!(device.dispatcher.services().registry.get(CLIENT_ID).is_none());
	let err = device.dispatcher.handle(CLIENT_ID, r#"{"method":"heartbeat_response"}"#).await.unwrap_err();
	assert!(matches!(err, Error::Runtime(rps_runtime::Error::NoClientSocket(_))));
}

#[tokio::test]
async fn activation_enrolls_8021x_through_the_enterprise_assistant() {
	let mut wired = profile("ccm-8021x", ActivationMode::Client);
	wired.ieee8021x = Some(Ieee8021xProfile {
		profile_name: "wired".into(),
		auth_protocol: 0,
		pxe_timeout: 120,
	});
	let mut device = FakeDevice::connect(Setup {
		profiles: vec![wired],
		..Setup::default()
	});

	let enterprise = Arc::clone(&device.dispatcher.services().enterprise);
	let (transport, mut requests) = ChannelTransport::pair();
	enterprise.attach(Arc::new(transport));
	let assistant = tokio::spawn(async move {
		let mut subactions = Vec::new();
		while let Some(raw) = requests.recv().await {
			let request: Value = serde_json::from_str(&raw).unwrap();
			assert_eq!(request["nodeid"], CLIENT_ID);
			let subaction = request["subaction"].as_str().unwrap().to_string();
			let response = match subaction.as_str() {
				"802.1x-ProFile-Request" => json!({ "username": "host1$" }),
				"802.1x-KeyPair-Response" => {
					assert_eq!(request["KeyInstanceId"], KEY_PAIR);
					json!({ "csr": "bnVsbC1jc3I=" })
				}
				"802.1x-CSR-Response" => {
					assert_eq!(request["SignedCSR"], "c2lnbmVkLWNzcg==");
					json!({ "certificate": "Y2xpZW50", "rootCert": "cmFkaXVz" })
				}
				other => panic!("unexpected subaction {other}"),
			};
			let reply = json!({ "action": "satellite", "subaction": subaction, "nodeid": CLIENT_ID, "response": response });
			assert!(enterprise.deliver(&reply.to_string()).unwrap());
			subactions.push(subaction);
			if subactions.len() == 3 {
				return subactions;
			}
		}
		subactions
	});

	let handle = started(device.command("activation", activation_payload("ccm-8021x")).await);
	let mut settings_put = None;
	let mut bound = None;
	let done = device
		.serve(|frame| {
			if frame.targets(ips::IEEE8021X_SETTINGS) && frame.invokes("Put") {
				settings_put = frame.http.clone();
			}
			if frame.invokes("SetCertificates") {
				bound = frame.http.clone();
			}
			ieee8021x_device(frame)
		})
		.await;

	assert_eq!(done.status, "success", "{}", done.message);
	assert_eq!(notification_message(&done)["IEEE8021x"], "Configured");
	handle.await.unwrap().unwrap();
	assert_eq!(assistant.await.unwrap(), ["802.1x-ProFile-Request", "802.1x-KeyPair-Response", "802.1x-CSR-Response"]);

	let settings_put = settings_put.expect("802.1x settings were not updated");
	assert!(settings_put.contains("host1$"));
	assert!(settings_put.contains("PxeTimeout"));
	let bound = bound.expect("certificates were not bound");
	assert!(bound.contains(RADIUS_ROOT));
	assert!(bound.contains(CERTIFICATE));
}
