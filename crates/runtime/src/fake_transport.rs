//! Fake device transport for exercising sessions without a network.
//!
//! # Example
//!
//! ```ignore
//! let (transport, mut controller) = FakeTransportBuilder::new().build();
//! let session = registry.connect("client-1", transport);
//!
//! let call = tokio::spawn(async move { invoker.invoke(&session, &amt::general_settings_get()).await });
//! let sent = controller.next_sent().await.unwrap();
//! Invoker::deliver(&session, &reply_ok(&sent.message_id().unwrap(), "<g:AMT_GeneralSettings/>"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use rps_protocol::http::HttpResponse;
use rps_protocol::wsman::WsmanResponse;
use rps_protocol::{ServerMethod, ServerMsg};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::{BoxFuture, Transport};

/// Builder for a fake transport and its controller.
pub struct FakeTransportBuilder {
	connected: bool,
}

impl FakeTransportBuilder {
	pub fn new() -> Self {
		Self { connected: true }
	}

	/// Starts the transport in the disconnected state.
	pub fn disconnected(mut self) -> Self {
		self.connected = false;
		self
	}

	pub fn build(self) -> (Arc<dyn Transport>, FakeTransportController) {
		let (tx, rx) = mpsc::unbounded_channel();
		let connected = Arc::new(AtomicBool::new(self.connected));
		let sent = Arc::new(Mutex::new(Vec::new()));

		let transport = FakeTransport {
			tx,
			connected: Arc::clone(&connected),
			sent: Arc::clone(&sent),
		};
		let controller = FakeTransportController { rx, connected, sent };
		(Arc::new(transport), controller)
	}
}

impl Default for FakeTransportBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct FakeTransport {
	tx: mpsc::UnboundedSender<SentFrame>,
	connected: Arc<AtomicBool>,
	sent: Arc<Mutex<Vec<SentFrame>>>,
}

impl Transport for FakeTransport {
	fn send(&self, message: String) -> BoxFuture<'_, Result<()>> {
		let result = if self.connected.load(Ordering::SeqCst) {
			SentFrame::parse(&message).map(|frame| {
				self.sent.lock().push(frame.clone());
				let _ = self.tx.send(frame);
			})
		} else {
			Err(Error::Transport("fake transport disconnected".into()))
		};
		Box::pin(async move { result })
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}
}

/// Inspects frames sent to the fake device.
pub struct FakeTransportController {
	rx: mpsc::UnboundedReceiver<SentFrame>,
	connected: Arc<AtomicBool>,
	sent: Arc<Mutex<Vec<SentFrame>>>,
}

impl FakeTransportController {
	/// Waits for the next frame the server sends.
	pub async fn next_sent(&mut self) -> Option<SentFrame> {
		self.rx.recv().await
	}

	/// Returns a frame only if one is already queued.
	pub fn try_next_sent(&mut self) -> Option<SentFrame> {
		self.rx.try_recv().ok()
	}

	/// Every frame sent so far, oldest first.
	pub fn sent(&self) -> Vec<SentFrame> {
		self.sent.lock().clone()
	}

	pub fn sent_count(&self) -> usize {
		self.sent.lock().len()
	}

	pub fn disconnect(&self) {
		self.connected.store(false, Ordering::SeqCst);
	}
}

/// One envelope the server sent, with its tunnelled request unpacked.
#[derive(Debug, Clone)]
pub struct SentFrame {
	pub message: ServerMsg,
	/// Raw HTTP request for `wsman` envelopes.
	pub http: Option<String>,
	/// The request's SOAP envelope, parsed the same way replies are.
	pub request: Option<WsmanResponse>,
}

impl SentFrame {
	pub fn parse(raw: &str) -> Result<Self> {
		let message: ServerMsg = serde_json::from_str(raw).map_err(rps_protocol::Error::from)?;
		if message.method != ServerMethod::Wsman {
			return Ok(Self {
				message,
				http: None,
				request: None,
			});
		}

		let bytes = STANDARD.decode(&message.payload).map_err(rps_protocol::Error::from)?;
		let http = String::from_utf8_lossy(&bytes).into_owned();
		let body = http.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or_default();
		let request = WsmanResponse::parse(body)?;
		Ok(Self {
			message,
			http: Some(http),
			request: Some(request),
		})
	}

	fn header_text(&self, name: &str) -> Option<&str> {
		self.request.as_ref()?.header.get(name)?.as_str()
	}

	pub fn message_id(&self) -> Option<String> {
		self.header_text("MessageID").map(str::to_string)
	}

	pub fn action(&self) -> Option<&str> {
		self.header_text("Action")
	}

	pub fn resource_uri(&self) -> Option<&str> {
		self.header_text("ResourceURI")
	}

	/// `Authorization` header of the tunnelled request.
	pub fn authorization(&self) -> Option<&str> {
		let http = self.http.as_deref()?;
		let head = http.split_once("\r\n\r\n").map(|(head, _)| head)?;
		head.lines().find_map(|line| line.strip_prefix("Authorization: "))
	}

	/// Whether the request targets `class`, by resource URI suffix.
	pub fn targets(&self, class: &str) -> bool {
		self.resource_uri().is_some_and(|uri| uri.ends_with(&format!("/{class}")))
	}

	/// Whether the action names `method`, by suffix.
	pub fn invokes(&self, method: &str) -> bool {
		self.action().is_some_and(|action| action.ends_with(&format!("/{method}")))
	}
}

/// SOAP envelope replying to `relates_to` with `body`.
pub fn soap_envelope(relates_to: &str, body: &str) -> String {
	format!(
		concat!(
			r#"<?xml version="1.0" encoding="UTF-8"?>"#,
			r#"<a:Envelope xmlns:a="http://www.w3.org/2003/05/soap-envelope" xmlns:b="http://schemas.xmlsoap.org/ws/2004/08/addressing">"#,
			"<a:Header><b:RelatesTo>{}</b:RelatesTo></a:Header>",
			"<a:Body>{}</a:Body>",
			"</a:Envelope>"
		),
		relates_to, body
	)
}

/// Chunked `200 OK` carrying `body` as the reply to `relates_to`.
pub fn reply_ok(relates_to: &str, body: &str) -> Vec<u8> {
	HttpResponse::ok_chunked(&soap_envelope(relates_to, body)).render().into_bytes()
}

/// `401` with a digest challenge for the given realm and nonce.
pub fn reply_unauthorized(realm: &str, nonce: &str) -> Vec<u8> {
	let response = HttpResponse {
		status: 401,
		reason: "Unauthorized".into(),
		headers: vec![
			(
				"WWW-Authenticate".into(),
				format!(r#"Digest realm="{realm}", nonce="{nonce}", stale="false", qop="auth""#),
			),
			("Content-Length".into(), "0".into()),
		],
		body: String::new(),
	};
	response.render().into_bytes()
}

/// Arbitrary status with an unencoded body.
pub fn reply_status(status: u16, reason: &str, body: &str) -> Vec<u8> {
	let response = HttpResponse {
		status,
		reason: reason.into(),
		headers: vec![("Content-Length".into(), body.len().to_string())],
		body: body.into(),
	};
	response.render().into_bytes()
}

/// `400` carrying a SOAP fault with the given subcode and reason.
pub fn reply_fault(relates_to: &str, subcode: &str, reason: &str) -> Vec<u8> {
	let body = format!(
		concat!(
			r#"<a:Fault xmlns:c="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd">"#,
			"<a:Code><a:Value>a:Sender</a:Value><a:Subcode><a:Value>c:{}</a:Value></a:Subcode></a:Code>",
			r#"<a:Reason><a:Text xml:lang="en-US">{}</a:Text></a:Reason>"#,
			"</a:Fault>"
		),
		subcode, reason
	);
	reply_status(400, "Bad Request", &soap_envelope(relates_to, &body))
}

#[cfg(test)]
mod tests {
	use super::*;
	use rps_protocol::ServerIdentity;
	use rps_protocol::http::frame_request;
	use rps_protocol::wsman::amt;

	#[tokio::test]
	async fn captures_and_unpacks_wsman_frames() {
		let (transport, mut controller) = FakeTransportBuilder::new().build();
		let xml = amt::general_settings_get().to_xml("5");
		let http = frame_request(&xml, "localhost", 16992, Some("Digest username=\"admin\""));
		let message = ServerMsg::wsman(&ServerIdentity::default(), &http).to_json().unwrap();
		transport.send(message).await.unwrap();

		let sent = controller.next_sent().await.unwrap();
		assert_eq!(sent.message_id().as_deref(), Some("5"));
		assert!(sent.targets(amt::GENERAL_SETTINGS));
		assert_eq!(sent.authorization(), Some("Digest username=\"admin\""));
		assert_eq!(controller.sent_count(), 1);
	}

	#[tokio::test]
	async fn refuses_sends_after_disconnect() {
		let (transport, controller) = FakeTransportBuilder::new().build();
		controller.disconnect();
		assert!(!transport.is_connected());
		let message = ServerMsg::success(&ServerIdentity::default(), "{}".into()).to_json().unwrap();
		assert!(matches!(transport.send(message).await, Err(Error::Transport(_))));
	}

	#[test]
	fn fault_reply_parses_back() {
		let raw = reply_fault("3", "AlreadyExists", "Certificate already exists");
		let response = HttpResponse::parse(&String::from_utf8(raw).unwrap()).unwrap();
		assert_eq!(response.status, 400);
		let fault = WsmanResponse::parse(&response.body).unwrap().fault().unwrap();
		assert_eq!(fault.subcode.as_deref(), Some("AlreadyExists"));
		assert_eq!(fault.reason, "Certificate already exists");
	}
}
