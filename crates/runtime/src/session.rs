//! Per-connection device session state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rps_protocol::DigestChallenge;
use rps_protocol::digest;
use rps_protocol::http;
use rps_protocol::wsman::WsmanResponse;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Port of the engine's non-TLS WS-Management listener.
pub const DEFAULT_AMT_PORT: u16 = 16992;

/// Target and credentials used to frame requests for the engine.
#[derive(Clone)]
pub struct ConnectionParams {
	pub host: String,
	pub port: u16,
	pub username: String,
	pub password: String,
	pub challenge: Option<DigestChallenge>,
	nonce_count: u32,
}

impl ConnectionParams {
	pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
		Self {
			host: "localhost".into(),
			port: DEFAULT_AMT_PORT,
			username: username.into(),
			password: password.into(),
			challenge: None,
			nonce_count: 0,
		}
	}

	/// Frames `body` for the engine, signing it when a challenge is known.
	fn frame(&mut self, body: &str) -> String {
		let authorization = match &self.challenge {
			Some(challenge) => {
				self.nonce_count = self.nonce_count.wrapping_add(1);
				let cnonce = digest::new_cnonce();
				Some(challenge.authorization(&self.username, &self.password, "POST", http::WSMAN_PATH, self.nonce_count, &cnonce))
			}
			None => None,
		};
		http::frame_request(body, &self.host, self.port, authorization.as_deref())
	}
}

impl Default for ConnectionParams {
	fn default() -> Self {
		Self::new("", "")
	}
}

impl fmt::Debug for ConnectionParams {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectionParams")
			.field("host", &self.host)
			.field("port", &self.port)
			.field("username", &self.username)
			.field("password", &"<redacted>")
			.field("challenge", &self.challenge)
			.field("nonce_count", &self.nonce_count)
			.finish()
	}
}

/// Reporting category of the status projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum StatusCategory {
	#[serde(rename = "Status")]
	Overall,
	Network,
	#[serde(rename = "CIRAConnection")]
	Cira,
	#[serde(rename = "TLSConfiguration")]
	Tls,
	#[serde(rename = "IEEE8021x")]
	Ieee8021x,
}

/// Human-readable status per category, as reported to the device and to
/// external status surfaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatusProjection(BTreeMap<StatusCategory, String>);

impl StatusProjection {
	pub fn set(&mut self, category: StatusCategory, status: impl Into<String>) {
		self.0.insert(category, status.into());
	}

	pub fn get(&self, category: StatusCategory) -> Option<&str> {
		self.0.get(&category).map(String::as_str)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn to_json(&self) -> String {
		serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
	}
}

/// Outcome of handing a reply to a session's pending slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
	/// A waiting request received the reply.
	Resolved,
	/// No request was outstanding; the reply was discarded.
	NoPending,
	/// The reply names a different request; discarded.
	Stale,
}

struct Pending {
	request_id: u64,
	message_id: String,
	tx: oneshot::Sender<Result<WsmanResponse>>,
}

/// One connected device.
///
/// A session has at most one request in flight: [`Session::exclusive`]
/// serializes exchanges and the pending slot holds the single waiter.
pub struct Session {
	id: String,
	transport: RwLock<Option<Arc<dyn Transport>>>,
	params: Mutex<ConnectionParams>,
	pending: Mutex<Option<Pending>>,
	exchange: tokio::sync::Mutex<()>,
	unauthorized: AtomicU32,
	sequence: AtomicU64,
	status: Mutex<StatusProjection>,
}

impl Session {
	pub fn new(id: impl Into<String>, transport: Option<Arc<dyn Transport>>) -> Self {
		Self {
			id: id.into(),
			transport: RwLock::new(transport),
			params: Mutex::new(ConnectionParams::default()),
			pending: Mutex::new(None),
			exchange: tokio::sync::Mutex::new(()),
			unauthorized: AtomicU32::new(0),
			sequence: AtomicU64::new(0),
			status: Mutex::new(StatusProjection::default()),
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	/// The transport, if the device is still connected.
	pub fn transport(&self) -> Option<Arc<dyn Transport>> {
		self.transport.read().as_ref().filter(|t| t.is_connected()).cloned()
	}

	pub fn params(&self) -> ConnectionParams {
		self.params.lock().clone()
	}

	pub fn update_params(&self, update: impl FnOnce(&mut ConnectionParams)) {
		update(&mut self.params.lock());
	}

	/// Switches credentials; the current challenge stays valid for the realm.
	pub fn set_credentials(&self, username: &str, password: &str) {
		let mut params = self.params.lock();
		params.username = username.to_string();
		params.password = password.to_string();
	}

	pub fn challenge(&self) -> Option<DigestChallenge> {
		self.params.lock().challenge.clone()
	}

	pub fn set_challenge(&self, challenge: DigestChallenge) {
		let mut params = self.params.lock();
		params.challenge = Some(challenge);
		params.nonce_count = 0;
	}

	pub(crate) fn frame(&self, body: &str) -> String {
		self.params.lock().frame(body)
	}

	pub fn unauthorized_attempts(&self) -> u32 {
		self.unauthorized.load(Ordering::SeqCst)
	}

	/// Returns the count after incrementing.
	pub fn record_unauthorized(&self) -> u32 {
		self.unauthorized.fetch_add(1, Ordering::SeqCst) + 1
	}

	pub fn reset_unauthorized(&self) {
		self.unauthorized.store(0, Ordering::SeqCst);
	}

	/// Next value of the monotonic message sequence.
	pub fn next_sequence(&self) -> u64 {
		self.sequence.fetch_add(1, Ordering::SeqCst)
	}

	pub fn status(&self) -> StatusProjection {
		self.status.lock().clone()
	}

	pub fn set_status(&self, category: StatusCategory, status: impl Into<String>) {
		self.status.lock().set(category, status);
	}

	/// Waits until no other exchange is in flight on this session.
	pub(crate) async fn exclusive(&self) -> tokio::sync::MutexGuard<'_, ()> {
		self.exchange.lock().await
	}

	/// Arms the pending slot for a new request, replacing any previous waiter.
	pub(crate) fn arm(&self, request_id: u64, message_id: &str) -> oneshot::Receiver<Result<WsmanResponse>> {
		let (tx, rx) = oneshot::channel();
		let previous = self.pending.lock().replace(Pending {
			request_id,
			message_id: message_id.to_string(),
			tx,
		});
		if previous.is_some() {
			warn!(target = "rps.session", client_id = %self.id, request_id, "replaced an unsettled pending request");
		}
		rx
	}

	/// Clears the slot if it still belongs to `request_id`.
	pub(crate) fn disarm(&self, request_id: u64) {
		let mut pending = self.pending.lock();
		if pending.as_ref().is_some_and(|p| p.request_id == request_id) {
			pending.take();
		}
	}

	pub fn has_pending(&self) -> bool {
		self.pending.lock().is_some()
	}

	/// Settles the pending slot with a decoded reply or a failed exchange.
	///
	/// Replies naming another request through `RelatesTo` are dropped, as are
	/// replies arriving when nothing is outstanding. Faults carry `RelatesTo`
	/// in their body and are checked the same way.
	pub fn settle(&self, outcome: Result<WsmanResponse>) -> Settlement {
		let mut slot = self.pending.lock();
		let Some(pending) = slot.as_ref() else {
			debug!(target = "rps.session", client_id = %self.id, "reply with no request outstanding; dropped");
			return Settlement::NoPending;
		};

		if let Some(relates_to) = relates_to(&outcome) {
			if relates_to != pending.message_id {
				warn!(
					target = "rps.session",
					client_id = %self.id,
					expected = %pending.message_id,
					%relates_to,
					"stale reply for an earlier request; dropped"
				);
				return Settlement::Stale;
			}
		}

		if let Some(pending) = slot.take() {
			let _ = pending.tx.send(outcome);
		}
		Settlement::Resolved
	}

	/// Detaches the transport and fails any waiter.
	pub fn close(&self) {
		self.transport.write().take();
		if let Some(pending) = self.pending.lock().take() {
			let _ = pending.tx.send(Err(Error::ChannelClosed(self.id.clone())));
		}
	}
}

/// Request a reply answers, read from the SOAP header of a success or a fault.
fn relates_to(outcome: &Result<WsmanResponse>) -> Option<String> {
	match outcome {
		Ok(response) => response.relates_to().map(str::to_string),
		Err(Error::Http(failure)) => WsmanResponse::parse(&failure.body).ok().and_then(|r| r.relates_to().map(str::to_string)),
		Err(_) => None,
	}
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.id)
			.field("connected", &self.transport().is_some())
			.field("unauthorized", &self.unauthorized_attempts())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn reply(relates_to: &str) -> WsmanResponse {
		let xml = format!("<Envelope><Header><RelatesTo>{relates_to}</RelatesTo></Header><Body/></Envelope>");
		WsmanResponse::parse(&xml).unwrap()
	}

	#[test]
	fn frames_without_authorization_until_challenged() {
		let session = Session::new("s1", None);
		session.set_credentials("admin", "P@ssw0rd");
		assert!(!session.frame("<x/>").contains("Authorization"));

		session.set_challenge(DigestChallenge::parse(r#"Digest realm="Digest:A3829B3827DE4D33D4449B366831FD01", nonce="abc", qop="auth""#).unwrap());
		let first = session.frame("<x/>");
		let second = session.frame("<x/>");
		assert!(first.contains("Authorization: Digest username=\"admin\""));
		assert!(first.contains("nc=00000001"));
		assert!(second.contains("nc=00000002"));
	}

	#[tokio::test]
	async fn settles_matching_reply() {
		let session = Session::new("s1", None);
		let rx = session.arm(4, "4");
		assert_eq!(session.settle(Ok(reply("4"))), Settlement::Resolved);
		assert!(rx.await.unwrap().is_ok());
		assert!(!session.has_pending());
	}

	#[test]
	fn drops_reply_without_pending_request() {
		let session = Session::new("s1", None);
		assert_eq!(session.settle(Ok(reply("1"))), Settlement::NoPending);
	}

	#[tokio::test]
	async fn drops_stale_reply_and_keeps_waiting() {
		let session = Session::new("s1", None);
		let rx = session.arm(2, "2");
		assert_eq!(session.settle(Ok(reply("1"))), Settlement::Stale);
		assert!(session.has_pending());
		assert_eq!(session.settle(Ok(reply("2"))), Settlement::Resolved);
		assert!(rx.await.unwrap().is_ok());
	}

	#[tokio::test]
	async fn drops_late_fault_for_an_earlier_request() {
		let session = Session::new("s1", None);
		let rx = session.arm(1, "1");
		let late = crate::invoker::decode_reply(&crate::fake_transport::reply_fault("0", "w:InvalidParameter", "late fault for request 0"));
		assert!(matches!(late, Err(Error::Http(_))));
		assert_eq!(session.settle(late), Settlement::Stale);
		assert!(session.has_pending());

		let own = crate::invoker::decode_reply(&crate::fake_transport::reply_fault("1", "w:InvalidParameter", "bad selector"));
		assert_eq!(session.settle(own), Settlement::Resolved);
		assert!(matches!(rx.await.unwrap(), Err(Error::Http(f)) if f.status == 400));
	}

	#[test]
	fn disarm_ignores_other_requests() {
		let session = Session::new("s1", None);
		let _rx = session.arm(7, "7");
		session.disarm(6);
		assert!(session.has_pending());
		session.disarm(7);
		assert!(!session.has_pending());
	}

	#[tokio::test]
	async fn close_fails_waiter() {
		let session = Session::new("s1", None);
		let rx = session.arm(0, "0");
		session.close();
		assert!(matches!(rx.await.unwrap(), Err(Error::ChannelClosed(_))));
	}

	#[test]
	fn status_projection_serializes_by_category() {
		let mut status = StatusProjection::default();
		status.set(StatusCategory::Tls, "Configured");
		status.set(StatusCategory::Overall, "Admin control mode.");
		assert_eq!(status.to_json(), r#"{"Status":"Admin control mode.","TLSConfiguration":"Configured"}"#);
	}
}
