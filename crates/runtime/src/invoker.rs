//! Request/response correlation for WS-Management exchanges.
//!
//! A request is framed, tunnelled through the device's envelope, and the
//! invoker waits on the session's pending slot until the dispatcher settles
//! it with the reply, the deadline elapses, or the device disconnects.

use rps_protocol::ServerIdentity;
use rps_protocol::ServerMsg;
use rps_protocol::http::HttpResponse;
use rps_protocol::wsman::{Envelope, WsmanResponse};
use tracing::{debug, warn};

use crate::error::{Error, HttpFailure, Result};
use crate::policy::InvokePolicy;
use crate::session::{Session, Settlement};

#[derive(Debug, Clone, Default)]
pub struct Invoker {
	identity: ServerIdentity,
	policy: InvokePolicy,
}

impl Invoker {
	pub fn new(identity: ServerIdentity, policy: InvokePolicy) -> Self {
		Self { identity, policy }
	}

	pub fn identity(&self) -> &ServerIdentity {
		&self.identity
	}

	pub fn policy(&self) -> InvokePolicy {
		self.policy
	}

	/// Sends `envelope` and waits for its reply under the default policy.
	pub async fn invoke(&self, session: &Session, envelope: &Envelope) -> Result<WsmanResponse> {
		self.invoke_with(session, envelope, self.policy).await
	}

	/// Sends `envelope` and waits for its reply.
	///
	/// Only decode failures are retried, resending the same request up to
	/// `policy.max_retries` times. Timeouts, HTTP errors and disconnects are
	/// returned to the caller.
	pub async fn invoke_with(&self, session: &Session, envelope: &Envelope, policy: InvokePolicy) -> Result<WsmanResponse> {
		let _exclusive = session.exclusive().await;

		let request_id = session.next_sequence();
		let message_id = request_id.to_string();
		let xml = envelope.to_xml(&message_id);
		let mut retries = 0;

		loop {
			let transport = session.transport().ok_or_else(|| Error::NoClientSocket(session.id().to_string()))?;
			let message = ServerMsg::wsman(&self.identity, &session.frame(&xml)).to_json()?;

			let rx = session.arm(request_id, &message_id);
			debug!(
				target = "rps.invoke",
				client_id = %session.id(),
				%message_id,
				action = envelope.action(),
				attempt = retries + 1,
				"sending request"
			);
			if let Err(err) = transport.send(message).await {
				session.disarm(request_id);
				return Err(err);
			}

			let outcome = match tokio::time::timeout(policy.deadline, rx).await {
				Ok(Ok(outcome)) => outcome,
				Ok(Err(_)) => Err(Error::ChannelClosed(session.id().to_string())),
				Err(_) => {
					session.disarm(request_id);
					warn!(target = "rps.invoke", client_id = %session.id(), %message_id, deadline = ?policy.deadline, "request timed out");
					Err(Error::GatewayTimeout(policy.deadline))
				}
			};

			match outcome {
				Ok(response) => {
					session.reset_unauthorized();
					return Ok(response);
				}
				Err(err) if err.is_decode() && retries < policy.max_retries => {
					retries += 1;
					warn!(target = "rps.invoke", client_id = %session.id(), %message_id, retries, error = %err, "undecodable reply, resending");
				}
				Err(err) => return Err(err),
			}
		}
	}

	/// Hands a raw HTTP reply relayed by the device to the session's waiter.
	pub fn deliver(session: &Session, raw: &[u8]) -> Settlement {
		let settlement = session.settle(decode_reply(raw));
		if settlement != Settlement::Resolved {
			debug!(target = "rps.invoke", client_id = %session.id(), ?settlement, "reply not delivered");
		}
		settlement
	}
}

/// Decodes a relayed HTTP reply into a WS-Management response.
///
/// Malformed framing or XML becomes [`Error::UnexpectedParse`]. Non-200
/// statuses become [`Error::Http`] carrying the decoded body when possible.
pub fn decode_reply(raw: &[u8]) -> Result<WsmanResponse> {
	let text = std::str::from_utf8(raw).map_err(|e| Error::UnexpectedParse(e.to_string()))?;
	let response = HttpResponse::parse(text).map_err(|e| Error::UnexpectedParse(e.to_string()))?;

	if response.status != 200 {
		let body = response.decoded_body().unwrap_or_else(|_| response.body.clone());
		return Err(Error::Http(HttpFailure {
			status: response.status,
			headers: response.headers,
			body,
		}));
	}

	let body = response.decoded_body().map_err(|e| Error::UnexpectedParse(e.to_string()))?;
	WsmanResponse::parse(&body).map_err(|e| Error::UnexpectedParse(e.to_string()))
}
