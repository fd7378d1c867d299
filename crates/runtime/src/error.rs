use std::time::Duration;

use rps_protocol::wsman::{Fault, WsmanResponse};
use thiserror::Error;

/// Failure of a single exchange with a device or the Enterprise Assistant.
#[derive(Debug, Error)]
pub enum Error {
	#[error("no client socket for session {0}")]
	NoClientSocket(String),

	#[error("gateway timeout: no response within {0:?}")]
	GatewayTimeout(Duration),

	/// Malformed framing or an unparsable body; the only retryable class.
	#[error("unexpected parse error: {0}")]
	UnexpectedParse(String),

	#[error("device replied with HTTP {} {}", .0.status, .0.summary())]
	Http(HttpFailure),

	#[error("session {0} closed before a response arrived")]
	ChannelClosed(String),

	#[error("transport error: {0}")]
	Transport(String),

	#[error("enterprise assistant: {0}")]
	EnterpriseAssistant(String),

	#[error(transparent)]
	Protocol(#[from] rps_protocol::Error),
}

impl Error {
	pub fn is_decode(&self) -> bool {
		matches!(self, Error::UnexpectedParse(_))
	}

	pub fn http_status(&self) -> Option<u16> {
		match self {
			Error::Http(failure) => Some(failure.status),
			_ => None,
		}
	}

	/// SOAP fault attached to a failed exchange, if any.
	pub fn fault(&self) -> Option<Fault> {
		match self {
			Error::Http(failure) => failure.fault(),
			_ => None,
		}
	}
}

/// Status, headers and body of a non-200 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
	pub status: u16,
	pub headers: Vec<(String, String)>,
	pub body: String,
}

impl HttpFailure {
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
	}

	pub fn fault(&self) -> Option<Fault> {
		WsmanResponse::parse(&self.body).ok().and_then(|r| r.fault())
	}

	fn summary(&self) -> String {
		match self.fault() {
			Some(fault) => fault.reason,
			None => String::new(),
		}
	}
}

pub type Result<T> = std::result::Result<T, Error>;
