use thiserror::Error;

/// Errors produced while encoding or decoding protocol data.
#[derive(Debug, Error)]
pub enum Error {
	/// Chunked transfer coding did not match the strict grammar.
	#[error("chunked decode failed: {0}")]
	Chunked(String),

	/// The tunnelled HTTP message could not be parsed.
	#[error("malformed HTTP message: {0}")]
	Http(String),

	/// The SOAP body could not be parsed as XML.
	#[error("unparsable WS-Management body: {0}")]
	Xml(String),

	#[error("invalid base64 payload: {0}")]
	Base64(#[from] base64::DecodeError),

	#[error("invalid JSON: {0}")]
	Json(#[from] serde_json::Error),

	#[error("invalid protocol version '{0}'")]
	Version(String),

	#[error("invalid authentication challenge: {0}")]
	Challenge(String),
}

impl Error {
	/// Returns `true` for the decode-failure class: malformed framing or an
	/// unparsable protocol body.
	pub fn is_decode(&self) -> bool {
		matches!(self, Error::Chunked(_) | Error::Http(_) | Error::Xml(_))
	}
}

pub type Result<T> = std::result::Result<T, Error>;
