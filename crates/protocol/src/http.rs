//! HTTP/1.1 framing tunnelled through the device envelope.
//!
//! The device relays our request bytes verbatim to its management engine and
//! returns the engine's raw reply, so both directions are plain HTTP text.

use crate::chunked;
use crate::error::{Error, Result};

/// Path every WS-Management request targets.
pub const WSMAN_PATH: &str = "/wsman";

/// Frames a SOAP body as a `POST /wsman` request.
pub fn frame_request(body: &str, host: &str, port: u16, authorization: Option<&str>) -> String {
	let mut request = String::with_capacity(body.len() + 256);
	request.push_str("POST ");
	request.push_str(WSMAN_PATH);
	request.push_str(" HTTP/1.1\r\n");
	if let Some(auth) = authorization {
		request.push_str("Authorization: ");
		request.push_str(auth);
		request.push_str("\r\n");
	}
	request.push_str(&format!("Host: {host}:{port}\r\n"));
	request.push_str("Content-Type: application/soap+xml; charset=utf-8\r\n");
	request.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
	request.push_str(body);
	request
}

/// A parsed HTTP reply from the management engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
	pub status: u16,
	pub reason: String,
	pub headers: Vec<(String, String)>,
	/// Body exactly as received (still transfer-coded).
	pub body: String,
}

impl HttpResponse {
	pub fn parse(raw: &str) -> Result<Self> {
		let (head, body) = match raw.find("\r\n\r\n") {
			Some(idx) => (&raw[..idx], &raw[idx + 4..]),
			None => (raw.trim_end_matches("\r\n"), ""),
		};

		let mut lines = head.split("\r\n");
		let status_line = lines.next().filter(|l| !l.is_empty()).ok_or_else(|| Error::Http("empty response".into()))?;
		let mut parts = status_line.splitn(3, ' ');
		let protocol = parts.next().unwrap_or_default();
		if !protocol.starts_with("HTTP/") {
			return Err(Error::Http(format!("bad status line '{status_line}'")));
		}
		let status = parts
			.next()
			.and_then(|code| code.parse::<u16>().ok())
			.ok_or_else(|| Error::Http(format!("bad status code in '{status_line}'")))?;
		let reason = parts.next().unwrap_or_default().to_string();

		let mut headers = Vec::new();
		for line in lines {
			let (name, value) = line.split_once(':').ok_or_else(|| Error::Http(format!("bad header line '{line}'")))?;
			headers.push((name.trim().to_string(), value.trim().to_string()));
		}

		Ok(Self {
			status,
			reason,
			headers,
			body: body.to_string(),
		})
	}

	/// Case-insensitive header lookup.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
	}

	pub fn is_chunked(&self) -> bool {
		self.header("Transfer-Encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
	}

	/// Removes transfer coding from the body.
	pub fn decoded_body(&self) -> Result<String> {
		if self.is_chunked() { chunked::decode_str(&self.body) } else { Ok(self.body.clone()) }
	}

	/// Renders the response back to wire text.
	pub fn render(&self) -> String {
		let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
		for (name, value) in &self.headers {
			out.push_str(&format!("{name}: {value}\r\n"));
		}
		out.push_str("\r\n");
		out.push_str(&self.body);
		out
	}

	/// Builds a `200 OK` reply carrying `body` with chunked transfer coding.
	pub fn ok_chunked(body: &str) -> Self {
		// Chunks end on char boundaries, so the encoding stays valid UTF-8.
		let encoded = chunked::encode(char_chunks(body, CHUNK_SIZE));
		Self {
			status: 200,
			reason: "OK".into(),
			headers: vec![
				("Content-Type".into(), "application/soap+xml; charset=UTF-8".into()),
				("Transfer-Encoding".into(), "chunked".into()),
			],
			body: String::from_utf8_lossy(&encoded).into_owned(),
		}
	}
}

const CHUNK_SIZE: usize = 512;

/// Splits `text` into pieces of at most `max` bytes without cutting a
/// multi-byte character; a character wider than `max` gets a piece of its own.
fn char_chunks(text: &str, max: usize) -> Vec<&str> {
	let mut chunks = Vec::new();
	let mut rest = text;
	while !rest.is_empty() {
		let mut end = rest.len().min(max);
		while !rest.is_char_boundary(end) {
			end -= 1;
		}
		if end == 0 {
			end = rest.chars().next().map_or(rest.len(), char::len_utf8);
		}
		let (head, tail) = rest.split_at(end);
		chunks.push(head);
		rest = tail;
	}
	chunks
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn frames_request_with_content_length() {
		let framed = frame_request("<x/>", "192.168.1.2", 16992, Some("Digest a=b"));
		assert!(framed.starts_with("POST /wsman HTTP/1.1\r\nAuthorization: Digest a=b\r\n"));
		assert!(framed.contains("Host: 192.168.1.2:16992\r\n"));
		assert!(framed.ends_with("Content-Length: 4\r\n\r\n<x/>"));
	}

	#[test]
	fn parses_unauthorized_reply() {
		let raw = "HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: Digest realm=\"Digest:AAAA\", nonce=\"n\", qop=\"auth\"\r\nContent-Length: 0\r\n\r\n";
		let resp = HttpResponse::parse(raw).unwrap();
		assert_eq!(resp.status, 401);
		assert_eq!(resp.reason, "Unauthorized");
		assert!(resp.header("www-authenticate").unwrap().starts_with("Digest"));
		assert_eq!(resp.body, "");
	}

	#[test]
	fn decodes_chunked_body() {
		let resp = HttpResponse::ok_chunked("<Envelope/>");
		let parsed = HttpResponse::parse(&resp.render()).unwrap();
		assert!(parsed.is_chunked());
		assert_eq!(parsed.decoded_body().unwrap(), "<Envelope/>");
	}

	#[test]
	fn rejects_garbage_status_line() {
		assert!(HttpResponse::parse("hello\r\n\r\n").is_err());
		assert!(HttpResponse::parse("HTTP/1.1 abc OK\r\n\r\n").is_err());
		assert!(HttpResponse::parse("").is_err());
	}

	#[test]
	fn chunked_reply_keeps_characters_across_chunk_boundaries() {
		let body = format!("{}é{}ü", "a".repeat(CHUNK_SIZE - 1), "b".repeat(CHUNK_SIZE - 2));
		let resp = HttpResponse::ok_chunked(&body);
		assert!(!resp.body.contains('\u{FFFD}'));
		assert_eq!(resp.decoded_body().unwrap(), body);
	}

	#[test]
	fn char_chunks_respect_limit_and_boundaries() {
		assert_eq!(char_chunks("aé", 2), ["a", "é"]);
		assert_eq!(char_chunks("€x", 1), ["€", "x"]);
		assert!(char_chunks("", 4).is_empty());
	}
}
