//! HTTP digest authentication (RFC 2617, MD5, `qop=auth`).
//!
//! The management engine answers an unauthenticated request with `401` and a
//! `WWW-Authenticate: Digest ...` header. The parsed [`DigestChallenge`] is
//! kept on the session and signs every following request until the engine
//! issues a fresh one.

use md5::{Digest, Md5};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Authentication challenge issued by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestChallenge {
	pub realm: String,
	pub nonce: String,
	#[serde(default)]
	pub stale: bool,
	#[serde(default)]
	pub qop: Option<String>,
	#[serde(default)]
	pub opaque: Option<String>,
}

impl DigestChallenge {
	/// Parses a `WWW-Authenticate` header value.
	pub fn parse(header: &str) -> Result<Self> {
		let header = header.trim();
		let params = header
			.strip_prefix("Digest")
			.filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
			.ok_or_else(|| Error::Challenge(format!("not a digest challenge: '{header}'")))?;

		let mut challenge = DigestChallenge::default();
		let mut nonce = None;
		let mut realm = None;
		for (key, value) in parse_params(params)? {
			match key.to_ascii_lowercase().as_str() {
				"realm" => realm = Some(value),
				"nonce" => nonce = Some(value),
				"stale" => challenge.stale = value.eq_ignore_ascii_case("true"),
				"qop" => challenge.qop = Some(value),
				"opaque" => challenge.opaque = Some(value),
				_ => {}
			}
		}

		challenge.realm = realm.ok_or_else(|| Error::Challenge("missing realm".into()))?;
		challenge.nonce = nonce.ok_or_else(|| Error::Challenge("missing nonce".into()))?;
		Ok(challenge)
	}

	/// Engine realms look like `Digest:` followed by 32 upper-case hex digits.
	pub fn realm_is_valid(realm: &str) -> bool {
		realm
			.strip_prefix("Digest:")
			.is_some_and(|id| id.len() == 32 && id.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)))
	}

	/// Builds the `Authorization` header value for one request.
	pub fn authorization(&self, username: &str, password: &str, method: &str, uri: &str, nonce_count: u32, cnonce: &str) -> String {
		let ha1 = hash_credentials(username, &self.realm, password);
		let ha2 = md5_hex(&format!("{method}:{uri}"));
		let nc = format!("{nonce_count:08x}");

		let mut header = format!("Digest username=\"{username}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\"", self.realm, self.nonce);
		match self.qop.as_deref() {
			Some(qop) if qop.split(',').any(|q| q.trim() == "auth") => {
				let response = md5_hex(&format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", self.nonce));
				header.push_str(&format!(", qop=\"auth\", nc={nc}, cnonce=\"{cnonce}\", response=\"{response}\""));
			}
			_ => {
				let response = md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce));
				header.push_str(&format!(", response=\"{response}\""));
			}
		}
		if let Some(opaque) = &self.opaque {
			header.push_str(&format!(", opaque=\"{opaque}\""));
		}
		header
	}
}

/// `MD5(username:realm:password)` as lower-case hex, the form the engine
/// stores for admin accounts.
pub fn hash_credentials(username: &str, realm: &str, password: &str) -> String {
	md5_hex(&format!("{username}:{realm}:{password}"))
}

/// Raw `MD5(username:realm:password)` bytes.
pub fn hash_credentials_raw(username: &str, realm: &str, password: &str) -> [u8; 16] {
	let digest = Md5::digest(format!("{username}:{realm}:{password}").as_bytes());
	let mut raw = [0u8; 16];
	raw.copy_from_slice(&digest);
	raw
}

/// Random client nonce.
pub fn new_cnonce() -> String {
	let bytes: [u8; 16] = rand::thread_rng().r#gen();
	hex::encode(bytes)
}

fn md5_hex(input: &str) -> String {
	hex::encode(Md5::digest(input.as_bytes()))
}

fn parse_params(input: &str) -> Result<Vec<(String, String)>> {
	let mut params = Vec::new();
	let mut rest = input.trim_start();

	while !rest.is_empty() {
		let eq = rest.find('=').ok_or_else(|| Error::Challenge(format!("expected key=value near '{rest}'")))?;
		let key = rest[..eq].trim().to_string();
		rest = rest[eq + 1..].trim_start();

		let value;
		if let Some(quoted) = rest.strip_prefix('"') {
			let end = quoted.find('"').ok_or_else(|| Error::Challenge(format!("unterminated quote for '{key}'")))?;
			value = quoted[..end].to_string();
			rest = &quoted[end + 1..];
		} else {
			let end = rest.find(',').unwrap_or(rest.len());
			value = rest[..end].trim().to_string();
			rest = &rest[end..];
		}
		params.push((key, value));

		rest = rest.trim_start();
		if let Some(next) = rest.strip_prefix(',') {
			rest = next.trim_start();
		} else if !rest.is_empty() {
			return Err(Error::Challenge(format!("unexpected '{rest}'")));
		}
	}

	Ok(params)
}
