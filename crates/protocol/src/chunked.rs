//! Strict HTTP/1.1 chunked transfer coding.
//!
//! Only the subset the management engine emits is accepted: a bare
//! hexadecimal length line (no extensions), CRLF, exactly that many data
//! bytes, CRLF, repeated, then `0\r\n\r\n` with nothing following. Decoding
//! is all-or-nothing; a malformed body never yields partial output.

use crate::error::{Error, Result};

const TERMINATOR: &[u8] = b"0\r\n\r\n";
const CRLF: &[u8] = b"\r\n";

/// Reassembles the payload carried by a chunked body.
pub fn decode(input: &[u8]) -> Result<Vec<u8>> {
	if !input.ends_with(TERMINATOR) {
		return Err(Error::Chunked("missing terminal chunk".into()));
	}

	let mut output = Vec::with_capacity(input.len());
	let mut cursor = 0;

	loop {
		let rest = &input[cursor..];
		let line_len = find_crlf(rest).ok_or_else(|| Error::Chunked(format!("unterminated length line at offset {cursor}")))?;
		let line = &rest[..line_len];
		if line.is_empty() || !line.iter().all(u8::is_ascii_hexdigit) {
			return Err(Error::Chunked(format!("invalid chunk length line at offset {cursor}")));
		}

		// The line is ASCII hex digits, so the conversion cannot fail.
		let digits = std::str::from_utf8(line).map_err(|e| Error::Chunked(e.to_string()))?;
		let size = usize::from_str_radix(digits, 16).map_err(|_| Error::Chunked(format!("chunk length '{digits}' out of range")))?;
		cursor += line_len + CRLF.len();

		if size == 0 {
			let tail = &input[cursor..];
			if tail == CRLF {
				return Ok(output);
			}
			if tail.starts_with(CRLF) {
				return Err(Error::Chunked(format!("{} bytes of trailing garbage", tail.len() - CRLF.len())));
			}
			return Err(Error::Chunked("terminal chunk not followed by CRLF".into()));
		}

		let data_end = cursor
			.checked_add(size)
			.filter(|end| end + CRLF.len() <= input.len())
			.ok_or_else(|| Error::Chunked(format!("chunk of {size} bytes overruns input")))?;
		if &input[data_end..data_end + CRLF.len()] != CRLF {
			return Err(Error::Chunked(format!("chunk of {size} bytes not followed by CRLF")));
		}

		output.extend_from_slice(&input[cursor..data_end]);
		cursor = data_end + CRLF.len();
	}
}

/// Decodes a chunked body that must carry UTF-8 text.
pub fn decode_str(input: &str) -> Result<String> {
	let bytes = decode(input.as_bytes())?;
	String::from_utf8(bytes).map_err(|e| Error::Chunked(format!("payload is not UTF-8: {e}")))
}

/// Encodes chunks using the same grammar [`decode`] accepts.
///
/// Empty chunks are skipped since a zero length would end the body early.
pub fn encode<I, C>(chunks: I) -> Vec<u8>
where
	I: IntoIterator<Item = C>,
	C: AsRef<[u8]>,
{
	let mut output = Vec::new();
	for chunk in chunks {
		let chunk = chunk.as_ref();
		if chunk.is_empty() {
			continue;
		}
		output.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
		output.extend_from_slice(chunk);
		output.extend_from_slice(CRLF);
	}
	output.extend_from_slice(TERMINATOR);
	output
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
	bytes.windows(CRLF.len()).position(|w| w == CRLF)
}
