//! Admin password rules of the management engine.

use rand::Rng;
use rand::seq::SliceRandom;

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%^&*()-_=+[]{}";

pub const MIN_LEN: usize = 8;
pub const MAX_LEN: usize = 32;

/// 8 to 32 characters with at least one upper-case letter, lower-case
/// letter, digit and symbol; `:`, `,` and `"` are rejected by the engine.
pub fn is_compliant(password: &str) -> bool {
	(MIN_LEN..=MAX_LEN).contains(&password.chars().count())
		&& password.chars().any(|c| c.is_ascii_uppercase())
		&& password.chars().any(|c| c.is_ascii_lowercase())
		&& password.chars().any(|c| c.is_ascii_digit())
		&& password.chars().any(|c| !c.is_ascii_alphanumeric())
		&& !password.contains([':', ',', '"'])
}

/// Random compliant password of `len` characters, clamped to the allowed range.
pub fn generate(len: usize) -> String {
	let len = len.clamp(MIN_LEN, MAX_LEN);
	let mut rng = rand::thread_rng();
	let mut bytes: Vec<u8> = [UPPER, LOWER, DIGITS, SPECIAL]
		.iter()
		.map(|set| set[rng.gen_range(0..set.len())])
		.collect();
	let all: Vec<u8> = [UPPER, LOWER, DIGITS, SPECIAL].concat();
	while bytes.len() < len {
		bytes.push(all[rng.gen_range(0..all.len())]);
	}
	bytes.shuffle(&mut rng);
	bytes.into_iter().map(char::from).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn generated_passwords_comply() {
		for len in [0, 8, 16, 32, 64] {
			let password = generate(len);
			assert!(is_compliant(&password), "{password}");
			assert_eq!(password.len(), len.clamp(MIN_LEN, MAX_LEN));
		}
	}

	#[test]
	fn rejects_weak_or_forbidden() {
		assert!(is_compliant("P@ssw0rd"));
		assert!(!is_compliant("password"));
		assert!(!is_compliant("Sh0rt!"));
		assert!(!is_compliant("P@ss:w0rd"));
	}
}
