use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// A `major.minor.revision` protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion {
	pub major: u32,
	pub minor: u32,
	pub revision: u32,
}

impl ProtocolVersion {
	pub const fn new(major: u32, minor: u32, revision: u32) -> Self {
		Self { major, minor, revision }
	}

	/// Whether a peer speaking `remote` can be served by this (local) version.
	///
	/// Majors must match. Within a major, a newer local minor accepts any
	/// older remote minor; on the same minor the local revision must be at
	/// least the remote one.
	pub fn is_compatible_with(&self, remote: &ProtocolVersion) -> bool {
		self.major == remote.major && ((self.minor == remote.minor && self.revision >= remote.revision) || self.minor > remote.minor)
	}
}

impl FromStr for ProtocolVersion {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut parts = s.trim().split('.');
		let mut next = || -> Result<u32, Error> {
			parts
				.next()
				.and_then(|p| p.parse::<u32>().ok())
				.ok_or_else(|| Error::Version(s.to_string()))
		};
		let version = Self::new(next()?, next()?, next()?);
		if parts.next().is_some() {
			return Err(Error::Version(s.to_string()));
		}
		Ok(version)
	}
}

impl fmt::Display for ProtocolVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
	}
}

impl Serialize for ProtocolVersion {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for ProtocolVersion {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		raw.parse().map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn compatible(local: &str, remote: &str) -> bool {
		let local: ProtocolVersion = local.parse().unwrap();
		let remote: ProtocolVersion = remote.parse().unwrap();
		local.is_compatible_with(&remote)
	}

	#[test]
	fn identical_versions_are_compatible() {
		assert!(compatible("4.0.0", "4.0.0"));
	}

	#[test]
	fn newer_remote_minor_is_incompatible() {
		assert!(!compatible("4.0.0", "4.1.0"));
	}

	#[test]
	fn older_remote_minor_is_compatible_regardless_of_revision() {
		assert!(compatible("4.1.0", "4.0.5"));
	}

	#[test]
	fn newer_remote_revision_is_incompatible() {
		assert!(!compatible("4.0.0", "4.0.1"));
		assert!(compatible("4.0.2", "4.0.1"));
	}

	#[test]
	fn major_mismatch_is_incompatible() {
		assert!(!compatible("4.0.0", "3.0.0"));
		assert!(!compatible("4.0.0", "5.0.0"));
	}

	#[test]
	fn rejects_malformed_versions() {
		assert!("4.0".parse::<ProtocolVersion>().is_err());
		assert!("4.0.0.1".parse::<ProtocolVersion>().is_err());
		assert!("four.0.0".parse::<ProtocolVersion>().is_err());
		assert!("".parse::<ProtocolVersion>().is_err());
	}

	#[test]
	fn round_trips_through_display() {
		let v: ProtocolVersion = "4.2.7".parse().unwrap();
		assert_eq!(v.to_string(), "4.2.7");
	}
}
