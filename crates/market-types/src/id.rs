//! Time-ordered object identifiers.
//!
//! Every persisted record is keyed by an [`ObjectId`]: 12 bytes rendered as 24
//! lowercase hex characters. The layout is a 4-byte big-endian Unix timestamp,
//! 5 bytes unique to the running process and a 3-byte big-endian counter.
//! Identifiers issued by one process are strictly increasing, so byte order,
//! string order and creation order coincide. Chat polling relies on this.

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;

const COUNTER_MAX: u32 = 0x00FF_FFFF;

/// Random bytes that distinguish this process from other writers.
static PROCESS_UNIQUE: Lazy<[u8; 5]> = Lazy::new(|| {
	let seed = uuid::Uuid::new_v4();
	let mut bytes = [0u8; 5];
	bytes.copy_from_slice(&seed.as_bytes()[..5]);
	bytes
});

/// Last issued (timestamp, counter) pair.
static LAST_ISSUED: Mutex<(u32, u32)> = Mutex::new((0, 0));

/// Errors produced when parsing an identifier from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectIdError {
	#[error("expected 24 hex characters, got {0}")]
	InvalidLength(usize),
	#[error("invalid hex: {0}")]
	InvalidHex(String),
}

/// 12-byte time-ordered identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
	/// Issues a new identifier greater than every identifier previously
	/// issued by this process.
	pub fn new() -> Self {
		let now = chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;

		let (timestamp, counter) = {
			let mut last = LAST_ISSUED.lock().unwrap_or_else(|e| e.into_inner());
			let next = if now > last.0 {
				(now, 0)
			} else if last.1 < COUNTER_MAX {
				// Same second, or the clock stepped back.
				(last.0, last.1 + 1)
			} else {
				(last.0.saturating_add(1), 0)
			};
			*last = next;
			next
		};

		let mut bytes = [0u8; 12];
		bytes[0..4].copy_from_slice(&timestamp.to_be_bytes());
		bytes[4..9].copy_from_slice(&*PROCESS_UNIQUE);
		bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
		Self(bytes)
	}

	/// Builds an identifier from raw bytes.
	pub fn from_bytes(bytes: [u8; 12]) -> Self {
		Self(bytes)
	}

	pub fn bytes(&self) -> [u8; 12] {
		self.0
	}

	/// Unix timestamp (seconds) embedded in the identifier.
	pub fn timestamp(&self) -> u32 {
		u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
	}

	/// Lowercase hex form.
	pub fn to_hex(&self) -> String {
		hex::encode(self.0)
	}
}

impl Default for ObjectId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for ObjectId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

impl FromStr for ObjectId {
	type Err = ObjectIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.len() != 24 {
			return Err(ObjectIdError::InvalidLength(s.len()));
		}
		let decoded = hex::decode(s).map_err(|e| ObjectIdError::InvalidHex(e.to_string()))?;
		let mut bytes = [0u8; 12];
		bytes.copy_from_slice(&decoded);
		Ok(Self(bytes))
	}
}

impl Serialize for ObjectId {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.to_hex())
	}
}

impl<'de> Deserialize<'de> for ObjectId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_ids_strictly_increase() {
		let mut previous = ObjectId::new();
		for _ in 0..1000 {
			let next = ObjectId::new();
			assert!(next > previous);
			assert!(next.to_hex() > previous.to_hex());
			previous = next;
		}
	}

	#[test]
	fn test_parse_display() {
		let id = ObjectId::new();
		let parsed: ObjectId = id.to_string().parse().unwrap();
		assert_eq!(parsed, id);
		assert_eq!(id.to_string().len(), 24);
	}

	#[test]
	fn test_rejects_malformed() {
		assert_eq!(
			"abc".parse::<ObjectId>(),
			Err(ObjectIdError::InvalidLength(3))
		);
		assert!(matches!(
			"zzzzzzzzzzzzzzzzzzzzzzzz".parse::<ObjectId>(),
			Err(ObjectIdError::InvalidHex(_))
		));
	}

	#[test]
	fn test_timestamp_is_recent() {
		let id = ObjectId::new();
		let now = chrono::Utc::now().timestamp() as u32;
		assert!(id.timestamp() <= now + 1);
		assert!(id.timestamp() + 5 >= now);
	}
}
