//! Serde helpers for configuration deserialization

use alloy::primitives::U256;
use serde::{Deserialize, Deserializer, Serializer};

/// Deserializes a string of base units (wei), e.g. `"50000000000000"`.
///
/// Only plain decimal digits are accepted, so no fractional or scaled value
/// can be rounded on the way in.
pub fn deserialize_wei_amount<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
	D: Deserializer<'de>,
{
	let raw = String::deserialize(deserializer)?;
	let trimmed = raw.trim();
	if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
		return Err(serde::de::Error::custom(format!(
			"Wei amount '{}' must be a string of decimal digits",
			raw
		)));
	}
	U256::from_str_radix(trimmed, 10)
		.map_err(|e| serde::de::Error::custom(format!("Invalid wei amount '{}': {}", raw, e)))
}

pub fn serialize_wei_amount<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
where
	S: Serializer,
{
	serializer.serialize_str(&value.to_string())
}
