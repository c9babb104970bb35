//! Transfer requests submitted by the order layer.

use alloy::primitives::{keccak256, utils::parse_units, Address, B256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced while parsing a human-readable token amount.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
	#[error("Amount is empty")]
	Empty,
	#[error("Amount must not be negative: {0}")]
	Negative(String),
	#[error("Invalid amount '{value}': {message}")]
	Invalid { value: String, message: String },
}

/// Parses a decimal string such as `"12.5"` into the token's base units.
///
/// Parsing is exact: no floating point is involved at any stage.
pub fn parse_token_amount(value: &str, decimals: u8) -> Result<U256, AmountError> {
	let trimmed = value.trim();
	if trimmed.is_empty() {
		return Err(AmountError::Empty);
	}
	if trimmed.starts_with('-') {
		return Err(AmountError::Negative(trimmed.to_string()));
	}
	if let Some((_, fraction)) = trimmed.split_once('.') {
		if fraction.len() > usize::from(decimals) {
			return Err(AmountError::Invalid {
				value: trimmed.to_string(),
				message: format!("more than {} fractional digits", decimals),
			});
		}
	}

	let parsed = parse_units(trimmed, decimals).map_err(|e| AmountError::Invalid {
		value: trimmed.to_string(),
		message: e.to_string(),
	})?;

	Ok(parsed.get_absolute())
}

/// Kind of P2P order a transfer settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
	/// User buys tokens and pays fiat over UPI.
	BuyUpi,
	/// User buys tokens and pays fiat by cash deposit.
	BuyCdm,
	/// User sells tokens for fiat.
	Sell,
}

impl OrderKind {
	fn tag(self) -> u8 {
		match self {
			OrderKind::BuyUpi => 0,
			OrderKind::BuyCdm => 1,
			OrderKind::Sell => 2,
		}
	}
}

impl fmt::Display for OrderKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OrderKind::BuyUpi => write!(f, "BUY_UPI"),
			OrderKind::BuyCdm => write!(f, "BUY_CDM"),
			OrderKind::Sell => write!(f, "SELL"),
		}
	}
}

/// A single gasless transfer the relayer is asked to drive.
///
/// `token_amount` is in the token's base units. The request is immutable once
/// built; re-submitting the same request re-evaluates on-chain state from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
	/// Owner of the tokens; must have approved the relayer as spender.
	pub from_address: Address,
	/// Recipient of the tokens.
	pub to_address: Address,
	/// Amount to move, in base units.
	pub token_amount: U256,
	/// Fiat value of the order, informational only.
	pub fiat_amount: Decimal,
	pub order_kind: OrderKind,
	pub chain_id: u64,
}

impl TransferRequest {
	pub fn new(
		from_address: Address,
		to_address: Address,
		token_amount: U256,
		fiat_amount: Decimal,
		order_kind: OrderKind,
		chain_id: u64,
	) -> Self {
		Self {
			from_address,
			to_address,
			token_amount,
			fiat_amount,
			order_kind,
			chain_id,
		}
	}

	/// Deterministic identity of this request.
	///
	/// Callers persisting a resumable funding/approval workflow key it by this
	/// value. Two requests with identical fields share the same id.
	pub fn request_id(&self) -> B256 {
		let fiat = self.fiat_amount.normalize().to_string();
		let mut buf = Vec::with_capacity(20 + 20 + 32 + 8 + 1 + fiat.len());
		buf.extend_from_slice(self.from_address.as_slice());
		buf.extend_from_slice(self.to_address.as_slice());
		buf.extend_from_slice(&self.token_amount.to_be_bytes::<32>());
		buf.extend_from_slice(&self.chain_id.to_be_bytes());
		buf.push(self.order_kind.tag());
		buf.extend_from_slice(fiat.as_bytes());
		keccak256(buf)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::address;
	use std::str::FromStr;

	fn sample_request() -> TransferRequest {
		TransferRequest::new(
			address!("1111111111111111111111111111111111111111"),
			address!("2222222222222222222222222222222222222222"),
			U256::from(100u64),
			Decimal::from_str("8450.50").unwrap(),
			OrderKind::Sell,
			56,
		)
	}

	#[test]
	fn test_parse_whole_and_fractional_amounts() {
		let hundred = parse_token_amount("100", 18).unwrap();
		assert_eq!(hundred, U256::from(100u64) * U256::from(10u64).pow(U256::from(18u64)));

		let one_and_half = parse_token_amount(" 1.5 ", 6).unwrap();
		assert_eq!(one_and_half, U256::from(1_500_000u64));
	}

	#[test]
	fn test_parse_rejects_bad_amounts() {
		assert_eq!(parse_token_amount("", 18), Err(AmountError::Empty));
		assert!(matches!(
			parse_token_amount("-3", 18),
			Err(AmountError::Negative(_))
		));
		assert!(matches!(
			parse_token_amount("ten", 18),
			Err(AmountError::Invalid { .. })
		));
	}

	#[test]
	fn test_parse_keeps_every_fractional_digit() {
		let smallest = parse_token_amount("1.000000000000000001", 18).unwrap();
		assert_eq!(smallest, U256::from(1_000_000_000_000_000_001u64));

		assert!(matches!(
			parse_token_amount("1.0000000000000000001", 18),
			Err(AmountError::Invalid { .. })
		));
		assert!(matches!(
			parse_token_amount("0.1234567", 6),
			Err(AmountError::Invalid { .. })
		));
	}

	#[test]
	fn test_request_id_is_stable_and_field_sensitive() {
		let request = sample_request();
		assert_eq!(request.request_id(), sample_request().request_id());

		let mut other = sample_request();
		other.token_amount = U256::from(101u64);
		assert_ne!(request.request_id(), other.request_id());

		let mut other_kind = sample_request();
		other_kind.order_kind = OrderKind::BuyUpi;
		assert_ne!(request.request_id(), other_kind.request_id());
	}

	#[test]
	fn test_request_id_ignores_fiat_trailing_zeros() {
		let mut padded = sample_request();
		padded.fiat_amount = Decimal::from_str("8450.5000").unwrap();
		assert_eq!(sample_request().request_id(), padded.request_id());
	}

	#[test]
	fn test_order_kind_wire_names() {
		let json = serde_json::to_string(&OrderKind::BuyCdm).unwrap();
		assert_eq!(json, "\"BUY_CDM\"");
		let parsed: OrderKind = serde_json::from_str("\"BUY_UPI\"").unwrap();
		assert_eq!(parsed, OrderKind::BuyUpi);
		assert_eq!(OrderKind::Sell.to_string(), "SELL");
	}
}
