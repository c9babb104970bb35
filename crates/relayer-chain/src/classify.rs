//! Maps raw chain failures onto the relayer's error taxonomy.
//!
//! Structured evidence is consulted first: the error variant itself, then
//! ABI-encoded revert data, then JSON-RPC error codes. Matching on
//! human-readable messages is the last resort, since node and token wording
//! varies between implementations.

use crate::erc20::IERC20Errors::{ERC20InsufficientAllowance, ERC20InsufficientBalance};
use crate::ChainError;
use alloy::sol_types::{decode_revert_reason, SolError};
use relayer_types::ErrorKind;

/// JSON-RPC codes that indicate node-side trouble rather than a rejection.
const TRANSIENT_RPC_CODES: &[i64] = &[
	-32002, // resource unavailable
	-32005, // limit exceeded
	-32603, // internal error
];

/// Node-level rejections caused by the relayer's own native balance.
const RELAYER_FUNDS_PHRASES: &[&str] = &["insufficient funds for gas", "insufficient funds for transfer"];

const ALLOWANCE_PHRASES: &[&str] = &[
	"insufficient allowance",
	"exceeds allowance",
	"allowance exceeded",
	"erc20insufficientallowance",
];

const BALANCE_PHRASES: &[&str] = &[
	"exceeds balance",
	"insufficient balance",
	"erc20insufficientbalance",
];

const NETWORK_PHRASES: &[&str] = &[
	"timeout",
	"timed out",
	"etimedout",
	"network",
	"http request failed",
	"fetch failed",
	"connection reset",
	"connection refused",
	"econnreset",
	"too many requests",
	"rate limit",
];

/// Classifies a chain failure.
pub fn classify(error: &ChainError) -> ErrorKind {
	match error {
		ChainError::Timeout(_) | ChainError::Connection(_) => ErrorKind::TransientNetwork,
		ChainError::Http { status, .. } => {
			if *status == 408 || *status == 429 || *status >= 500 {
				ErrorKind::TransientNetwork
			} else {
				ErrorKind::Fatal
			}
		}
		ChainError::Rpc {
			code,
			message,
			revert_data,
		} => {
			if let Some(data) = revert_data {
				return classify_revert(data);
			}
			if let Some(kind) = classify_rejection(message) {
				return kind;
			}
			if TRANSIENT_RPC_CODES.contains(code) && !mentions_revert(message) {
				return ErrorKind::TransientNetwork;
			}
			classify_message(message)
		}
		ChainError::Reverted { reason, data } => {
			if !data.is_empty() {
				return classify_revert(data);
			}
			classify_rejection(reason).unwrap_or(ErrorKind::Fatal)
		}
		ChainError::Other(message) => classify_message(message),
		ChainError::Malformed(_)
		| ChainError::Unconfirmed { .. }
		| ChainError::Signing(_)
		| ChainError::RelayerUnderfunded { .. }
		| ChainError::Configuration(_) => ErrorKind::Fatal,
	}
}

/// Classifies ABI-encoded revert data. A revert is never transient.
pub fn classify_revert(data: &[u8]) -> ErrorKind {
	if data.len() >= 4 {
		let selector = &data[..4];
		if selector == ERC20InsufficientAllowance::SELECTOR {
			return ErrorKind::InsufficientAllowance;
		}
		if selector == ERC20InsufficientBalance::SELECTOR {
			return ErrorKind::InsufficientFunds;
		}
	}

	decode_revert_reason(data)
		.and_then(|reason| classify_rejection(&reason))
		.unwrap_or(ErrorKind::Fatal)
}

/// Returns true when a send failed because the node already holds the
/// transaction, which means the earlier broadcast was accepted.
pub fn is_already_known(error: &ChainError) -> bool {
	match error {
		ChainError::Rpc { message, .. } | ChainError::Other(message) => {
			let lower = message.to_lowercase();
			lower.contains("already known") || lower.contains("known transaction")
		}
		_ => false,
	}
}

fn mentions_revert(message: &str) -> bool {
	message.to_lowercase().contains("revert")
}

/// Domain rejections recognised from text. Allowance wording is checked before
/// balance wording because some tokens mention both.
fn classify_rejection(message: &str) -> Option<ErrorKind> {
	let lower = message.to_lowercase();

	if contains_any(&lower, RELAYER_FUNDS_PHRASES) {
		return Some(ErrorKind::Fatal);
	}
	if contains_any(&lower, ALLOWANCE_PHRASES) {
		return Some(ErrorKind::InsufficientAllowance);
	}
	if contains_any(&lower, BALANCE_PHRASES) {
		return Some(ErrorKind::InsufficientFunds);
	}
	None
}

fn classify_message(message: &str) -> ErrorKind {
	if let Some(kind) = classify_rejection(message) {
		return kind;
	}
	if contains_any(&message.to_lowercase(), NETWORK_PHRASES) {
		return ErrorKind::TransientNetwork;
	}
	ErrorKind::Fatal
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
	needles.iter().any(|needle| haystack.contains(needle))
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::{Address, Bytes, B256, U256};
	use alloy::sol_types::{Revert, SolError};
	use std::time::Duration;

	fn rpc(code: i64, message: &str) -> ChainError {
		ChainError::Rpc {
			code,
			message: message.to_string(),
			revert_data: None,
		}
	}

	#[test]
	fn test_transport_failures_are_transient() {
		assert_eq!(
			classify(&ChainError::Timeout(Duration::from_secs(3))),
			ErrorKind::TransientNetwork
		);
		assert_eq!(
			classify(&ChainError::Connection("connection refused".into())),
			ErrorKind::TransientNetwork
		);
		for status in [408u16, 429, 502, 503] {
			assert_eq!(
				classify(&ChainError::Http {
					status,
					body: String::new()
				}),
				ErrorKind::TransientNetwork
			);
		}
		assert_eq!(
			classify(&ChainError::Http {
				status: 401,
				body: "unauthorized".into()
			}),
			ErrorKind::Fatal
		);
	}

	#[test]
	fn test_custom_error_selectors() {
		let allowance = ERC20InsufficientAllowance {
			spender: Address::repeat_byte(1),
			allowance: U256::ZERO,
			needed: U256::from(100u64),
		}
		.abi_encode();
		let balance = ERC20InsufficientBalance {
			sender: Address::repeat_byte(2),
			balance: U256::from(50u64),
			needed: U256::from(100u64),
		}
		.abi_encode();

		let as_rpc = |data: Vec<u8>| ChainError::Rpc {
			code: 3,
			message: "execution reverted".into(),
			revert_data: Some(Bytes::from(data)),
		};

		assert_eq!(classify(&as_rpc(allowance)), ErrorKind::InsufficientAllowance);
		assert_eq!(classify(&as_rpc(balance)), ErrorKind::InsufficientFunds);
	}

	#[test]
	fn test_revert_strings_are_decoded() {
		let data = Revert::from("BEP20: transfer amount exceeds allowance").abi_encode();
		assert_eq!(classify_revert(&data), ErrorKind::InsufficientAllowance);

		let data = Revert::from("BEP20: transfer amount exceeds balance").abi_encode();
		assert_eq!(
			classify(&ChainError::Reverted {
				reason: "execution reverted".into(),
				data: Bytes::from(data)
			}),
			ErrorKind::InsufficientFunds
		);

		let data = Revert::from("Pausable: paused").abi_encode();
		assert_eq!(classify_revert(&data), ErrorKind::Fatal);
	}

	#[test]
	fn test_rpc_codes_before_message_fallback() {
		assert_eq!(classify(&rpc(-32005, "limit exceeded")), ErrorKind::TransientNetwork);
		assert_eq!(classify(&rpc(-32603, "internal error")), ErrorKind::TransientNetwork);
		assert_eq!(
			classify(&rpc(-32603, "execution reverted: Pausable: paused")),
			ErrorKind::Fatal
		);
		assert_eq!(classify(&rpc(-32000, "header not found")), ErrorKind::Fatal);
	}

	#[test]
	fn test_relayer_gas_shortage_is_fatal() {
		let err = rpc(
			-32000,
			"insufficient funds for gas * price + value: balance 0, tx cost 200000000000000",
		);
		assert_eq!(classify(&err), ErrorKind::Fatal);
	}

	#[test]
	fn test_allowance_wording_wins_over_balance_wording() {
		let err = ChainError::Other(
			"transfer amount exceeds allowance (balance check skipped, insufficient balance?)"
				.into(),
		);
		assert_eq!(classify(&err), ErrorKind::InsufficientAllowance);
	}

	#[test]
	fn test_message_fallback_for_network_wording() {
		assert_eq!(
			classify(&ChainError::Other("HTTP request failed. ETIMEDOUT".into())),
			ErrorKind::TransientNetwork
		);
		assert_eq!(
			classify(&ChainError::Other("something odd".into())),
			ErrorKind::Fatal
		);
	}

	#[test]
	fn test_unconfirmed_and_malformed_are_fatal() {
		assert_eq!(
			classify(&ChainError::Unconfirmed {
				tx_hash: B256::repeat_byte(9),
				detail: "timeout".into()
			}),
			ErrorKind::Fatal
		);
		assert_eq!(classify(&ChainError::Malformed("bad json".into())), ErrorKind::Fatal);
	}

	#[test]
	fn test_already_known_detection() {
		assert!(is_already_known(&rpc(-32000, "already known")));
		assert!(is_already_known(&rpc(-32000, "Known transaction: 0xabc")));
		assert!(!is_already_known(&rpc(-32000, "nonce too low")));
	}
}
