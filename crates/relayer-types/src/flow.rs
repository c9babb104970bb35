//! Outcomes of a gasless transfer orchestration call.

use crate::chain::TxHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a failure, driving retry and reporting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
	/// Infrastructure flakiness; retried with endpoint rotation.
	TransientNetwork,
	/// Counterparty token balance is below the requested amount.
	InsufficientFunds,
	/// Counterparty allowance to the relayer is below the requested amount.
	InsufficientAllowance,
	/// Anything else. Logged and never retried.
	Fatal,
}

impl ErrorKind {
	pub fn is_retryable(self) -> bool {
		matches!(self, ErrorKind::TransientNetwork)
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ErrorKind::TransientNetwork => "transient network",
			ErrorKind::InsufficientFunds => "insufficient funds",
			ErrorKind::InsufficientAllowance => "insufficient allowance",
			ErrorKind::Fatal => "fatal",
		};
		f.write_str(name)
	}
}

/// Specific reason behind a [`FlowResult::Failed`].
///
/// The cause determines both the machine-readable outcome code and the
/// [`ErrorKind`] of the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCause {
	InsufficientBalance,
	InsufficientAllowance,
	RelayerUnderfunded,
	EndpointsExhausted,
	ReconciliationRequired,
	MalformedTransactionHash,
	Rejected,
}

impl FailureCause {
	pub fn error_kind(self) -> ErrorKind {
		match self {
			FailureCause::InsufficientBalance => ErrorKind::InsufficientFunds,
			FailureCause::InsufficientAllowance => ErrorKind::InsufficientAllowance,
			_ => ErrorKind::Fatal,
		}
	}

	pub fn code(self) -> &'static str {
		match self {
			FailureCause::InsufficientBalance => "INSUFFICIENT_BALANCE",
			FailureCause::InsufficientAllowance => "INSUFFICIENT_ALLOWANCE",
			FailureCause::RelayerUnderfunded => "RELAYER_UNDERFUNDED",
			FailureCause::EndpointsExhausted => "ENDPOINTS_EXHAUSTED",
			FailureCause::ReconciliationRequired => "RECONCILIATION_REQUIRED",
			FailureCause::MalformedTransactionHash => "MALFORMED_TRANSACTION_HASH",
			FailureCause::Rejected => "TRANSACTION_REJECTED",
		}
	}
}

/// Result of one orchestration call. Exactly one variant is produced per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlowResult {
	/// The relayer sent native currency so the counterparty can pay for approval.
	NeedsGasFunding { funding_tx_hash: TxHash },
	/// The counterparty must submit an approval transaction themselves.
	NeedsApproval { reason: String },
	/// The transfer was accepted by the node.
	TransferCompleted { tx_hash: TxHash },
	Failed {
		error_kind: ErrorKind,
		cause: FailureCause,
		message: String,
	},
}

impl FlowResult {
	/// Builds a failure whose kind is derived from its cause.
	pub fn failed(cause: FailureCause, message: impl Into<String>) -> Self {
		FlowResult::Failed {
			error_kind: cause.error_kind(),
			cause,
			message: message.into(),
		}
	}

	/// Machine-readable outcome code.
	pub fn code(&self) -> &'static str {
		match self {
			FlowResult::NeedsGasFunding { .. } => "NEEDS_GAS_FUNDING",
			FlowResult::NeedsApproval { .. } => "NEEDS_APPROVAL",
			FlowResult::TransferCompleted { .. } => "TRANSFER_COMPLETED",
			FlowResult::Failed { cause, .. } => cause.code(),
		}
	}

	/// Human-readable guidance on what happens next.
	pub fn message(&self) -> String {
		match self {
			FlowResult::NeedsGasFunding { funding_tx_hash } => format!(
				"Sent gas funds to your wallet (tx {}). Approve the token spend to continue.",
				funding_tx_hash
			),
			FlowResult::NeedsApproval { reason } => reason.clone(),
			FlowResult::TransferCompleted { tx_hash } => {
				format!("Transfer submitted successfully (tx {}).", tx_hash)
			}
			FlowResult::Failed { message, .. } => message.clone(),
		}
	}

	pub fn is_terminal_success(&self) -> bool {
		matches!(self, FlowResult::TransferCompleted { .. })
	}

	pub fn tx_hash(&self) -> Option<TxHash> {
		match self {
			FlowResult::NeedsGasFunding { funding_tx_hash } => Some(*funding_tx_hash),
			FlowResult::TransferCompleted { tx_hash } => Some(*tx_hash),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::B256;

	#[test]
	fn test_failed_derives_kind_from_cause() {
		let result = FlowResult::failed(FailureCause::InsufficientBalance, "balance too low");
		match result {
			FlowResult::Failed { error_kind, .. } => {
				assert_eq!(error_kind, ErrorKind::InsufficientFunds)
			}
			other => panic!("unexpected {:?}", other),
		}

		let underfunded = FlowResult::failed(FailureCause::RelayerUnderfunded, "relayer underfunded");
		assert_eq!(underfunded.code(), "RELAYER_UNDERFUNDED");
		assert!(matches!(
			underfunded,
			FlowResult::Failed {
				error_kind: ErrorKind::Fatal,
				..
			}
		));
	}

	#[test]
	fn test_json_shape_is_tagged() {
		let result = FlowResult::TransferCompleted {
			tx_hash: B256::repeat_byte(0xab),
		};
		let value = serde_json::to_value(&result).unwrap();
		assert_eq!(value["status"], "transfer_completed");
		assert!(value["tx_hash"].as_str().unwrap().starts_with("0xabab"));

		let failed = FlowResult::failed(FailureCause::InsufficientAllowance, "approve first");
		let value = serde_json::to_value(&failed).unwrap();
		assert_eq!(value["status"], "failed");
		assert_eq!(value["error_kind"], "INSUFFICIENT_ALLOWANCE");
		assert_eq!(value["cause"], "INSUFFICIENT_ALLOWANCE");
	}

	#[test]
	fn test_only_transient_is_retryable() {
		assert!(ErrorKind::TransientNetwork.is_retryable());
		assert!(!ErrorKind::InsufficientFunds.is_retryable());
		assert!(!ErrorKind::InsufficientAllowance.is_retryable());
		assert!(!ErrorKind::Fatal.is_retryable());
	}
}
