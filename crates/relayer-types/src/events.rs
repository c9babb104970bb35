//! Events published by the gas station.

use crate::chain::TxHash;
use crate::flow::FailureCause;
use alloy::primitives::{Address, B256, U256};

/// Notable state changes, broadcast to subscribers of the event bus.
///
/// Transactions are reported on submission. Subscribers that need inclusion
/// must track the hash themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasStationEvent {
	/// Native currency was sent to a counterparty to pay for their approval.
	GasFunded {
		request_id: B256,
		recipient: Address,
		amount: U256,
		tx_hash: TxHash,
	},
	/// A `transferFrom` was accepted by a node.
	TransferSubmitted { request_id: B256, tx_hash: TxHash },
	/// A write may or may not have reached the chain. An operator must check it.
	ReconciliationRequired {
		request_id: B256,
		tx_hash: TxHash,
		detail: String,
	},
	FlowFailed {
		request_id: B256,
		cause: FailureCause,
		message: String,
	},
}
