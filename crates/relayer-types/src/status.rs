//! Health report of the relayer account.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Snapshot returned by the gas station health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerStatus {
	pub address: Address,
	/// Native balance in wei. Zero when it could not be read.
	pub native_balance: U256,
	/// True when the relayer can afford the writes of one full flow.
	pub is_ready: bool,
	pub chain_id: u64,
	/// Endpoint currently selected by the pool, without credentials.
	pub active_endpoint: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}
