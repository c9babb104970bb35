//! The relayer's signing identity.
//!
//! The gas station owns exactly one account for its whole lifetime. Providers
//! implement [`AccountInterface`]; the rest of the system only sees the
//! [`AccountService`] wrapper.

use alloy::consensus::TxEnvelope;
use alloy::primitives::Address;
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use relayer_types::ConfigSchema;
use thiserror::Error;

pub mod implementations {
	pub mod local;
}

#[derive(Debug, Error)]
pub enum AccountError {
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	#[error("Invalid key: {0}")]
	InvalidKey(String),
}

#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Schema of the TOML section that configures this provider.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	fn address(&self) -> Address;

	/// Signs a fully populated transaction request.
	///
	/// The request must carry nonce, gas limit, gas price and chain id. The
	/// returned envelope's hash is final: re-broadcasting the same envelope can
	/// never produce a second transaction.
	async fn sign_transaction(&self, tx: TransactionRequest) -> Result<TxEnvelope, AccountError>;
}

pub struct AccountService {
	provider: Box<dyn AccountInterface>,
}

impl AccountService {
	pub fn new(provider: Box<dyn AccountInterface>) -> Self {
		Self { provider }
	}

	pub fn address(&self) -> Address {
		self.provider.address()
	}

	pub async fn sign(&self, tx: TransactionRequest) -> Result<TxEnvelope, AccountError> {
		self.provider.sign_transaction(tx).await
	}
}

impl std::fmt::Debug for AccountService {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AccountService")
			.field("address", &self.address())
			.finish()
	}
}
