//! Local private key wallet.

use crate::{AccountError, AccountInterface};
use alloy::consensus::TxEnvelope;
use alloy::network::{Ethereum, EthereumWallet, TransactionBuilder};
use alloy::primitives::Address;
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use relayer_types::{ConfigSchema, Field, FieldType, Schema, ValidationError};
use tracing::debug;

/// Wallet holding the relayer's private key in process memory.
pub struct LocalWallet {
	address: Address,
	wallet: EthereumWallet,
}

impl LocalWallet {
	/// Creates a wallet from a hex-encoded private key, with or without `0x`.
	pub fn new(private_key_hex: &str) -> Result<Self, AccountError> {
		let signer = private_key_hex
			.trim()
			.parse::<PrivateKeySigner>()
			.map_err(|e| AccountError::InvalidKey(format!("Invalid private key: {}", e)))?;

		debug!("Wallet configured for address: {}", signer.address());
		Ok(Self {
			address: signer.address(),
			wallet: EthereumWallet::from(signer),
		})
	}
}

/// Configuration schema for LocalWallet.
pub struct LocalWalletSchema;

impl ConfigSchema for LocalWalletSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("private_key", FieldType::String).with_validator(|value| {
				let key = value.as_str().unwrap_or_default();
				let key_without_prefix = key.strip_prefix("0x").unwrap_or(key);

				if key_without_prefix.len() != 64 {
					return Err("Private key must be 64 hex characters (32 bytes)".to_string());
				}
				if !key_without_prefix.chars().all(|c| c.is_ascii_hexdigit()) {
					return Err("Private key must be valid hexadecimal".to_string());
				}
				Ok(())
			})],
			vec![],
		);

		schema.validate(config)
	}
}

#[async_trait]
impl AccountInterface for LocalWallet {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalWalletSchema)
	}

	fn address(&self) -> Address {
		self.address
	}

	async fn sign_transaction(&self, tx: TransactionRequest) -> Result<TxEnvelope, AccountError> {
		if tx.nonce.is_none() || tx.gas.is_none() || tx.gas_price.is_none() {
			return Err(AccountError::SigningFailed(
				"Transaction request must set nonce, gas limit and gas price".to_string(),
			));
		}

		let tx = tx.with_from(self.address);
		TransactionBuilder::<Ethereum>::build(tx, &self.wallet)
			.await
			.map_err(|e| AccountError::SigningFailed(format!("Failed to sign transaction: {}", e)))
	}
}

/// Creates the account provider from the `[relayer]` configuration table.
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	LocalWalletSchema
		.validate(config)
		.map_err(|e| AccountError::InvalidKey(e.to_string()))?;

	let private_key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.ok_or_else(|| AccountError::InvalidKey("private_key is required".to_string()))?;

	Ok(Box::new(LocalWallet::new(private_key)?))
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::eips::eip2718::Encodable2718;
	use alloy::primitives::{address, B256, U256};

	// Well-known development key; never funded on a real network.
	const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

	fn funding_request() -> TransactionRequest {
		TransactionRequest::default()
			.with_to(address!("2222222222222222222222222222222222222222"))
			.with_value(U256::from(80_000_000_000_000u64))
			.with_nonce(7)
			.with_gas_limit(21_000)
			.with_gas_price(1_000_000_000)
			.with_chain_id(56)
	}

	#[test]
	fn test_address_derivation() {
		let wallet = LocalWallet::new(KEY).unwrap();
		assert_eq!(
			wallet.address(),
			address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
		);
	}

	#[test]
	fn test_invalid_key_is_rejected() {
		assert!(matches!(
			LocalWallet::new("0xnot-a-key"),
			Err(AccountError::InvalidKey(_))
		));
	}

	#[tokio::test]
	async fn test_signing_is_deterministic_legacy() {
		let wallet = LocalWallet::new(KEY).unwrap();

		let first = wallet.sign_transaction(funding_request()).await.unwrap();
		let second = wallet.sign_transaction(funding_request()).await.unwrap();

		assert!(first.is_legacy());
		assert_ne!(*first.tx_hash(), B256::ZERO);
		assert_eq!(first.tx_hash(), second.tx_hash());
		assert_eq!(first.encoded_2718(), second.encoded_2718());
	}

	#[tokio::test]
	async fn test_incomplete_request_is_not_signed() {
		let wallet = LocalWallet::new(KEY).unwrap();
		let mut request = funding_request();
		request.nonce = None;

		assert!(matches!(
			wallet.sign_transaction(request).await,
			Err(AccountError::SigningFailed(_))
		));
	}

	#[test]
	fn test_create_account_from_config() {
		let config: toml::Value = toml::from_str(&format!("private_key = \"{}\"", KEY)).unwrap();
		let account = create_account(&config).unwrap();
		assert_eq!(
			account.address(),
			address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
		);

		let short: toml::Value = toml::from_str("private_key = \"0xabc\"").unwrap();
		assert!(create_account(&short).is_err());
	}
}
