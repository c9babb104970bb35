//! Operational reserve of the relayer account.

use alloy::primitives::{Address, U256};
use relayer_chain::{ChainClient, ChainError};
use std::sync::Arc;
use tracing::warn;

/// The relayer's own native-currency account.
///
/// Every write the gas station issues is paid from this balance, so each
/// write path checks the reserve before committing to anything.
pub struct RelayerAccount {
	chain: Arc<ChainClient>,
	minimum_reserve: U256,
}

impl RelayerAccount {
	pub fn new(chain: Arc<ChainClient>, minimum_reserve: U256) -> Self {
		Self {
			chain,
			minimum_reserve,
		}
	}

	pub fn address(&self) -> Address {
		self.chain.relayer_address()
	}

	pub fn minimum_reserve(&self) -> U256 {
		self.minimum_reserve
	}

	pub async fn native_balance(&self) -> Result<U256, ChainError> {
		self.chain.read_native_balance(self.address()).await
	}

	/// Balance needed before issuing writes costing `write_cost` in total.
	pub fn required_reserve(&self, write_cost: U256) -> U256 {
		self.minimum_reserve.max(write_cost)
	}

	pub async fn is_operational(&self, write_cost: U256) -> Result<bool, ChainError> {
		let balance = self.native_balance().await?;
		Ok(balance >= self.required_reserve(write_cost))
	}

	/// Fails with [`ChainError::RelayerUnderfunded`] when the reserve for
	/// `write_cost` is not available.
	pub async fn ensure_operational(&self, write_cost: U256) -> Result<(), ChainError> {
		let available = self.native_balance().await?;
		let required = self.required_reserve(write_cost);
		if available < required {
			warn!(
				relayer = %self.address(),
				%required,
				%available,
				"Relayer reserve too low to issue writes"
			);
			return Err(ChainError::RelayerUnderfunded {
				required,
				available,
			});
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::address;
	use relayer_account::{implementations::local::LocalWallet, AccountService};
	use relayer_chain::mock::MockChain;
	use relayer_chain::ChainInterface;

	const RELAYER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

	fn account(native: U256, minimum_reserve: U256) -> RelayerAccount {
		let chain = MockChain::new(Address::repeat_byte(0x55), RELAYER, 56);
		chain.set_native_balance(RELAYER, native);
		let wallet = LocalWallet::new(
			"0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
		)
		.unwrap();
		let client = ChainClient::new(
			Arc::new(AccountService::new(Box::new(wallet))),
			56,
			vec![chain.endpoint("https://rpc.example.com") as Arc<dyn ChainInterface>],
		)
		.unwrap();
		RelayerAccount::new(Arc::new(client), minimum_reserve)
	}

	#[test]
	fn test_required_reserve_is_the_larger_bound() {
		let account = account(U256::ZERO, U256::from(50u64));
		assert_eq!(account.required_reserve(U256::from(10u64)), U256::from(50u64));
		assert_eq!(account.required_reserve(U256::from(80u64)), U256::from(80u64));
	}

	#[tokio::test]
	async fn test_underfunded_relayer_is_refused() {
		let account = account(U256::from(40u64), U256::from(50u64));

		assert!(!account.is_operational(U256::ZERO).await.unwrap());
		match account.ensure_operational(U256::from(10u64)).await {
			Err(ChainError::RelayerUnderfunded {
				required,
				available,
			}) => {
				assert_eq!(required, U256::from(50u64));
				assert_eq!(available, U256::from(40u64));
			}
			other => panic!("unexpected {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_funded_relayer_is_operational() {
		let account = account(U256::from(100u64), U256::from(50u64));
		assert!(account.is_operational(U256::from(100u64)).await.unwrap());
		assert!(account.ensure_operational(U256::from(60u64)).await.is_ok());
	}
}
