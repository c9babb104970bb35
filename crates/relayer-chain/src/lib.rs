//! Chain access for the gas station.
//!
//! [`ChainClient`] issues the relayer's reads and signed writes through an
//! [`EndpointPool`] of [`ChainInterface`] backends, one backend per upstream
//! node. Failures are classified by [`classify::classify`] and retried with
//! rotation by the [`RetryController`].

use alloy::eips::eip2718::Encodable2718;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use backoff::backoff::Backoff;
use relayer_account::AccountService;
use relayer_types::{truncate_hash, Endpoint, TxHash};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub mod classify;
pub mod erc20;
pub mod pool;
pub mod retry;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

pub use classify::classify;
pub use erc20::IERC20;
pub use pool::EndpointPool;
pub use retry::{RetryController, RetryPolicy};

#[derive(Debug, Error)]
pub enum ChainError {
	#[error("Request timed out after {0:?}")]
	Timeout(Duration),
	#[error("Connection failed: {0}")]
	Connection(String),
	#[error("HTTP error {status}: {body}")]
	Http { status: u16, body: String },
	#[error("RPC error {code}: {message}")]
	Rpc {
		code: i64,
		message: String,
		revert_data: Option<Bytes>,
	},
	#[error("Execution reverted: {reason}")]
	Reverted { reason: String, data: Bytes },
	#[error("Malformed response: {0}")]
	Malformed(String),
	#[error("Transaction {tx_hash} may have been broadcast but was not confirmed as accepted: {detail}")]
	Unconfirmed { tx_hash: TxHash, detail: String },
	#[error("Signing failed: {0}")]
	Signing(String),
	#[error("Relayer balance {available} wei is below the {required} wei needed")]
	RelayerUnderfunded { required: U256, available: U256 },
	#[error("Configuration error: {0}")]
	Configuration(String),
	#[error("{0}")]
	Other(String),
}

/// One upstream node.
///
/// Implementations apply the endpoint's own read and write timeouts and
/// translate transport failures into [`ChainError`] variants.
#[async_trait]
pub trait ChainInterface: Send + Sync {
	fn endpoint(&self) -> &Endpoint;

	async fn chain_id(&self) -> Result<u64, ChainError>;

	async fn native_balance(&self, owner: Address) -> Result<U256, ChainError>;

	/// `eth_call` against latest state.
	async fn call(&self, from: Option<Address>, to: Address, data: Bytes)
		-> Result<Bytes, ChainError>;

	/// Nonce including transactions still in the node's mempool.
	async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError>;

	async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, ChainError>;

	/// Whether the node knows the transaction, pending or mined.
	async fn transaction_known(&self, hash: TxHash) -> Result<bool, ChainError>;
}

/// Fixed fee policy: legacy gas price and fixed gas limits, no fee bidding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
	pub gas_price_wei: u128,
	pub transfer_gas_limit: u64,
	pub funding_gas_limit: u64,
}

impl Default for FeePolicy {
	fn default() -> Self {
		Self {
			gas_price_wei: 1_000_000_000,
			transfer_gas_limit: 200_000,
			funding_gas_limit: 21_000,
		}
	}
}

impl FeePolicy {
	/// Cost in wei of `gas_limit` gas at the configured price.
	pub fn cost(&self, gas_limit: u64) -> U256 {
		U256::from(gas_limit) * U256::from(self.gas_price_wei)
	}

	pub fn transfer_cost(&self) -> U256 {
		self.cost(self.transfer_gas_limit)
	}

	pub fn funding_cost(&self) -> U256 {
		self.cost(self.funding_gas_limit)
	}
}

/// Relayer-side chain client.
///
/// Reads run concurrently. Writes are serialized per relayer account: the
/// balance check, nonce fetch, signing and broadcast happen under one lock,
/// held until the node has returned a hash or the write has definitively
/// failed.
pub struct ChainClient {
	pool: EndpointPool,
	backends: Vec<Arc<dyn ChainInterface>>,
	account: Arc<AccountService>,
	retry: RetryController,
	fees: FeePolicy,
	/// Native balance that must remain after the cost of a write.
	minimum_reserve: U256,
	chain_id: u64,
	submission: Mutex<()>,
}

impl ChainClient {
	/// Creates a client over `backends`, in preference order.
	pub fn new(
		account: Arc<AccountService>,
		chain_id: u64,
		backends: Vec<Arc<dyn ChainInterface>>,
	) -> Result<Self, ChainError> {
		let endpoints = backends.iter().map(|b| b.endpoint().clone()).collect();
		Ok(Self {
			pool: EndpointPool::new(endpoints)?,
			backends,
			account,
			retry: RetryController::default(),
			fees: FeePolicy::default(),
			minimum_reserve: U256::ZERO,
			chain_id,
			submission: Mutex::new(()),
		})
	}

	pub fn with_retry(mut self, retry: RetryController) -> Self {
		self.retry = retry;
		self
	}

	pub fn with_fees(mut self, fees: FeePolicy) -> Self {
		self.fees = fees;
		self
	}

	/// Floor for the relayer's native balance, checked before every write.
	pub fn with_minimum_reserve(mut self, minimum_reserve: U256) -> Self {
		self.minimum_reserve = minimum_reserve;
		self
	}

	pub fn relayer_address(&self) -> Address {
		self.account.address()
	}

	pub fn chain_id(&self) -> u64 {
		self.chain_id
	}

	pub fn fees(&self) -> &FeePolicy {
		&self.fees
	}

	pub fn pool(&self) -> &EndpointPool {
		&self.pool
	}

	pub fn retry(&self) -> &RetryController {
		&self.retry
	}

	/// Points the pool back at the preferred endpoint.
	pub fn reset_endpoints(&self) {
		self.pool.reset();
	}

	/// Verifies that the active endpoint serves the configured chain.
	pub async fn verify_chain_id(&self) -> Result<(), ChainError> {
		let reported = self
			.retry
			.run(&self.pool, "eth_chainId", |i| {
				let backend = self.backends[i].clone();
				async move { backend.chain_id().await }
			})
			.await?;

		if reported != self.chain_id {
			return Err(ChainError::Configuration(format!(
				"Chain ID mismatch: expected {}, got {}",
				self.chain_id, reported
			)));
		}
		Ok(())
	}

	pub async fn read_native_balance(&self, owner: Address) -> Result<U256, ChainError> {
		self.retry
			.run(&self.pool, "eth_getBalance", |i| {
				let backend = self.backends[i].clone();
				async move { backend.native_balance(owner).await }
			})
			.await
	}

	pub async fn read_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
		let data = IERC20::balanceOfCall { account: owner }.abi_encode();
		let raw = self.read_call(token, data, "balanceOf").await?;
		IERC20::balanceOfCall::abi_decode_returns(&raw)
			.map_err(|e| ChainError::Malformed(format!("balanceOf returned {}: {}", raw, e)))
	}

	pub async fn read_allowance(
		&self,
		token: Address,
		owner: Address,
		spender: Address,
	) -> Result<U256, ChainError> {
		let data = IERC20::allowanceCall { owner, spender }.abi_encode();
		let raw = self.read_call(token, data, "allowance").await?;
		IERC20::allowanceCall::abi_decode_returns(&raw)
			.map_err(|e| ChainError::Malformed(format!("allowance returned {}: {}", raw, e)))
	}

	async fn read_call(
		&self,
		to: Address,
		data: Vec<u8>,
		label: &str,
	) -> Result<Bytes, ChainError> {
		let data = Bytes::from(data);
		self.retry
			.run(&self.pool, label, |i| {
				let backend = self.backends[i].clone();
				let data = data.clone();
				async move { backend.call(None, to, data).await }
			})
			.await
	}

	/// Pays `amount` of the relayer's native currency to `to`.
	pub async fn send_value_transfer(&self, to: Address, amount: U256) -> Result<TxHash, ChainError> {
		let required = amount + self.fees.funding_cost();
		let request = TransactionRequest::default()
			.with_to(to)
			.with_value(amount)
			.with_gas_limit(self.fees.funding_gas_limit);

		info!(%to, %amount, "Sending native funding payment");
		self.submit(request, required, "funding").await
	}

	/// Moves `amount` of `token` from `from` to `to` using the allowance
	/// `from` granted to the relayer.
	///
	/// The call is simulated first. A transfer the token would reject is never
	/// broadcast, so the relayer is never billed for a failing transaction.
	pub async fn send_token_transfer_from(
		&self,
		token: Address,
		from: Address,
		to: Address,
		amount: U256,
	) -> Result<TxHash, ChainError> {
		let data = Bytes::from(IERC20::transferFromCall { from, to, amount }.abi_encode());
		let relayer = self.relayer_address();

		let simulated = self
			.retry
			.run(&self.pool, "transferFrom simulation", |i| {
				let backend = self.backends[i].clone();
				let data = data.clone();
				async move { backend.call(Some(relayer), token, data).await }
			})
			.await?;

		// Some tokens return nothing; only an explicit `false` is a rejection.
		if !simulated.is_empty() {
			let accepted = IERC20::transferFromCall::abi_decode_returns(&simulated).map_err(|e| {
				ChainError::Malformed(format!("transferFrom returned {}: {}", simulated, e))
			})?;
			if !accepted {
				return Err(ChainError::Reverted {
					reason: "transferFrom returned false".to_string(),
					data: Bytes::new(),
				});
			}
		}

		let request = TransactionRequest::default()
			.with_to(token)
			.with_input(data)
			.with_gas_limit(self.fees.transfer_gas_limit);

		info!(%from, %to, %amount, "Submitting transferFrom");
		self.submit(request, self.fees.transfer_cost(), "transferFrom").await
	}

	/// Refuses the write unless the relayer can pay `cost` and still hold the
	/// larger of the cost and the minimum reserve. Called with the submission
	/// lock held, so concurrent writes see each other's spending.
	async fn ensure_relayer_balance(&self, cost: U256) -> Result<(), ChainError> {
		let required = cost.max(self.minimum_reserve);
		let available = self.read_native_balance(self.relayer_address()).await?;
		if available < required {
			return Err(ChainError::RelayerUnderfunded {
				required,
				available,
			});
		}
		Ok(())
	}

	/// Signs `request` once and broadcasts it.
	async fn submit(
		&self,
		request: TransactionRequest,
		cost: U256,
		label: &str,
	) -> Result<TxHash, ChainError> {
		let _guard = self.submission.lock().await;
		self.ensure_relayer_balance(cost).await?;
		let relayer = self.relayer_address();

		let nonce = self
			.retry
			.run(&self.pool, "eth_getTransactionCount", |i| {
				let backend = self.backends[i].clone();
				async move { backend.pending_nonce(relayer).await }
			})
			.await?;

		let request = request
			.with_from(relayer)
			.with_nonce(nonce)
			.with_chain_id(self.chain_id)
			.with_gas_price(self.fees.gas_price_wei);

		let envelope = self
			.account
			.sign(request)
			.await
			.map_err(|e| ChainError::Signing(e.to_string()))?;
		let tx_hash = *envelope.tx_hash();
		let raw = Bytes::from(envelope.encoded_2718());

		debug!(tx_hash = %truncate_hash(&tx_hash), nonce, "Signed {} transaction", label);
		self.broadcast(tx_hash, raw, label).await
	}

	/// Broadcasts already-signed bytes, rotating endpoints on transient errors.
	///
	/// Every attempt sends the same bytes, so at most one copy can ever be
	/// included. Any transient failure of a send is ambiguous: a gateway error
	/// or an internal node error may arrive after the node accepted the
	/// transaction. Later attempts therefore first ask the node whether it
	/// already has the transaction. If attempts run out after an ambiguous
	/// failure the write is reported as [`ChainError::Unconfirmed`] and must be
	/// reconciled by an operator.
	async fn broadcast(&self, tx_hash: TxHash, raw: Bytes, label: &str) -> Result<TxHash, ChainError> {
		let policy = self.retry.policy().clone();
		let mut backoff = policy.backoff();
		let start = self.pool.current_index();
		let mut attempts = 0;
		let mut ambiguous = false;

		loop {
			let index = (start + attempts as usize) % self.pool.len();
			attempts += 1;
			let backend = self.backends[index].clone();

			let outcome = if ambiguous {
				match backend.transaction_known(tx_hash).await {
					Ok(true) => {
						info!(
							tx_hash = %truncate_hash(&tx_hash),
							"{} transaction already known to the network", label
						);
						self.pool.mark_healthy(index);
						return Ok(tx_hash);
					}
					Ok(false) => backend.send_raw_transaction(raw.clone()).await,
					Err(e) => Err(e),
				}
			} else {
				backend.send_raw_transaction(raw.clone()).await
			};

			let error = match outcome {
				Ok(returned) => {
					self.pool.mark_healthy(index);
					if returned != tx_hash {
						warn!(
							expected = %tx_hash,
							returned = %returned,
							"Node returned an unexpected transaction hash"
						);
					}
					info!(tx_hash = %truncate_hash(&returned), "Submitted {} transaction", label);
					return Ok(returned);
				}
				Err(e) if classify::is_already_known(&e) => {
					self.pool.mark_healthy(index);
					info!(tx_hash = %truncate_hash(&tx_hash), "Submitted {} transaction", label);
					return Ok(tx_hash);
				}
				Err(e) => e,
			};

			if !classify(&error).is_retryable() {
				if ambiguous {
					return Err(ChainError::Unconfirmed {
						tx_hash,
						detail: error.to_string(),
					});
				}
				return Err(error);
			}

			self.pool.mark_failing(index);
			self.pool.advance_from(index);
			ambiguous = true;

			if attempts >= policy.max_attempts {
				warn!(
					tx_hash = %truncate_hash(&tx_hash),
					"{} broadcast failed after {} attempts: {}", label, attempts, error
				);
				if ambiguous {
					return Err(ChainError::Unconfirmed {
						tx_hash,
						detail: error.to_string(),
					});
				}
				return Err(error);
			}

			let delay = backoff.next_backoff().unwrap_or(policy.max_delay);
			warn!(
				endpoint = %self.pool.endpoint(index + 1).display_url(),
				"{} broadcast failed, attempt {}/{}, retrying in {:?}: {}",
				label, attempts, policy.max_attempts, delay, error
			);
			tokio::time::sleep(delay).await;
		}
	}
}
