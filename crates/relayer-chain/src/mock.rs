//! Scripted in-memory chain for tests.
//!
//! A [`MockChain`] holds one shared ledger (native balances, token balances,
//! allowances, nonces) and hands out [`MockEndpoint`]s that serve it. Each
//! endpoint can be scripted to fail, stall or misreport, and records every
//! call it receives.

use crate::erc20::IERC20;
use crate::erc20::IERC20Errors::{ERC20InsufficientAllowance, ERC20InsufficientBalance};
use crate::{ChainError, ChainInterface};
use alloy::consensus::{Transaction as _, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolError, SolValue};
use async_trait::async_trait;
use relayer_types::{Endpoint, EndpointKind, TxHash};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A call received by a [`MockEndpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
	ChainId,
	NativeBalance(Address),
	BalanceOf(Address),
	Allowance { owner: Address, spender: Address },
	SimulateTransferFrom {
		from: Address,
		to: Address,
		amount: U256,
	},
	PendingNonce(Address),
	SendRaw(TxHash),
	TransactionKnown(TxHash),
}

/// A transaction the ledger accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTransaction {
	pub hash: TxHash,
	pub nonce: u64,
	pub to: Option<Address>,
	pub value: U256,
	pub input: Bytes,
}

impl SentTransaction {
	/// Decoded `transferFrom` arguments, if this was one.
	pub fn transfer_from(&self) -> Option<IERC20::transferFromCall> {
		IERC20::transferFromCall::abi_decode(&self.input).ok()
	}
}

#[derive(Default)]
struct Ledger {
	native: HashMap<Address, U256>,
	balances: HashMap<Address, U256>,
	allowances: HashMap<(Address, Address), U256>,
	nonces: HashMap<Address, u64>,
	known: HashSet<TxHash>,
	sent: Vec<SentTransaction>,
}

/// Shared state of the simulated chain.
#[derive(Clone)]
pub struct MockChain {
	ledger: Arc<Mutex<Ledger>>,
	token: Address,
	relayer: Address,
	chain_id: u64,
}

impl MockChain {
	/// `relayer` is the only account that submits transactions.
	pub fn new(token: Address, relayer: Address, chain_id: u64) -> Self {
		Self {
			ledger: Arc::new(Mutex::new(Ledger::default())),
			token,
			relayer,
			chain_id,
		}
	}

	pub fn token(&self) -> Address {
		self.token
	}

	pub fn set_native_balance(&self, owner: Address, value: U256) {
		lock(&self.ledger).native.insert(owner, value);
	}

	pub fn set_token_balance(&self, owner: Address, value: U256) {
		lock(&self.ledger).balances.insert(owner, value);
	}

	pub fn set_allowance(&self, owner: Address, spender: Address, value: U256) {
		lock(&self.ledger).allowances.insert((owner, spender), value);
	}

	pub fn native_balance(&self, owner: Address) -> U256 {
		lock(&self.ledger).native.get(&owner).copied().unwrap_or_default()
	}

	pub fn token_balance(&self, owner: Address) -> U256 {
		lock(&self.ledger).balances.get(&owner).copied().unwrap_or_default()
	}

	pub fn allowance(&self, owner: Address, spender: Address) -> U256 {
		lock(&self.ledger)
			.allowances
			.get(&(owner, spender))
			.copied()
			.unwrap_or_default()
	}

	/// Every transaction accepted so far, in submission order.
	pub fn sent(&self) -> Vec<SentTransaction> {
		lock(&self.ledger).sent.clone()
	}

	/// Creates an endpoint serving this chain.
	pub fn endpoint(&self, url: &str) -> Arc<MockEndpoint> {
		Arc::new(MockEndpoint {
			endpoint: Endpoint::new(url, EndpointKind::Fallback),
			chain: self.clone(),
			script: Mutex::new(Script::default()),
			calls: Mutex::new(Vec::new()),
		})
	}

	fn simulate_transfer_from(
		&self,
		spender: Address,
		call: &IERC20::transferFromCall,
	) -> Result<Bytes, ChainError> {
		let allowance = self.allowance(call.from, spender);
		if allowance < call.amount {
			return Err(revert(
				ERC20InsufficientAllowance {
					spender,
					allowance,
					needed: call.amount,
				}
				.abi_encode(),
			));
		}

		let balance = self.token_balance(call.from);
		if balance < call.amount {
			return Err(revert(
				ERC20InsufficientBalance {
					sender: call.from,
					balance,
					needed: call.amount,
				}
				.abi_encode(),
			));
		}

		Ok(Bytes::from(true.abi_encode()))
	}

	fn apply(&self, raw: &Bytes) -> Result<TxHash, ChainError> {
		let envelope = TxEnvelope::decode_2718(&mut raw.as_ref())
			.map_err(|e| ChainError::Malformed(format!("Undecodable transaction: {}", e)))?;
		let hash = *envelope.tx_hash();

		let mut ledger = lock(&self.ledger);
		if ledger.known.contains(&hash) {
			return Err(rpc(-32000, "already known"));
		}

		let expected_nonce = ledger.nonces.get(&self.relayer).copied().unwrap_or_default();
		if envelope.nonce() != expected_nonce {
			return Err(rpc(-32000, "nonce too low"));
		}

		let gas_cost = U256::from(envelope.gas_limit()) * U256::from(envelope.gas_price().unwrap_or_default());
		let available = ledger.native.get(&self.relayer).copied().unwrap_or_default();
		if available < gas_cost + envelope.value() {
			return Err(rpc(
				-32000,
				"insufficient funds for gas * price + value",
			));
		}

		ledger
			.native
			.insert(self.relayer, available - gas_cost - envelope.value());

		if let Some(to) = envelope.to() {
			if !envelope.value().is_zero() {
				*ledger.native.entry(to).or_default() += envelope.value();
			}

			if to == self.token {
				if let Ok(call) = IERC20::transferFromCall::abi_decode(envelope.input()) {
					let allowance = ledger
						.allowances
						.get(&(call.from, self.relayer))
						.copied()
						.unwrap_or_default();
					let balance = ledger.balances.get(&call.from).copied().unwrap_or_default();
					// A failing transferFrom is still mined, it just moves nothing.
					if allowance >= call.amount && balance >= call.amount {
						ledger.allowances.insert((call.from, self.relayer), allowance - call.amount);
						ledger.balances.insert(call.from, balance - call.amount);
						*ledger.balances.entry(call.to).or_default() += call.amount;
					}
				}
			}
		}

		ledger.nonces.insert(self.relayer, expected_nonce + 1);
		ledger.known.insert(hash);
		ledger.sent.push(SentTransaction {
			hash,
			nonce: envelope.nonce(),
			to: envelope.to(),
			value: envelope.value(),
			input: envelope.input().clone(),
		});

		Ok(hash)
	}
}

fn rpc(code: i64, message: &str) -> ChainError {
	ChainError::Rpc {
		code,
		message: message.to_string(),
		revert_data: None,
	}
}

fn revert(data: Vec<u8>) -> ChainError {
	ChainError::Rpc {
		code: 3,
		message: "execution reverted".to_string(),
		revert_data: Some(Bytes::from(data)),
	}
}

type ErrorFactory = Arc<dyn Fn() -> ChainError + Send + Sync>;

#[derive(Default)]
struct Script {
	fail_all: Option<ErrorFactory>,
	fail_next: VecDeque<ErrorFactory>,
	fail_sends: Option<ErrorFactory>,
	swallow_sends: Option<ErrorFactory>,
	returned_hash: Option<TxHash>,
	delay: Option<Duration>,
}

/// One simulated node.
pub struct MockEndpoint {
	endpoint: Endpoint,
	chain: MockChain,
	script: Mutex<Script>,
	calls: Mutex<Vec<MockCall>>,
}

impl MockEndpoint {
	/// Every call fails with the produced error.
	pub fn fail_all<F>(&self, error: F)
	where
		F: Fn() -> ChainError + Send + Sync + 'static,
	{
		lock(&self.script).fail_all = Some(Arc::new(error));
	}

	/// The next `count` calls fail with the produced error.
	pub fn fail_next<F>(&self, count: usize, error: F)
	where
		F: Fn() -> ChainError + Send + Sync + 'static,
	{
		let factory: ErrorFactory = Arc::new(error);
		let mut script = lock(&self.script);
		for _ in 0..count {
			script.fail_next.push_back(factory.clone());
		}
	}

	/// `eth_sendRawTransaction` fails without applying the transaction.
	pub fn fail_sends<F>(&self, error: F)
	where
		F: Fn() -> ChainError + Send + Sync + 'static,
	{
		lock(&self.script).fail_sends = Some(Arc::new(error));
	}

	/// `eth_sendRawTransaction` applies the transaction, then times out.
	pub fn swallow_sends(&self) {
		let timeout = self.endpoint.write_timeout;
		self.swallow_sends_with(move || ChainError::Timeout(timeout));
	}

	/// `eth_sendRawTransaction` applies the transaction, then fails with the
	/// produced error.
	pub fn swallow_sends_with<F>(&self, error: F)
	where
		F: Fn() -> ChainError + Send + Sync + 'static,
	{
		lock(&self.script).swallow_sends = Some(Arc::new(error));
	}

	/// `eth_sendRawTransaction` reports this hash instead of the real one.
	pub fn return_hash(&self, hash: TxHash) {
		lock(&self.script).returned_hash = Some(hash);
	}

	/// Every call waits this long before answering.
	pub fn delay(&self, delay: Duration) {
		lock(&self.script).delay = Some(delay);
	}

	pub fn calls(&self) -> Vec<MockCall> {
		lock(&self.calls).clone()
	}

	pub fn call_count(&self) -> usize {
		lock(&self.calls).len()
	}

	/// Records the call and applies scripted delays and failures.
	async fn enter(&self, call: MockCall) -> Result<(), ChainError> {
		lock(&self.calls).push(call);

		let (delay, failure) = {
			let mut script = lock(&self.script);
			let failure = script
				.fail_next
				.pop_front()
				.or_else(|| script.fail_all.clone());
			(script.delay, failure)
		};

		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		match failure {
			Some(factory) => Err(factory()),
			None => Ok(()),
		}
	}
}

#[async_trait]
impl ChainInterface for MockEndpoint {
	fn endpoint(&self) -> &Endpoint {
		&self.endpoint
	}

	async fn chain_id(&self) -> Result<u64, ChainError> {
		self.enter(MockCall::ChainId).await?;
		Ok(self.chain.chain_id)
	}

	async fn native_balance(&self, owner: Address) -> Result<U256, ChainError> {
		self.enter(MockCall::NativeBalance(owner)).await?;
		Ok(self.chain.native_balance(owner))
	}

	async fn call(
		&self,
		from: Option<Address>,
		to: Address,
		data: Bytes,
	) -> Result<Bytes, ChainError> {
		if to != self.chain.token || data.len() < 4 {
			return Err(rpc(-32000, "execution reverted"));
		}

		let selector = &data[..4];
		if selector == IERC20::balanceOfCall::SELECTOR {
			let call = IERC20::balanceOfCall::abi_decode(&data)
				.map_err(|e| ChainError::Malformed(e.to_string()))?;
			self.enter(MockCall::BalanceOf(call.account)).await?;
			Ok(Bytes::from(self.chain.token_balance(call.account).abi_encode()))
		} else if selector == IERC20::allowanceCall::SELECTOR {
			let call = IERC20::allowanceCall::abi_decode(&data)
				.map_err(|e| ChainError::Malformed(e.to_string()))?;
			self.enter(MockCall::Allowance {
				owner: call.owner,
				spender: call.spender,
			})
			.await?;
			Ok(Bytes::from(
				self.chain.allowance(call.owner, call.spender).abi_encode(),
			))
		} else if selector == IERC20::transferFromCall::SELECTOR {
			let call = IERC20::transferFromCall::abi_decode(&data)
				.map_err(|e| ChainError::Malformed(e.to_string()))?;
			self.enter(MockCall::SimulateTransferFrom {
				from: call.from,
				to: call.to,
				amount: call.amount,
			})
			.await?;
			self.chain
				.simulate_transfer_from(from.unwrap_or_default(), &call)
		} else {
			Err(rpc(-32000, "execution reverted"))
		}
	}

	async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError> {
		self.enter(MockCall::PendingNonce(address)).await?;
		Ok(lock(&self.chain.ledger)
			.nonces
			.get(&address)
			.copied()
			.unwrap_or_default())
	}

	async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, ChainError> {
		let hash = TxEnvelope::decode_2718(&mut raw.as_ref())
			.map(|envelope| *envelope.tx_hash())
			.unwrap_or(B256::ZERO);
		self.enter(MockCall::SendRaw(hash)).await?;

		let (fail_sends, swallow, returned_hash) = {
			let script = lock(&self.script);
			(
				script.fail_sends.clone(),
				script.swallow_sends.clone(),
				script.returned_hash,
			)
		};

		if let Some(factory) = fail_sends {
			return Err(factory());
		}

		let applied = self.chain.apply(&raw)?;
		if let Some(factory) = swallow {
			return Err(factory());
		}
		Ok(returned_hash.unwrap_or(applied))
	}

	async fn transaction_known(&self, hash: TxHash) -> Result<bool, ChainError> {
		self.enter(MockCall::TransactionKnown(hash)).await?;
		Ok(lock(&self.chain.ledger).known.contains(&hash))
	}
}
