//! Gasless transfer orchestration.
//!
//! [`GasStation`] moves ERC20 tokens out of a counterparty's wallet using an
//! allowance granted to the relayer, paying all fees itself. When the
//! allowance is missing it either asks the counterparty to approve or, if
//! they cannot pay for the approval, sends them just enough native currency
//! to do so.

use alloy::primitives::{Address, U256};
use relayer_chain::ChainClient;
use relayer_config::Config;
use relayer_types::{FlowResult, RelayerStatus, TransferRequest};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub mod event_bus;
pub mod flow;
pub mod preflight;
pub mod relayer;

pub use event_bus::EventBus;
pub use preflight::{PreflightReport, PreflightValidator, Readiness};
pub use relayer::RelayerAccount;

use flow::{Flow, FlowStep};

#[derive(Debug, Error)]
pub enum GasStationError {
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
	#[error("Configuration error: {0}")]
	Config(String),
}

/// Tunables of the orchestrator. Gas price and gas limits of the relayer's
/// own writes live in the chain client's fee policy.
#[derive(Debug, Clone)]
pub struct GasStationConfig {
	pub chain_id: u64,
	pub token_address: Address,
	/// Gas the counterparty needs for one `approve`.
	pub approval_gas_limit: u64,
	/// Added on top of the approval cost when funding a counterparty.
	pub approval_safety_margin: U256,
	/// Native balance the relayer always keeps.
	pub minimum_reserve: U256,
	pub preflight_timeout: Duration,
	pub assume_ready_on_timeout: bool,
}

impl Default for GasStationConfig {
	fn default() -> Self {
		Self {
			chain_id: 56,
			token_address: alloy::primitives::address!("55d398326f99059fF775485246999027B3197955"),
			approval_gas_limit: 60_000,
			approval_safety_margin: U256::from(20_000_000_000_000u64),
			minimum_reserve: U256::from(50_000_000_000_000u64),
			preflight_timeout: Duration::from_secs(3),
			assume_ready_on_timeout: true,
		}
	}
}

impl From<&Config> for GasStationConfig {
	fn from(config: &Config) -> Self {
		Self {
			chain_id: config.relayer.chain_id,
			token_address: config.relayer.token_address,
			approval_gas_limit: config.fees.approval_gas_limit,
			approval_safety_margin: config.fees.approval_safety_margin,
			minimum_reserve: config.fees.minimum_reserve,
			preflight_timeout: Duration::from_millis(config.timeouts.preflight_ms),
			assume_ready_on_timeout: config.preflight.assume_ready_on_timeout,
		}
	}
}

pub struct GasStationBuilder {
	config: GasStationConfig,
	chain: Option<Arc<ChainClient>>,
	events: Option<EventBus>,
}

impl GasStationBuilder {
	pub fn new(config: GasStationConfig) -> Self {
		Self {
			config,
			chain: None,
			events: None,
		}
	}

	pub fn with_chain_client(mut self, chain: Arc<ChainClient>) -> Self {
		self.chain = Some(chain);
		self
	}

	pub fn with_event_bus(mut self, events: EventBus) -> Self {
		self.events = Some(events);
		self
	}

	pub fn with_preflight_timeout(mut self, timeout: Duration) -> Self {
		self.config.preflight_timeout = timeout;
		self
	}

	pub fn with_assume_ready_on_timeout(mut self, assume_ready: bool) -> Self {
		self.config.assume_ready_on_timeout = assume_ready;
		self
	}

	pub fn build(self) -> Result<GasStation, GasStationError> {
		let chain = self
			.chain
			.ok_or_else(|| GasStationError::Config("A chain client is required".to_string()))?;

		if chain.chain_id() != self.config.chain_id {
			return Err(GasStationError::Config(format!(
				"Chain client serves chain {}, gas station is configured for {}",
				chain.chain_id(),
				self.config.chain_id
			)));
		}

		Ok(GasStation {
			relayer: RelayerAccount::new(chain.clone(), self.config.minimum_reserve),
			preflight: PreflightValidator::new(
				chain.clone(),
				self.config.preflight_timeout,
				self.config.assume_ready_on_timeout,
			),
			events: self.events.unwrap_or_default(),
			config: self.config,
			chain,
		})
	}
}

/// Gasless transfer relayer.
///
/// One instance serves concurrent requests; share it behind an `Arc`.
pub struct GasStation {
	config: GasStationConfig,
	chain: Arc<ChainClient>,
	relayer: RelayerAccount,
	preflight: PreflightValidator,
	events: EventBus,
}

impl GasStation {
	pub fn builder(config: GasStationConfig) -> GasStationBuilder {
		GasStationBuilder::new(config)
	}

	pub fn config(&self) -> &GasStationConfig {
		&self.config
	}

	pub fn chain(&self) -> &Arc<ChainClient> {
		&self.chain
	}

	pub fn relayer_address(&self) -> Address {
		self.chain.relayer_address()
	}

	pub fn events(&self) -> &EventBus {
		&self.events
	}

	/// Native amount sent to a counterparty so it can pay for one approval.
	///
	/// Also the native balance above which a counterparty is expected to pay
	/// for the approval itself. Independent of the token amount.
	pub fn funding_amount(&self) -> U256 {
		self.chain.fees().cost(self.config.approval_gas_limit) + self.config.approval_safety_margin
	}

	/// Native balance the relayer needs to carry one request through funding
	/// and transfer.
	pub fn full_flow_cost(&self) -> U256 {
		let fees = self.chain.fees();
		self.funding_amount() + fees.funding_cost() + fees.transfer_cost()
	}

	/// Rejects requests that can never succeed, before touching the chain.
	pub fn validate_request(&self, request: &TransferRequest) -> Result<(), GasStationError> {
		if request.chain_id != self.config.chain_id {
			return Err(GasStationError::InvalidRequest(format!(
				"Chain {} is not supported, expected {}",
				request.chain_id, self.config.chain_id
			)));
		}
		if request.token_amount.is_zero() {
			return Err(GasStationError::InvalidRequest(
				"Token amount must be greater than zero".to_string(),
			));
		}
		if request.from_address == request.to_address {
			return Err(GasStationError::InvalidRequest(
				"Sender and recipient must differ".to_string(),
			));
		}
		if request.from_address == self.relayer_address() {
			return Err(GasStationError::InvalidRequest(
				"The relayer cannot be the sender".to_string(),
			));
		}
		Ok(())
	}

	/// Drives one request as far as the chain currently allows.
	///
	/// Expected outcomes, including failures the counterparty can fix, are
	/// returned as a [`FlowResult`]. Only invalid requests are errors.
	pub async fn process_gasless_transfer(
		&self,
		request: &TransferRequest,
	) -> Result<FlowResult, GasStationError> {
		self.validate_request(request)?;
		info!(
			from = %request.from_address,
			to = %request.to_address,
			amount = %request.token_amount,
			order = %request.order_kind,
			"Processing gasless transfer"
		);
		Ok(Flow::new(self, request, true).run(FlowStep::Start).await)
	}

	/// Transfers once the counterparty reports having approved. Never funds.
	pub async fn execute_transfer_after_approval(
		&self,
		request: &TransferRequest,
	) -> Result<FlowResult, GasStationError> {
		self.validate_request(request)?;
		info!(
			from = %request.from_address,
			to = %request.to_address,
			amount = %request.token_amount,
			"Executing transfer after approval"
		);
		Ok(Flow::new(self, request, false)
			.run(FlowStep::ReadyToTransfer)
			.await)
	}

	/// Quick readiness check of the counterparty, with no writes.
	pub async fn preflight(
		&self,
		request: &TransferRequest,
	) -> Result<PreflightReport, GasStationError> {
		self.validate_request(request)?;
		Ok(self
			.preflight
			.validate(
				self.config.token_address,
				request.from_address,
				self.relayer_address(),
				request.token_amount,
			)
			.await)
	}

	/// Health of the relayer account. Read failures are reported in the
	/// status rather than returned.
	pub async fn status(&self) -> RelayerStatus {
		let active_endpoint = self.chain.pool().current().display_url();
		let (native_balance, is_ready, error) = match self.relayer.native_balance().await {
			Ok(balance) => {
				let required = self.relayer.required_reserve(self.full_flow_cost());
				let error = (balance < required).then(|| {
					format!(
						"Balance {} wei is below the {} wei needed for one full flow",
						balance, required
					)
				});
				(balance, balance >= required, error)
			}
			Err(e) => {
				warn!("Failed to read relayer balance: {}", e);
				(U256::ZERO, false, Some(e.to_string()))
			}
		};

		RelayerStatus {
			address: self.relayer_address(),
			native_balance,
			is_ready,
			chain_id: self.config.chain_id,
			active_endpoint,
			error,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::{address, B256};
	use relayer_account::{implementations::local::LocalWallet, AccountService};
	use relayer_chain::mock::{MockCall, MockChain, MockEndpoint};
	use relayer_chain::{ChainError, ChainInterface, RetryController, RetryPolicy};
	use relayer_types::{ErrorKind, FailureCause, GasStationEvent, OrderKind};
	use rust_decimal::Decimal;
	use tokio::sync::broadcast;

	const RELAYER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
	const RELAYER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
	const TOKEN: Address = address!("55d398326f99059fF775485246999027B3197955");
	const USER: Address = address!("1111111111111111111111111111111111111111");
	const ADMIN: Address = address!("2222222222222222222222222222222222222222");

	/// 0.00008 native units at 1 gwei.
	const FUNDING: u64 = 80_000_000_000_000;

	fn units(n: u64) -> U256 {
		U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
	}

	struct Harness {
		chain: MockChain,
		endpoints: Vec<Arc<MockEndpoint>>,
		station: GasStation,
	}

	impl Harness {
		fn new(endpoints: usize) -> Self {
			Self::with(endpoints, endpoints.max(3) as u32, true)
		}

		fn with(endpoints: usize, max_attempts: u32, assume_ready: bool) -> Self {
			let chain = MockChain::new(TOKEN, RELAYER, 56);
			chain.set_native_balance(RELAYER, units(1));

			let mocks: Vec<Arc<MockEndpoint>> = (0..endpoints)
				.map(|i| chain.endpoint(&format!("https://rpc{}.example.com/key", i)))
				.collect();
			let backends = mocks
				.iter()
				.map(|m| m.clone() as Arc<dyn ChainInterface>)
				.collect();

			let account = AccountService::new(Box::new(LocalWallet::new(RELAYER_KEY).unwrap()));
			let client = ChainClient::new(Arc::new(account), 56, backends)
				.unwrap()
				.with_retry(RetryController::new(
					RetryPolicy::default()
						.with_max_attempts(max_attempts)
						.with_delays(Duration::from_millis(1), Duration::from_millis(2)),
				));

			let station = GasStation::builder(GasStationConfig::default())
				.with_chain_client(Arc::new(client))
				.with_assume_ready_on_timeout(assume_ready)
				.build()
				.unwrap();

			Self {
				chain,
				endpoints: mocks,
				station,
			}
		}

		fn user(&self, balance: U256, allowance: U256, native: U256) {
			self.chain.set_token_balance(USER, balance);
			self.chain.set_allowance(USER, RELAYER, allowance);
			self.chain.set_native_balance(USER, native);
		}
	}

	fn request(amount: U256) -> TransferRequest {
		TransferRequest::new(USER, ADMIN, amount, Decimal::new(100, 0), OrderKind::Sell, 56)
	}

	fn drain(receiver: &mut broadcast::Receiver<GasStationEvent>) -> Vec<GasStationEvent> {
		let mut events = Vec::new();
		while let Ok(event) = receiver.try_recv() {
			events.push(event);
		}
		events
	}

	fn cause(result: &FlowResult) -> FailureCause {
		match result {
			FlowResult::Failed { cause, .. } => *cause,
			other => panic!("expected a failure, got {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_short_balance_fails_without_writes() {
		let h = Harness::new(1);
		h.user(units(50), units(1000), U256::ZERO);

		let result = h
			.station
			.process_gasless_transfer(&request(units(100)))
			.await
			.unwrap();

		assert_eq!(cause(&result), FailureCause::InsufficientBalance);
		assert!(matches!(
			result,
			FlowResult::Failed {
				error_kind: ErrorKind::InsufficientFunds,
				..
			}
		));
		assert!(h.chain.sent().is_empty());
	}

	#[tokio::test]
	async fn test_missing_allowance_and_no_gas_funds_counterparty() {
		let h = Harness::new(1);
		h.user(units(500), U256::ZERO, U256::ZERO);
		let mut events = h.station.events().subscribe();

		let result = h
			.station
			.process_gasless_transfer(&request(units(100)))
			.await
			.unwrap();

		let funding_tx_hash = match result {
			FlowResult::NeedsGasFunding { funding_tx_hash } => funding_tx_hash,
			other => panic!("unexpected {:?}", other),
		};
		assert_ne!(funding_tx_hash, B256::ZERO);
		assert_eq!(h.chain.native_balance(USER), U256::from(FUNDING));

		let sent = h.chain.sent();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].to, Some(USER));
		assert!(sent[0].transfer_from().is_none());

		assert!(matches!(
			drain(&mut events).as_slice(),
			[GasStationEvent::GasFunded { recipient, .. }] if *recipient == USER
		));
	}

	#[tokio::test]
	async fn test_ready_counterparty_gets_exactly_one_transfer() {
		let h = Harness::new(1);
		h.user(units(500), units(1000), U256::ZERO);
		let mut events = h.station.events().subscribe();

		let result = h
			.station
			.process_gasless_transfer(&request(units(100)))
			.await
			.unwrap();

		let tx_hash = match result {
			FlowResult::TransferCompleted { tx_hash } => tx_hash,
			other => panic!("unexpected {:?}", other),
		};
		assert_ne!(tx_hash, B256::ZERO);

		let sent = h.chain.sent();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].hash, tx_hash);
		assert_eq!(h.chain.token_balance(ADMIN), units(100));
		assert_eq!(h.chain.token_balance(USER), units(400));

		assert!(matches!(
			drain(&mut events).as_slice(),
			[GasStationEvent::TransferSubmitted { .. }]
		));
	}

	#[tokio::test]
	async fn test_needs_approval_is_stable_without_payments() {
		let h = Harness::new(1);
		h.user(units(500), U256::ZERO, units(1));

		for _ in 0..2 {
			let result = h
				.station
				.process_gasless_transfer(&request(units(100)))
				.await
				.unwrap();
			assert_eq!(result.code(), "NEEDS_APPROVAL");
		}

		assert!(h.chain.sent().is_empty());
		assert_eq!(h.chain.native_balance(RELAYER), units(1));
	}

	#[tokio::test]
	async fn test_funding_amount_ignores_token_amount() {
		let h = Harness::new(1);
		let other = address!("3333333333333333333333333333333333333333");
		h.chain.set_token_balance(USER, units(1_000_000));
		h.chain.set_token_balance(other, units(1_000_000));

		h.station
			.process_gasless_transfer(&request(units(1)))
			.await
			.unwrap();
		let mut big = request(units(900_000));
		big.from_address = other;
		h.station.process_gasless_transfer(&big).await.unwrap();

		let amounts: Vec<U256> = h.chain.sent().iter().map(|tx| tx.value).collect();
		assert_eq!(amounts, vec![U256::from(FUNDING), U256::from(FUNDING)]);
		assert_eq!(h.station.funding_amount(), U256::from(FUNDING));
	}

	#[tokio::test]
	async fn test_flow_resumes_after_funding_and_approval() {
		let h = Harness::new(1);
		h.user(units(500), U256::ZERO, U256::ZERO);
		let req = request(units(100));

		let first = h.station.process_gasless_transfer(&req).await.unwrap();
		assert_eq!(first.code(), "NEEDS_GAS_FUNDING");

		let second = h.station.process_gasless_transfer(&req).await.unwrap();
		assert_eq!(second.code(), "NEEDS_APPROVAL");

		h.chain.set_allowance(USER, RELAYER, units(100));
		let third = h.station.process_gasless_transfer(&req).await.unwrap();
		assert!(third.is_terminal_success());
		assert_eq!(h.chain.sent().len(), 2);
	}

	#[tokio::test]
	async fn test_underfunded_relayer_refuses_funding() {
		let h = Harness::new(1);
		h.user(units(500), U256::ZERO, U256::ZERO);
		h.chain.set_native_balance(RELAYER, U256::from(1_000u64));
		let mut events = h.station.events().subscribe();

		let result = h
			.station
			.process_gasless_transfer(&request(units(100)))
			.await
			.unwrap();

		assert_eq!(cause(&result), FailureCause::RelayerUnderfunded);
		assert!(matches!(
			result,
			FlowResult::Failed {
				error_kind: ErrorKind::Fatal,
				..
			}
		));
		assert!(h.chain.sent().is_empty());
		assert!(matches!(
			drain(&mut events).as_slice(),
			[GasStationEvent::FlowFailed {
				cause: FailureCause::RelayerUnderfunded,
				..
			}]
		));
	}

	#[tokio::test]
	async fn test_each_failing_endpoint_is_tried_once() {
		let h = Harness::with(4, 4, true);
		h.user(units(500), units(1000), U256::ZERO);
		for endpoint in &h.endpoints[..3] {
			endpoint.fail_all(|| ChainError::Connection("connection refused".into()));
		}

		let result = h
			.station
			.execute_transfer_after_approval(&request(units(100)))
			.await
			.unwrap();

		assert!(result.is_terminal_success());
		for endpoint in &h.endpoints[..3] {
			assert_eq!(endpoint.call_count(), 1);
		}
		assert_eq!(h.chain.sent().len(), 1);
	}

	#[tokio::test]
	async fn test_after_approval_never_funds() {
		let h = Harness::new(1);
		h.user(units(500), U256::ZERO, U256::ZERO);

		let result = h
			.station
			.execute_transfer_after_approval(&request(units(100)))
			.await
			.unwrap();

		assert_eq!(result.code(), "NEEDS_APPROVAL");
		assert!(h.chain.sent().is_empty());
		let simulations = h.endpoints[0]
			.calls()
			.into_iter()
			.filter(|c| matches!(c, MockCall::SimulateTransferFrom { .. }))
			.count();
		assert_eq!(simulations, 0);
	}

	#[tokio::test]
	async fn test_assumed_preflight_is_rechecked_before_writing() {
		let h = Harness::new(1);
		h.user(units(50), units(1000), U256::ZERO);
		h.endpoints[0].delay(Duration::from_millis(50));
		let station = GasStation::builder(GasStationConfig::default())
			.with_chain_client(h.station.chain().clone())
			.with_preflight_timeout(Duration::from_millis(5))
			.build()
			.unwrap();

		let report = station.preflight(&request(units(100))).await.unwrap();
		assert!(matches!(report.readiness, Readiness::Assumed(_)));

		let result = station
			.process_gasless_transfer(&request(units(100)))
			.await
			.unwrap();
		assert_eq!(cause(&result), FailureCause::InsufficientBalance);
		assert!(h.chain.sent().is_empty());
	}

	#[tokio::test]
	async fn test_unknown_preflight_stops_the_flow() {
		let h = Harness::with(1, 2, false);
		h.user(units(500), units(1000), U256::ZERO);
		h.endpoints[0].fail_all(|| ChainError::Timeout(Duration::from_secs(8)));

		let result = h
			.station
			.process_gasless_transfer(&request(units(100)))
			.await
			.unwrap();

		assert_eq!(cause(&result), FailureCause::EndpointsExhausted);
		assert!(h.chain.sent().is_empty());
	}

	#[tokio::test]
	async fn test_malformed_preflight_is_rejected_not_retryable() {
		let h = Harness::new(1);
		h.user(units(500), units(1000), U256::ZERO);
		h.endpoints[0].fail_all(|| ChainError::Malformed("balanceOf returned 0x".into()));

		let result = h
			.station
			.process_gasless_transfer(&request(units(100)))
			.await
			.unwrap();

		assert_eq!(cause(&result), FailureCause::Rejected);
		assert!(matches!(
			result,
			FlowResult::Failed {
				error_kind: ErrorKind::Fatal,
				..
			}
		));
		assert!(h.chain.sent().is_empty());
	}

	#[tokio::test]
	async fn test_exhausted_endpoints_surface_as_fatal() {
		let h = Harness::with(2, 2, true);
		h.user(units(500), units(1000), U256::ZERO);
		for endpoint in &h.endpoints {
			endpoint.fail_all(|| ChainError::Http {
				status: 503,
				body: "unavailable".into(),
			});
		}

		let result = h
			.station
			.process_gasless_transfer(&request(units(100)))
			.await
			.unwrap();

		assert_eq!(cause(&result), FailureCause::EndpointsExhausted);
		assert!(matches!(
			result,
			FlowResult::Failed {
				error_kind: ErrorKind::Fatal,
				..
			}
		));
	}

	#[tokio::test]
	async fn test_unconfirmed_transfer_requires_reconciliation() {
		let h = Harness::with(2, 2, true);
		h.user(units(500), units(1000), U256::ZERO);
		for endpoint in &h.endpoints {
			endpoint.fail_sends(|| ChainError::Timeout(Duration::from_secs(30)));
		}
		let mut events = h.station.events().subscribe();

		let result = h
			.station
			.process_gasless_transfer(&request(units(100)))
			.await
			.unwrap();

		assert_eq!(cause(&result), FailureCause::ReconciliationRequired);
		let events = drain(&mut events);
		assert!(matches!(
			events.as_slice(),
			[
				GasStationEvent::ReconciliationRequired { .. },
				GasStationEvent::FlowFailed {
					cause: FailureCause::ReconciliationRequired,
					..
				}
			]
		));
	}

	#[tokio::test]
	async fn test_empty_transaction_hash_is_fatal() {
		let h = Harness::new(1);
		h.user(units(500), units(1000), U256::ZERO);
		h.endpoints[0].return_hash(B256::ZERO);

		let result = h
			.station
			.process_gasless_transfer(&request(units(100)))
			.await
			.unwrap();

		assert_eq!(cause(&result), FailureCause::MalformedTransactionHash);
	}

	#[tokio::test]
	async fn test_invalid_requests_are_rejected_before_chain_access() {
		let h = Harness::new(1);

		let mut wrong_chain = request(units(1));
		wrong_chain.chain_id = 1;
		let zero = request(U256::ZERO);
		let mut self_transfer = request(units(1));
		self_transfer.to_address = USER;
		let mut from_relayer = request(units(1));
		from_relayer.from_address = RELAYER;

		for req in [wrong_chain, zero, self_transfer, from_relayer] {
			assert!(matches!(
				h.station.process_gasless_transfer(&req).await,
				Err(GasStationError::InvalidRequest(_))
			));
		}
		assert_eq!(h.endpoints[0].call_count(), 0);
	}

	#[tokio::test]
	async fn test_status_reports_readiness() {
		let h = Harness::new(2);
		let status = h.station.status().await;
		assert!(status.is_ready);
		assert_eq!(status.address, RELAYER);
		assert_eq!(status.native_balance, units(1));
		assert_eq!(status.active_endpoint, "https://rpc0.example.com");
		assert!(status.error.is_none());

		h.chain.set_native_balance(RELAYER, U256::from(1_000u64));
		let status = h.station.status().await;
		assert!(!status.is_ready);
		assert!(status.error.is_some());
	}

	#[test]
	fn test_builder_rejects_mismatched_chain() {
		let h = Harness::new(1);
		let config = GasStationConfig {
			chain_id: 97,
			..Default::default()
		};
		assert!(matches!(
			GasStation::builder(config)
				.with_chain_client(h.station.chain().clone())
				.build(),
			Err(GasStationError::Config(_))
		));
	}
}
