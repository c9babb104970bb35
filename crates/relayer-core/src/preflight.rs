//! Quick balance and allowance check before a flow commits to any write.

use alloy::primitives::{Address, U256};
use relayer_chain::{classify, ChainClient, ChainError};
use relayer_types::BalanceSnapshot;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How much the preflight answer can be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "readiness", content = "detail", rename_all = "snake_case")]
pub enum Readiness {
	/// Both values were read from the chain.
	Confirmed(BalanceSnapshot),
	/// The reads did not finish in time and readiness was assumed.
	Assumed(String),
	/// The reads failed transiently and nothing is known.
	Unknown(String),
	/// A read failed with an error retrying cannot fix, e.g. a malformed
	/// response from the token contract.
	Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreflightReport {
	pub has_balance: bool,
	pub has_allowance: bool,
	pub readiness: Readiness,
}

impl PreflightReport {
	fn confirmed(snapshot: BalanceSnapshot, required: U256) -> Self {
		Self {
			has_balance: snapshot.covers_balance(required),
			has_allowance: snapshot.covers_allowance(required),
			readiness: Readiness::Confirmed(snapshot),
		}
	}

	fn assumed(reason: String) -> Self {
		Self {
			has_balance: true,
			has_allowance: true,
			readiness: Readiness::Assumed(reason),
		}
	}

	fn unknown(reason: String) -> Self {
		Self {
			has_balance: false,
			has_allowance: false,
			readiness: Readiness::Unknown(reason),
		}
	}

	fn failed(reason: String) -> Self {
		Self {
			has_balance: false,
			has_allowance: false,
			readiness: Readiness::Failed(reason),
		}
	}
}

/// Reads a counterparty's token balance and allowance under a short deadline.
///
/// When the deadline passes or the endpoints only fail transiently, the
/// validator either assumes the counterparty is ready or reports
/// [`Readiness::Unknown`], depending on `assume_ready_on_timeout`. An assumed
/// answer is never acted on directly: the transfer path re-reads both values
/// before writing.
pub struct PreflightValidator {
	chain: Arc<ChainClient>,
	timeout: Duration,
	assume_ready_on_timeout: bool,
}

impl PreflightValidator {
	pub fn new(chain: Arc<ChainClient>, timeout: Duration, assume_ready_on_timeout: bool) -> Self {
		Self {
			chain,
			timeout,
			assume_ready_on_timeout,
		}
	}

	/// Never fails; read problems are folded into the report's readiness.
	pub async fn validate(
		&self,
		token: Address,
		owner: Address,
		spender: Address,
		required: U256,
	) -> PreflightReport {
		let reads = async {
			tokio::try_join!(
				self.chain.read_balance(token, owner),
				self.chain.read_allowance(token, owner, spender),
			)
		};

		match tokio::time::timeout(self.timeout, reads).await {
			Ok(Ok((balance, allowance))) => {
				let snapshot = BalanceSnapshot {
					owner,
					balance,
					allowance,
				};
				debug!(
					%owner,
					%balance,
					%allowance,
					%required,
					"Preflight read balance and allowance"
				);
				PreflightReport::confirmed(snapshot, required)
			}
			Ok(Err(e)) if classify(&e).is_retryable() => self.fallback(e.to_string()),
			Ok(Err(e)) => {
				warn!(%owner, "Preflight read failed: {}", e);
				PreflightReport::failed(describe(&e))
			}
			Err(_) => self.fallback(format!("reads did not finish within {:?}", self.timeout)),
		}
	}

	fn fallback(&self, reason: String) -> PreflightReport {
		if self.assume_ready_on_timeout {
			warn!("Preflight inconclusive, assuming counterparty is ready: {}", reason);
			PreflightReport::assumed(reason)
		} else {
			warn!("Preflight inconclusive: {}", reason);
			PreflightReport::unknown(reason)
		}
	}
}

fn describe(error: &ChainError) -> String {
	format!("{} ({})", error, classify(error))
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::address;
	use relayer_account::{implementations::local::LocalWallet, AccountService};
	use relayer_chain::mock::{MockChain, MockEndpoint};
	use relayer_chain::{ChainInterface, RetryController, RetryPolicy};

	const RELAYER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
	const TOKEN: Address = address!("55d398326f99059fF775485246999027B3197955");
	const USER: Address = address!("1111111111111111111111111111111111111111");

	fn validator(
		timeout: Duration,
		assume_ready: bool,
	) -> (MockChain, Arc<MockEndpoint>, PreflightValidator) {
		let chain = MockChain::new(TOKEN, RELAYER, 56);
		let endpoint = chain.endpoint("https://rpc.example.com");
		let wallet = LocalWallet::new(
			"0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
		)
		.unwrap();
		let client = ChainClient::new(
			Arc::new(AccountService::new(Box::new(wallet))),
			56,
			vec![endpoint.clone() as Arc<dyn ChainInterface>],
		)
		.unwrap()
		.with_retry(RetryController::new(
			RetryPolicy::default().with_delays(Duration::from_millis(1), Duration::from_millis(1)),
		));
		(
			chain,
			endpoint,
			PreflightValidator::new(Arc::new(client), timeout, assume_ready),
		)
	}

	#[tokio::test]
	async fn test_confirmed_report_compares_against_required() {
		let (chain, _endpoint, validator) = validator(Duration::from_secs(3), true);
		chain.set_token_balance(USER, U256::from(500u64));
		chain.set_allowance(USER, RELAYER, U256::from(50u64));

		let report = validator
			.validate(TOKEN, USER, RELAYER, U256::from(100u64))
			.await;

		assert!(report.has_balance);
		assert!(!report.has_allowance);
		assert_eq!(
			report.readiness,
			Readiness::Confirmed(BalanceSnapshot {
				owner: USER,
				balance: U256::from(500u64),
				allowance: U256::from(50u64),
			})
		);
	}

	#[tokio::test]
	async fn test_timeout_assumes_ready_when_enabled() {
		let (_chain, endpoint, validator) = validator(Duration::from_millis(10), true);
		endpoint.delay(Duration::from_millis(200));

		let report = validator
			.validate(TOKEN, USER, RELAYER, U256::from(100u64))
			.await;

		assert!(report.has_balance && report.has_allowance);
		assert!(matches!(report.readiness, Readiness::Assumed(_)));
	}

	#[tokio::test]
	async fn test_timeout_is_unknown_when_disabled() {
		let (_chain, endpoint, validator) = validator(Duration::from_millis(10), false);
		endpoint.delay(Duration::from_millis(200));

		let report = validator
			.validate(TOKEN, USER, RELAYER, U256::from(100u64))
			.await;

		assert!(!report.has_balance && !report.has_allowance);
		assert!(matches!(report.readiness, Readiness::Unknown(_)));
	}

	#[tokio::test]
	async fn test_transient_failures_follow_the_policy_flag() {
		let (_chain, endpoint, validator) = validator(Duration::from_secs(3), true);
		endpoint.fail_all(|| ChainError::Http {
			status: 503,
			body: "unavailable".into(),
		});

		let report = validator
			.validate(TOKEN, USER, RELAYER, U256::from(100u64))
			.await;
		assert!(matches!(report.readiness, Readiness::Assumed(_)));
	}

	#[tokio::test]
	async fn test_non_transient_failures_are_never_assumed() {
		let (_chain, endpoint, validator) = validator(Duration::from_secs(3), true);
		endpoint.fail_all(|| ChainError::Malformed("balanceOf returned 0x".into()));

		let report = validator
			.validate(TOKEN, USER, RELAYER, U256::from(100u64))
			.await;

		assert!(!report.has_balance && !report.has_allowance);
		assert!(matches!(report.readiness, Readiness::Failed(_)));
	}
}
