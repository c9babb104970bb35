//! The gasless transfer state machine.
//!
//! ```text
//! Start -> CheckBalance -> CheckAllowance -> ReadyToTransfer -> Executing -> Completed
//!                               |                  |
//!                               +--> AllowanceMissing <--+
//!                                        |
//!                                        +--> NeedsApproval
//!                                        +--> NeedsFunding -> NeedsGasFunding
//! ```
//!
//! Every step re-reads chain state, so invoking a flow again after funding or
//! approval simply resumes from wherever the chain now is.

use crate::preflight::{PreflightReport, Readiness};
use crate::GasStation;
use alloy::primitives::B256;
use relayer_chain::{classify, ChainError};
use relayer_types::{
	truncate_hash, ErrorKind, FailureCause, FlowResult, GasStationEvent, TransferRequest,
	TxHash,
};
use tracing::{debug, error, info, warn};

/// One state of a flow. Terminal results are carried by [`FlowStep::Done`].
#[derive(Debug)]
pub(crate) enum FlowStep {
	Start,
	CheckBalance(PreflightReport),
	CheckAllowance(PreflightReport),
	/// Allowance is short; decide between asking for approval and funding it.
	AllowanceMissing,
	NeedsFunding,
	ReadyToTransfer,
	Executing,
	Done(FlowResult),
}

impl FlowStep {
	fn name(&self) -> &'static str {
		match self {
			FlowStep::Start => "start",
			FlowStep::CheckBalance(_) => "check_balance",
			FlowStep::CheckAllowance(_) => "check_allowance",
			FlowStep::AllowanceMissing => "allowance_missing",
			FlowStep::NeedsFunding => "needs_funding",
			FlowStep::ReadyToTransfer => "ready_to_transfer",
			FlowStep::Executing => "executing",
			FlowStep::Done(_) => "done",
		}
	}
}

/// A single run of the state machine for one request.
pub(crate) struct Flow<'a> {
	station: &'a GasStation,
	request: &'a TransferRequest,
	request_id: B256,
	/// When false, a short allowance ends the flow with `NeedsApproval`
	/// instead of considering a funding payment.
	may_fund: bool,
}

impl<'a> Flow<'a> {
	pub(crate) fn new(station: &'a GasStation, request: &'a TransferRequest, may_fund: bool) -> Self {
		Self {
			station,
			request,
			request_id: request.request_id(),
			may_fund,
		}
	}

	pub(crate) async fn run(self, mut step: FlowStep) -> FlowResult {
		loop {
			debug!(
				request_id = %truncate_hash(&self.request_id),
				step = step.name(),
				"Advancing gasless flow"
			);

			step = match step {
				FlowStep::Start => self.start().await,
				FlowStep::CheckBalance(report) => self.check_balance(report),
				FlowStep::CheckAllowance(report) => self.check_allowance(report),
				FlowStep::AllowanceMissing => self.allowance_missing().await,
				FlowStep::NeedsFunding => self.fund().await,
				FlowStep::ReadyToTransfer => self.prepare_transfer().await,
				FlowStep::Executing => self.execute().await,
				FlowStep::Done(result) => return self.finish(result),
			};
		}
	}

	async fn start(&self) -> FlowStep {
		let report = self
			.station
			.preflight
			.validate(
				self.station.config.token_address,
				self.request.from_address,
				self.station.chain.relayer_address(),
				self.request.token_amount,
			)
			.await;

		let stop = match &report.readiness {
			Readiness::Unknown(reason) => Some(FlowResult::failed(
				FailureCause::EndpointsExhausted,
				format!(
					"Could not verify the wallet's token balance and allowance ({}). Please try again shortly.",
					reason
				),
			)),
			Readiness::Failed(reason) => {
				error!(
					request_id = %truncate_hash(&self.request_id),
					"Preflight failed: {}", reason
				);
				Some(FlowResult::failed(
					FailureCause::Rejected,
					format!("Could not read the wallet's token balance and allowance: {}", reason),
				))
			}
			Readiness::Confirmed(_) | Readiness::Assumed(_) => None,
		};

		match stop {
			Some(result) => FlowStep::Done(result),
			None => FlowStep::CheckBalance(report),
		}
	}

	fn check_balance(&self, report: PreflightReport) -> FlowStep {
		if !report.has_balance {
			return FlowStep::Done(self.insufficient_balance());
		}
		FlowStep::CheckAllowance(report)
	}

	fn check_allowance(&self, report: PreflightReport) -> FlowStep {
		if report.has_allowance {
			FlowStep::ReadyToTransfer
		} else {
			FlowStep::AllowanceMissing
		}
	}

	async fn allowance_missing(&self) -> FlowStep {
		if !self.may_fund {
			return FlowStep::Done(self.needs_approval());
		}

		let threshold = self.station.funding_amount();
		match self
			.station
			.chain
			.read_native_balance(self.request.from_address)
			.await
		{
			Ok(native) if native >= threshold => {
				debug!(
					owner = %self.request.from_address,
					%native,
					%threshold,
					"Counterparty can pay for approval"
				);
				FlowStep::Done(self.needs_approval())
			}
			Ok(_) => FlowStep::NeedsFunding,
			Err(e) => FlowStep::Done(self.failure(e)),
		}
	}

	async fn fund(&self) -> FlowStep {
		let amount = self.station.funding_amount();
		let write_cost = amount + self.station.chain.fees().funding_cost();
		if let Err(e) = self.station.relayer.ensure_operational(write_cost).await {
			return FlowStep::Done(self.failure(e));
		}

		let recipient = self.request.from_address;
		match self.station.chain.send_value_transfer(recipient, amount).await {
			Ok(tx_hash) if tx_hash.is_zero() => FlowStep::Done(self.malformed_hash("funding")),
			Ok(tx_hash) => {
				info!(
					request_id = %truncate_hash(&self.request_id),
					%recipient,
					%amount,
					tx_hash = %truncate_hash(&tx_hash),
					"Funded counterparty gas for approval"
				);
				self.publish(GasStationEvent::GasFunded {
					request_id: self.request_id,
					recipient,
					amount,
					tx_hash,
				});
				FlowStep::Done(FlowResult::NeedsGasFunding {
					funding_tx_hash: tx_hash,
				})
			}
			Err(e) => FlowStep::Done(self.failure(e)),
		}
	}

	/// Gates on the relayer reserve, then re-reads both values strictly.
	async fn prepare_transfer(&self) -> FlowStep {
		let write_cost = self.station.chain.fees().transfer_cost();
		if let Err(e) = self.station.relayer.ensure_operational(write_cost).await {
			return FlowStep::Done(self.failure(e));
		}

		let token = self.station.config.token_address;
		let owner = self.request.from_address;
		let reads = tokio::try_join!(
			self.station.chain.read_balance(token, owner),
			self.station
				.chain
				.read_allowance(token, owner, self.station.chain.relayer_address()),
		);

		match reads {
			Ok((balance, _)) if balance < self.request.token_amount => {
				FlowStep::Done(self.insufficient_balance())
			}
			Ok((_, allowance)) if allowance < self.request.token_amount => {
				FlowStep::AllowanceMissing
			}
			Ok(_) => FlowStep::Executing,
			Err(e) => FlowStep::Done(self.failure(e)),
		}
	}

	async fn execute(&self) -> FlowStep {
		let result = self
			.station
			.chain
			.send_token_transfer_from(
				self.station.config.token_address,
				self.request.from_address,
				self.request.to_address,
				self.request.token_amount,
			)
			.await;

		match result {
			Ok(tx_hash) if tx_hash.is_zero() => FlowStep::Done(self.malformed_hash("transfer")),
			Ok(tx_hash) => {
				info!(
					request_id = %truncate_hash(&self.request_id),
					tx_hash = %truncate_hash(&tx_hash),
					"Gasless transfer submitted"
				);
				self.publish(GasStationEvent::TransferSubmitted {
					request_id: self.request_id,
					tx_hash,
				});
				FlowStep::Done(FlowResult::TransferCompleted { tx_hash })
			}
			Err(e) => FlowStep::Done(self.failure(e)),
		}
	}

	fn finish(&self, result: FlowResult) -> FlowResult {
		if let FlowResult::Failed { cause, message, .. } = &result {
			self.publish(GasStationEvent::FlowFailed {
				request_id: self.request_id,
				cause: *cause,
				message: message.clone(),
			});
		}
		result
	}

	fn insufficient_balance(&self) -> FlowResult {
		FlowResult::failed(
			FailureCause::InsufficientBalance,
			format!(
				"Wallet {} does not hold the {} token units this order needs. Top up the balance and try again.",
				self.request.from_address, self.request.token_amount
			),
		)
	}

	fn needs_approval(&self) -> FlowResult {
		FlowResult::NeedsApproval {
			reason: format!(
				"Approve the gas station ({}) to spend at least {} token units from your wallet, then retry.",
				self.station.chain.relayer_address(),
				self.request.token_amount
			),
		}
	}

	fn malformed_hash(&self, label: &str) -> FlowResult {
		error!(
			request_id = %truncate_hash(&self.request_id),
			"Node returned an empty hash for the {} transaction", label
		);
		FlowResult::failed(
			FailureCause::MalformedTransactionHash,
			format!("The node returned an empty transaction hash for the {} transaction.", label),
		)
	}

	/// Turns a chain failure into the flow's terminal result.
	fn failure(&self, error: ChainError) -> FlowResult {
		let request_id = truncate_hash(&self.request_id);

		match error {
			ChainError::Unconfirmed { tx_hash, detail } => {
				error!(
					%request_id,
					tx_hash = %tx_hash,
					"Write may have reached the chain, manual reconciliation required: {}", detail
				);
				self.publish(GasStationEvent::ReconciliationRequired {
					request_id: self.request_id,
					tx_hash,
					detail: detail.clone(),
				});
				FlowResult::failed(
					FailureCause::ReconciliationRequired,
					reconciliation_message(&tx_hash),
				)
			}
			ChainError::RelayerUnderfunded {
				required,
				available,
			} => {
				error!(
					%request_id,
					%required,
					%available,
					"Relayer underfunded"
				);
				FlowResult::failed(
					FailureCause::RelayerUnderfunded,
					"The gas station is temporarily out of funds. Please try again later.",
				)
			}
			e => match classify(&e) {
				ErrorKind::TransientNetwork => {
					error!(%request_id, "Endpoints exhausted: {}", e);
					FlowResult::failed(
						FailureCause::EndpointsExhausted,
						"The network is not responding right now. Please try again shortly.",
					)
				}
				ErrorKind::InsufficientAllowance => {
					warn!(%request_id, "Transfer rejected for allowance: {}", e);
					FlowResult::failed(
						FailureCause::InsufficientAllowance,
						format!(
							"The token rejected the transfer because the allowance to {} is too low. Approve the gas station and retry.",
							self.station.chain.relayer_address()
						),
					)
				}
				ErrorKind::InsufficientFunds => {
					warn!(%request_id, "Transfer rejected for balance: {}", e);
					self.insufficient_balance()
				}
				ErrorKind::Fatal => {
					error!(%request_id, from = %self.request.from_address, "Gasless flow failed: {}", e);
					FlowResult::failed(FailureCause::Rejected, e.to_string())
				}
			},
		}
	}

	fn publish(&self, event: GasStationEvent) {
		self.station.events.publish(event).ok();
	}
}

fn reconciliation_message(tx_hash: &TxHash) -> String {
	format!(
		"Transaction {} may have been submitted but could not be confirmed. It will be checked manually; do not retry this order.",
		tx_hash
	)
}

