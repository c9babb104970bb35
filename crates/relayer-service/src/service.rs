//! Wiring of the gas station from configuration, plus its background tasks.

use anyhow::{Context, Result};
use relayer_account::{implementations::local::create_account, AccountService};
use relayer_chain::implementations::evm::alloy::create_backends;
use relayer_chain::{ChainClient, FeePolicy, RetryController, RetryPolicy};
use relayer_config::Config;
use relayer_core::{EventBus, GasStation, GasStationConfig};
use relayer_types::{truncate_hash, GasStationEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Builds the relayer's chain client: signer, one backend per endpoint, and
/// the retry, fee and reserve policies from configuration.
pub fn build_chain_client(config: &Config) -> Result<ChainClient> {
	let mut relayer = toml::map::Map::new();
	relayer.insert(
		"private_key".to_string(),
		toml::Value::String(config.relayer.private_key.clone()),
	);
	let account = create_account(&toml::Value::Table(relayer))
		.context("Failed to create relayer account")?;
	let account = Arc::new(AccountService::new(account));

	let backends = create_backends(&config.endpoints()).context("Failed to create RPC backends")?;

	let retry = RetryController::new(RetryPolicy {
		max_attempts: config.retry.max_attempts,
		initial_delay: Duration::from_millis(config.retry.initial_delay_ms),
		max_delay: Duration::from_millis(config.retry.max_delay_ms),
		multiplier: config.retry.multiplier,
	});
	let fees = FeePolicy {
		gas_price_wei: u128::from(config.fees.gas_price_wei),
		transfer_gas_limit: config.fees.transfer_gas_limit,
		funding_gas_limit: config.fees.funding_gas_limit,
	};

	let client = ChainClient::new(account, config.relayer.chain_id, backends)
		.context("Failed to create chain client")?
		.with_retry(retry)
		.with_fees(fees)
		.with_minimum_reserve(config.fees.minimum_reserve);

	info!(
		relayer = %client.relayer_address(),
		chain_id = config.relayer.chain_id,
		endpoints = client.pool().len(),
		"Chain client configured"
	);
	Ok(client)
}

pub fn build_gas_station(
	config: &Config,
	chain: Arc<ChainClient>,
	events: EventBus,
) -> Result<GasStation> {
	GasStation::builder(GasStationConfig::from(config))
		.with_chain_client(chain)
		.with_event_bus(events)
		.build()
		.context("Failed to build gas station")
}

/// Logs every event published by the gas station until the bus closes.
pub fn spawn_event_logger(events: &EventBus) -> JoinHandle<()> {
	let mut receiver = events.subscribe();
	tokio::spawn(async move {
		loop {
			match receiver.recv().await {
				Ok(event) => log_event(&event),
				Err(RecvError::Lagged(skipped)) => {
					warn!("Event logger lagged, {} events skipped", skipped)
				}
				Err(RecvError::Closed) => break,
			}
		}
	})
}

fn log_event(event: &GasStationEvent) {
	match event {
		GasStationEvent::GasFunded {
			request_id,
			recipient,
			amount,
			tx_hash,
		} => info!(
			request_id = %truncate_hash(request_id),
			%recipient,
			%amount,
			tx_hash = %tx_hash,
			"Gas funded"
		),
		GasStationEvent::TransferSubmitted {
			request_id,
			tx_hash,
		} => info!(
			request_id = %truncate_hash(request_id),
			tx_hash = %tx_hash,
			"Transfer submitted"
		),
		GasStationEvent::ReconciliationRequired {
			request_id,
			tx_hash,
			detail,
		} => error!(
			request_id = %truncate_hash(request_id),
			tx_hash = %tx_hash,
			"RECONCILIATION REQUIRED: {}", detail
		),
		GasStationEvent::FlowFailed {
			request_id,
			cause,
			message,
		} => warn!(
			request_id = %truncate_hash(request_id),
			cause = cause.code(),
			"Flow failed: {}", message
		),
	}
}

/// Periodically points the endpoint pool back at the primary endpoint.
pub fn spawn_endpoint_reset(chain: Arc<ChainClient>, every: Duration) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut interval = tokio::time::interval(every);
		// The first tick completes immediately.
		interval.tick().await;
		loop {
			interval.tick().await;
			if chain.pool().current_index() != 0 {
				debug!("Resetting endpoint pool to primary");
			}
			chain.reset_endpoints();
		}
	})
}
