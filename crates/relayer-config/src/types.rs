//! Typed configuration sections.

use crate::serde_helpers::{deserialize_wei_amount, serialize_wei_amount};
use alloy::primitives::{Address, U256};
use relayer_types::{Endpoint, EndpointKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Top-level gas station configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	#[serde(default)]
	pub service: ServiceConfig,
	pub relayer: RelayerConfig,
	pub endpoints: Vec<EndpointConfig>,
	#[serde(default)]
	pub fees: FeeConfig,
	#[serde(default)]
	pub retry: RetryConfig,
	#[serde(default)]
	pub timeouts: TimeoutConfig,
	#[serde(default)]
	pub preflight: PreflightConfig,
}

impl Config {
	/// Resolves the configured endpoints, applying timeout overrides.
	pub fn endpoints(&self) -> Vec<Endpoint> {
		self.endpoints
			.iter()
			.map(|e| e.resolve(&self.timeouts))
			.collect()
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	#[serde(default = "default_service_name")]
	pub name: String,
	#[serde(default = "default_http_port")]
	pub http_port: u16,
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			name: default_service_name(),
			http_port: default_http_port(),
			log_level: default_log_level(),
		}
	}
}

/// The relayer's signing identity and the token it moves.
#[derive(Clone, Deserialize, Serialize)]
pub struct RelayerConfig {
	pub private_key: String,
	pub chain_id: u64,
	pub token_address: Address,
	#[serde(default = "default_token_decimals")]
	pub token_decimals: u8,
}

impl fmt::Debug for RelayerConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RelayerConfig")
			.field("private_key", &"<redacted>")
			.field("chain_id", &self.chain_id)
			.field("token_address", &self.token_address)
			.field("token_decimals", &self.token_decimals)
			.finish()
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
	pub url: String,
	#[serde(default = "default_endpoint_kind")]
	pub kind: EndpointKind,
	pub read_timeout_ms: Option<u64>,
	pub write_timeout_ms: Option<u64>,
}

impl EndpointConfig {
	/// Per-endpoint override, then the global override, then the kind default.
	fn resolve(&self, timeouts: &TimeoutConfig) -> Endpoint {
		let mut endpoint = Endpoint::new(self.url.clone(), self.kind);
		if let Some(ms) = self.read_timeout_ms.or(timeouts.read_ms) {
			endpoint = endpoint.with_read_timeout(Duration::from_millis(ms));
		}
		if let Some(ms) = self.write_timeout_ms.or(timeouts.write_ms) {
			endpoint = endpoint.with_write_timeout(Duration::from_millis(ms));
		}
		endpoint
	}
}

/// Fixed fee policy applied to every write.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeeConfig {
	#[serde(default = "default_gas_price_wei")]
	pub gas_price_wei: u64,
	#[serde(default = "default_transfer_gas_limit")]
	pub transfer_gas_limit: u64,
	#[serde(default = "default_funding_gas_limit")]
	pub funding_gas_limit: u64,
	/// Gas the counterparty's own `approve` is expected to use.
	#[serde(default = "default_approval_gas_limit")]
	pub approval_gas_limit: u64,
	/// Added to the approval cost when funding a counterparty.
	#[serde(
		rename = "approval_safety_margin_wei",
		default = "default_approval_safety_margin",
		deserialize_with = "deserialize_wei_amount",
		serialize_with = "serialize_wei_amount"
	)]
	pub approval_safety_margin: U256,
	#[serde(
		rename = "minimum_reserve_wei",
		default = "default_minimum_reserve",
		deserialize_with = "deserialize_wei_amount",
		serialize_with = "serialize_wei_amount"
	)]
	pub minimum_reserve: U256,
}

impl Default for FeeConfig {
	fn default() -> Self {
		Self {
			gas_price_wei: default_gas_price_wei(),
			transfer_gas_limit: default_transfer_gas_limit(),
			funding_gas_limit: default_funding_gas_limit(),
			approval_gas_limit: default_approval_gas_limit(),
			approval_safety_margin: default_approval_safety_margin(),
			minimum_reserve: default_minimum_reserve(),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	#[serde(default = "default_initial_delay_ms")]
	pub initial_delay_ms: u64,
	#[serde(default = "default_max_delay_ms")]
	pub max_delay_ms: u64,
	#[serde(default = "default_multiplier")]
	pub multiplier: f64,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: default_max_attempts(),
			initial_delay_ms: default_initial_delay_ms(),
			max_delay_ms: default_max_delay_ms(),
			multiplier: default_multiplier(),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
	pub read_ms: Option<u64>,
	pub write_ms: Option<u64>,
	#[serde(default = "default_preflight_ms")]
	pub preflight_ms: u64,
	/// How often the service points the pool back at the primary endpoint.
	#[serde(default = "default_endpoint_reset_secs")]
	pub endpoint_reset_secs: u64,
}

impl Default for TimeoutConfig {
	fn default() -> Self {
		Self {
			read_ms: None,
			write_ms: None,
			preflight_ms: default_preflight_ms(),
			endpoint_reset_secs: default_endpoint_reset_secs(),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreflightConfig {
	/// Treat a timed-out preflight as ready instead of unknown.
	#[serde(default = "default_assume_ready")]
	pub assume_ready_on_timeout: bool,
}

impl Default for PreflightConfig {
	fn default() -> Self {
		Self {
			assume_ready_on_timeout: default_assume_ready(),
		}
	}
}

fn default_service_name() -> String {
	"gas-station".to_string()
}

fn default_http_port() -> u16 {
	8080
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_token_decimals() -> u8 {
	18
}

fn default_endpoint_kind() -> EndpointKind {
	EndpointKind::Fallback
}

fn default_gas_price_wei() -> u64 {
	1_000_000_000
}

fn default_transfer_gas_limit() -> u64 {
	200_000
}

fn default_funding_gas_limit() -> u64 {
	21_000
}

fn default_approval_gas_limit() -> u64 {
	60_000
}

fn default_approval_safety_margin() -> U256 {
	U256::from(20_000_000_000_000u64)
}

fn default_minimum_reserve() -> U256 {
	U256::from(50_000_000_000_000u64)
}

fn default_max_attempts() -> u32 {
	3
}

fn default_initial_delay_ms() -> u64 {
	2_000
}

fn default_max_delay_ms() -> u64 {
	8_000
}

fn default_multiplier() -> f64 {
	1.5
}

fn default_preflight_ms() -> u64 {
	3_000
}

fn default_endpoint_reset_secs() -> u64 {
	300
}

fn default_assume_ready() -> bool {
	true
}
