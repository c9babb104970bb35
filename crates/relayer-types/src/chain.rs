//! Chain-facing data: upstream endpoints and point-in-time token snapshots.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transaction identifier returned by a node on submission.
pub type TxHash = B256;

/// Whether an endpoint is the preferred provider or a public fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
	Primary,
	Fallback,
}

impl EndpointKind {
	/// Default read timeout for this kind of endpoint.
	///
	/// Primary providers are given more room; public fallbacks are expected to
	/// either answer quickly or be skipped.
	pub fn default_read_timeout(self) -> Duration {
		match self {
			EndpointKind::Primary => Duration::from_secs(8),
			EndpointKind::Fallback => Duration::from_secs(5),
		}
	}

	pub fn default_write_timeout(self) -> Duration {
		match self {
			EndpointKind::Primary => Duration::from_secs(30),
			EndpointKind::Fallback => Duration::from_secs(15),
		}
	}
}

/// Last observed health of an endpoint. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointHealth {
	#[default]
	Unknown,
	Healthy,
	Failing,
}

/// One upstream JSON-RPC node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
	pub url: String,
	pub kind: EndpointKind,
	pub read_timeout: Duration,
	pub write_timeout: Duration,
}

impl Endpoint {
	/// Creates an endpoint with the default timeouts for its kind.
	pub fn new(url: impl Into<String>, kind: EndpointKind) -> Self {
		Self {
			url: url.into(),
			kind,
			read_timeout: kind.default_read_timeout(),
			write_timeout: kind.default_write_timeout(),
		}
	}

	pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
		self.read_timeout = timeout;
		self
	}

	pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
		self.write_timeout = timeout;
		self
	}

	/// Endpoint URL with any path or query stripped, safe for logs.
	///
	/// Provider URLs often embed API keys in the path.
	pub fn display_url(&self) -> String {
		let without_scheme = self
			.url
			.split_once("://")
			.map(|(scheme, rest)| (Some(scheme), rest))
			.unwrap_or((None, self.url.as_str()));
		let host = without_scheme.1.split(['/', '?']).next().unwrap_or_default();
		match without_scheme.0 {
			Some(scheme) => format!("{}://{}", scheme, host),
			None => host.to_string(),
		}
	}
}

/// Token balance and allowance of one owner, read at a single point in time.
///
/// Never cached across flow steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
	pub owner: Address,
	pub balance: U256,
	pub allowance: U256,
}

impl BalanceSnapshot {
	pub fn covers_balance(&self, required: U256) -> bool {
		self.balance >= required
	}

	pub fn covers_allowance(&self, required: U256) -> bool {
		self.allowance >= required
	}
}
