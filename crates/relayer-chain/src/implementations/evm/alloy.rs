//! JSON-RPC backend built on Alloy.
//!
//! One [`AlloyRpc`] talks to one node over HTTP. It signs nothing itself:
//! transactions arrive already signed and are forwarded verbatim.

use crate::{ChainError, ChainInterface};
use alloy::network::{Ethereum, TransactionBuilder};
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use relayer_types::{Endpoint, TxHash};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Alloy HTTP backend for a single endpoint.
pub struct AlloyRpc {
	endpoint: Endpoint,
	provider: Box<dyn Provider<Ethereum>>,
}

impl AlloyRpc {
	pub fn new(endpoint: Endpoint) -> Result<Self, ChainError> {
		let provider = ProviderBuilder::default().connect_http(endpoint.url.parse().map_err(|e| {
			ChainError::Configuration(format!("Invalid RPC URL {}: {}", endpoint.display_url(), e))
		})?);
		debug!(endpoint = %endpoint.display_url(), kind = ?endpoint.kind, "Configured RPC endpoint");

		Ok(Self {
			endpoint,
			provider: Box::new(provider),
		})
	}

	async fn read<T, F>(&self, request: F) -> Result<T, ChainError>
	where
		F: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
	{
		with_timeout(self.endpoint.read_timeout, request).await
	}
}

/// Bounds `request` by `limit` and maps transport failures.
async fn with_timeout<T, F>(limit: Duration, request: F) -> Result<T, ChainError>
where
	F: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
{
	match tokio::time::timeout(limit, request).await {
		Ok(result) => result.map_err(map_rpc_error),
		Err(_) => Err(ChainError::Timeout(limit)),
	}
}

/// Translates an Alloy transport error into a [`ChainError`].
pub fn map_rpc_error(error: RpcError<TransportErrorKind>) -> ChainError {
	match error {
		RpcError::ErrorResp(payload) => ChainError::Rpc {
			code: payload.code,
			message: payload.message.to_string(),
			revert_data: payload.as_revert_data(),
		},
		RpcError::Transport(TransportErrorKind::HttpError(http)) => ChainError::Http {
			status: http.status,
			body: http.body,
		},
		RpcError::Transport(TransportErrorKind::MissingBatchResponse(id)) => {
			ChainError::Malformed(format!("Missing response for request {:?}", id))
		}
		RpcError::Transport(kind) => ChainError::Connection(kind.to_string()),
		RpcError::NullResp => ChainError::Malformed("Node returned a null response".to_string()),
		RpcError::DeserError { err, text } => {
			ChainError::Malformed(format!("{} in response {}", err, text))
		}
		other => ChainError::Other(other.to_string()),
	}
}

#[async_trait]
impl ChainInterface for AlloyRpc {
	fn endpoint(&self) -> &Endpoint {
		&self.endpoint
	}

	async fn chain_id(&self) -> Result<u64, ChainError> {
		self.read(async { self.provider.get_chain_id().await })
			.await
	}

	async fn native_balance(&self, owner: Address) -> Result<U256, ChainError> {
		self.read(async { self.provider.get_balance(owner).await })
			.await
	}

	async fn call(
		&self,
		from: Option<Address>,
		to: Address,
		data: Bytes,
	) -> Result<Bytes, ChainError> {
		let mut request = TransactionRequest::default().with_to(to).with_input(data);
		if let Some(from) = from {
			request = request.with_from(from);
		}
		self.read(async { self.provider.call(request).await }).await
	}

	async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError> {
		self.read(async { self.provider.get_transaction_count(address).pending().await })
			.await
	}

	async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, ChainError> {
		with_timeout(self.endpoint.write_timeout, async {
			let pending = self.provider.send_raw_transaction(&raw).await?;
			Ok::<_, RpcError<TransportErrorKind>>(*pending.tx_hash())
		})
		.await
	}

	async fn transaction_known(&self, hash: TxHash) -> Result<bool, ChainError> {
		self.read(async { self.provider.get_transaction_by_hash(hash).await })
			.await
			.map(|tx| tx.is_some())
	}
}

/// Builds one backend per endpoint, preserving order.
pub fn create_backends(endpoints: &[Endpoint]) -> Result<Vec<Arc<dyn ChainInterface>>, ChainError> {
	endpoints
		.iter()
		.map(|endpoint| {
			AlloyRpc::new(endpoint.clone()).map(|rpc| Arc::new(rpc) as Arc<dyn ChainInterface>)
		})
		.collect()
}
