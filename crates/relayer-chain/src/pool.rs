//! Ordered set of upstream endpoints with a rotation pointer.

use crate::ChainError;
use relayer_types::{Endpoint, EndpointHealth};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Ring of endpoints. Endpoints are never removed; a failing one is only
/// skipped by advancing the pointer.
///
/// The pool belongs to a single [`crate::ChainClient`]; there is no
/// process-wide "current RPC" state.
#[derive(Debug)]
pub struct EndpointPool {
	endpoints: Vec<Endpoint>,
	cursor: AtomicUsize,
	health: Vec<AtomicU8>,
}

impl EndpointPool {
	pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, ChainError> {
		if endpoints.is_empty() {
			return Err(ChainError::Configuration(
				"At least one endpoint is required".to_string(),
			));
		}

		let health = endpoints
			.iter()
			.map(|_| AtomicU8::new(encode(EndpointHealth::Unknown)))
			.collect();

		Ok(Self {
			endpoints,
			cursor: AtomicUsize::new(0),
			health,
		})
	}

	pub fn len(&self) -> usize {
		self.endpoints.len()
	}

	pub fn is_empty(&self) -> bool {
		self.endpoints.is_empty()
	}

	pub fn current_index(&self) -> usize {
		self.cursor.load(Ordering::Acquire) % self.endpoints.len()
	}

	pub fn current(&self) -> Endpoint {
		self.endpoints[self.current_index()].clone()
	}

	/// Advances to the next endpoint, wrapping after the last one.
	pub fn rotate(&self) -> Endpoint {
		let len = self.endpoints.len();
		let previous = self
			.cursor
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % len))
			.unwrap_or_default();
		self.endpoints[(previous + 1) % len].clone()
	}

	/// Moves the shared pointer past `failed`, unless another caller has
	/// already moved it elsewhere.
	pub fn advance_from(&self, failed: usize) {
		let len = self.endpoints.len();
		self.cursor
			.compare_exchange(failed % len, (failed + 1) % len, Ordering::AcqRel, Ordering::Acquire)
			.ok();
	}

	/// Points back at the first (preferred) endpoint.
	pub fn reset(&self) {
		self.cursor.store(0, Ordering::Release);
	}

	pub fn endpoint(&self, index: usize) -> &Endpoint {
		&self.endpoints[index % self.endpoints.len()]
	}

	pub fn mark_healthy(&self, index: usize) {
		self.set_health(index, EndpointHealth::Healthy);
	}

	pub fn mark_failing(&self, index: usize) {
		self.set_health(index, EndpointHealth::Failing);
	}

	pub fn health(&self, index: usize) -> EndpointHealth {
		decode(self.health[index % self.health.len()].load(Ordering::Relaxed))
	}

	fn set_health(&self, index: usize, health: EndpointHealth) {
		self.health[index % self.health.len()].store(encode(health), Ordering::Relaxed);
	}
}

fn encode(health: EndpointHealth) -> u8 {
	match health {
		EndpointHealth::Unknown => 0,
		EndpointHealth::Healthy => 1,
		EndpointHealth::Failing => 2,
	}
}

fn decode(raw: u8) -> EndpointHealth {
	match raw {
		1 => EndpointHealth::Healthy,
		2 => EndpointHealth::Failing,
		_ => EndpointHealth::Unknown,
	}
}
