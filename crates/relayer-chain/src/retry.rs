//! Bounded retries with endpoint rotation.

use crate::classify::classify;
use crate::pool::EndpointPool;
use crate::ChainError;
use backoff::{backoff::Backoff, ExponentialBackoff};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Attempt budget and delay curve for retried calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
	pub max_attempts: u32,
	pub initial_delay: Duration,
	pub max_delay: Duration,
	pub multiplier: f64,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			initial_delay: Duration::from_secs(2),
			max_delay: Duration::from_secs(8),
			multiplier: 1.5,
		}
	}
}

impl RetryPolicy {
	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts.max(1);
		self
	}

	pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
		self.initial_delay = initial;
		self.max_delay = max.max(initial);
		self
	}

	/// Fresh backoff schedule. Attempts, not elapsed time, bound the loop.
	pub(crate) fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoff {
			current_interval: self.initial_delay,
			initial_interval: self.initial_delay,
			randomization_factor: 0.0,
			multiplier: self.multiplier,
			max_interval: self.max_delay,
			max_elapsed_time: None,
			..Default::default()
		}
	}
}

/// Runs operations against the pool's current endpoint, rotating on
/// transient failures.
///
/// Each call walks the ring from the endpoint that was current when it
/// started, so concurrent calls cannot push one another back onto a failing
/// endpoint. The shared pointer only moves past an endpoint that has just
/// failed. Only failures classified as transient are retried. Any other
/// classification is returned immediately. When attempts run out the last
/// error is returned.
#[derive(Debug, Clone, Default)]
pub struct RetryController {
	policy: RetryPolicy,
}

impl RetryController {
	pub fn new(policy: RetryPolicy) -> Self {
		Self { policy }
	}

	pub fn policy(&self) -> &RetryPolicy {
		&self.policy
	}

	/// Runs `operation` with the index of the endpoint to use.
	pub async fn run<T, F, Fut>(
		&self,
		pool: &EndpointPool,
		label: &str,
		mut operation: F,
	) -> Result<T, ChainError>
	where
		F: FnMut(usize) -> Fut,
		Fut: Future<Output = Result<T, ChainError>>,
	{
		let mut backoff = self.policy.backoff();
		let start = pool.current_index();
		let mut attempts = 0;

		loop {
			let index = (start + attempts as usize) % pool.len();
			attempts += 1;

			match operation(index).await {
				Ok(value) => {
					pool.mark_healthy(index);
					return Ok(value);
				}
				Err(e) => {
					if !classify(&e).is_retryable() {
						return Err(e);
					}

					pool.mark_failing(index);
					pool.advance_from(index);

					if attempts >= self.policy.max_attempts {
						warn!(
							"{} failed after {} attempts, giving up: {}",
							label, attempts, e
						);
						return Err(e);
					}

					let delay = backoff.next_backoff().unwrap_or(self.policy.max_delay);
					warn!(
						endpoint = %pool.endpoint(index + 1).display_url(),
						"{} failed, attempt {}/{}, retrying in {:?}: {}",
						label, attempts, self.policy.max_attempts, delay, e
					);
					tokio::time::sleep(delay).await;
				}
			}
		}
	}
}
