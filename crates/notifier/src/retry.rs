use std::time::Duration;

use nerdy_common::types::{PushPayload, Subscription};

use crate::dispatcher::{DeliveryResult, PushDelivery};

/// Bounded exponential backoff for transient delivery failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1)
    pub max_attempts: u32,
    /// Wait before the first retry; doubled for each further retry
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    /// Wait before retry number `retry` (0-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(retry.min(16)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Final outcome of a delivery and how many attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted {
    pub result: DeliveryResult,
    pub attempts: u32,
}

/// Deliver, retrying transient failures within the policy's budget.
///
/// Stops immediately on success or permanent failure. If the budget runs
/// out the last transient failure is returned.
pub async fn deliver_with_retry<D: PushDelivery>(
    dispatcher: &D,
    subscription: &Subscription,
    payload: &PushPayload,
    policy: &RetryPolicy,
) -> Attempted {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = dispatcher.deliver(subscription, payload).await;

        if !result.is_transient() || attempts >= policy.max_attempts {
            return Attempted { result, attempts };
        }

        let backoff = policy.backoff_for(attempts - 1);
        tracing::debug!(
            subscription_id = %subscription.id,
            attempt = attempts,
            backoff_ms = backoff.as_millis() as u64,
            result = ?result,
            "Transient push failure, backing off"
        );
        tokio::time::sleep(backoff).await;
    }
}
