//! Client-side poller for deferred calls.
//!
//! Fixed number of attempts at a fixed interval, no backoff. Each attempt
//! reads the queue reply for the hash; a terminal reply stops the loop and
//! triggers a best-effort reclaim of the queue entry.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::types::CallResult;
use crate::wallet::queue::Resolution;
use crate::wallet::WalletError;

/// Default number of poll attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between poll attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(3000);

/// The queue operations a poller needs.
#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Read the reply for a hash.
    async fn get_queue_reply(&self, hash: &str) -> Result<Option<Resolution>, WalletError>;

    /// Reclaim a hash.
    async fn remove_queue_method(&self, hash: &str) -> Result<bool, WalletError>;
}

/// Attempt budget and spacing for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollStrategy {
    /// Maximum number of reads.
    pub max_attempts: u32,
    /// Delay between reads.
    pub interval: Duration,
}

impl PollStrategy {
    /// Strategy with the given attempts and interval.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

impl Default for PollStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_INTERVAL)
    }
}

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The owner approved; holds the target's reply or its failure text.
    Approved(Result<CallResult, String>),
    /// The owner rejected the call.
    Rejected(String),
    /// The hash is unknown to the wallet or was already reclaimed.
    Vanished,
    /// Attempts ran out without a decision.
    Timeout {
        /// Attempts made.
        attempts: u32,
    },
}

/// Poll `hash` until it resolves, vanishes or the attempts run out.
///
/// Errors reading the reply count as "no decision yet". The reclaim after a
/// terminal reply is best effort; its failure is logged, not returned.
pub async fn poll_queue_method<S>(source: &S, hash: &str, strategy: PollStrategy) -> PollOutcome
where
    S: QueueSource + ?Sized,
{
    for attempt in 1..=strategy.max_attempts {
        let outcome = match source.get_queue_reply(hash).await {
            Ok(Some(Resolution::NotFound)) => None,
            Ok(Some(Resolution::Rejected(reason))) => Some(PollOutcome::Rejected(reason)),
            Ok(Some(Resolution::Approved(result))) => Some(PollOutcome::Approved(result)),
            Ok(None) => {
                warn!(hash = %hash, attempt, "hash unknown to wallet");
                return PollOutcome::Vanished;
            }
            Err(e) => {
                warn!(hash = %hash, attempt, error = %e, "queue reply read failed");
                None
            }
        };

        if let Some(outcome) = outcome {
            info!(hash = %hash, attempt, "deferred call resolved");
            if let Err(e) = source.remove_queue_method(hash).await {
                warn!(hash = %hash, error = %e, "queue reclaim failed");
            }
            return outcome;
        }

        debug!(hash = %hash, attempt, "still pending");
        if attempt < strategy.max_attempts {
            tokio::time::sleep(strategy.interval).await;
        }
    }

    PollOutcome::Timeout {
        attempts: strategy.max_attempts,
    }
}
