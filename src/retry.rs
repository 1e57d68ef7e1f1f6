//! Bounded retries with exponential backoff for external calls.
//!
//! Every attempt runs under its own deadline; an attempt that exceeds it
//! counts as a transient failure. Permanent failures stop immediately.

use crate::defaults;
use crate::error::CallError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How often and how patiently to call an external capability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            base_delay_ms: defaults::BASE_DELAY_MS,
            max_delay_ms: defaults::MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without sleeping, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `retry` (0-based): base * 2^retry, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Why a retried call finally gave up.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryError {
    pub attempts: u32,
    pub last: CallError,
}

impl RetryError {
    /// Human-readable summary for stage error messages.
    pub fn describe(&self) -> String {
        if self.last.is_transient() {
            format!("gave up after {} attempt(s): {}", self.attempts, self.last)
        } else {
            self.last.to_string()
        }
    }
}

/// Call `op` until it succeeds, fails permanently, or runs out of attempts.
///
/// `label` names the call in log output.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    attempt_timeout: Duration,
    label: &str,
    mut op: F,
) -> std::result::Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, CallError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(CallError::Timeout(attempt_timeout)),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(call = label, attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if !error.is_transient() => {
                warn!(call = label, attempt, %error, "Call failed permanently");
                return Err(RetryError {
                    attempts: attempt,
                    last: error,
                });
            }
            Err(error) if attempt >= max_attempts => {
                warn!(call = label, attempt, %error, "Call failed, attempts exhausted");
                return Err(RetryError {
                    attempts: attempt,
                    last: error,
                });
            }
            Err(error) => {
                let delay = policy.backoff(attempt - 1);
                warn!(
                    call = label,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    %error,
                    "Call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
