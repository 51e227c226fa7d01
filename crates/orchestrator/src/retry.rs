//! Per-stage retry policy
//!
//! Critical stages re-invoke the same stage function with the same inputs, up
//! to a stage-specific attempt count with a linearly increasing delay. A
//! retried stage restarts from its own beginning, never from the pipeline's
//! beginning. Precondition errors bypass retry entirely; repeating them
//! cannot change the outcome.

use avatar_common::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy for one stage
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Additional delay per subsequent retry
    pub delay_step: Duration,
}

impl RetryPolicy {
    /// Speech synthesis: typically a transient remote-service fault, so a few
    /// quick attempts
    #[must_use]
    pub fn speech() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            delay_step: Duration::from_secs(0),
        }
    }

    /// Talking-head rendering: fewer attempts, slightly longer delay
    #[must_use]
    pub fn render() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(10),
            delay_step: Duration::from_secs(5),
        }
    }

    /// Identity training: each attempt is expensive, so long delays
    #[must_use]
    pub fn training() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            delay_step: Duration::from_secs(0),
        }
    }

    /// Delay before retrying after the given 1-based attempt
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay + self.delay_step * attempt.saturating_sub(1)
    }
}

/// Run a stage operation under a retry policy.
///
/// Non-retryable errors and the final attempt's error are returned to the
/// caller unchanged, carrying the captured reason.
pub async fn run_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    stage: &'static str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= policy.max_attempts => {
                warn!(
                    "{} stage exhausted {} attempts: {}",
                    stage, policy.max_attempts, e
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "{} stage attempt {}/{} failed ({}), retrying in {:?}",
                    stage, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avatar_common::PipelineError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn immediate_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(0),
            delay_step: Duration::from_millis(0),
        }
    }

    #[test]
    fn test_delay_increases_linearly() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(10),
            delay_step: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(10));
        assert_eq!(policy.delay_after(2), Duration::from_secs(15));
        assert_eq!(policy.delay_after(3), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(immediate_policy(3), "speech", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PipelineError::stage("speech", "remote fault"))
                } else {
                    Ok("audio.wav")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "audio.wav");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = run_with_retry(immediate_policy(3), "speech", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::stage("speech", "remote fault")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_precondition_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = run_with_retry(immediate_policy(3), "speech", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::NotFound("job j1".into())) }
        })
        .await;

        assert!(matches!(result, Err(PipelineError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
