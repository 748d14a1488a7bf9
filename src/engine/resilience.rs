//! # engine::resilience — ResilienceWrapper
//!
//! ทุก call ออกไปข้างนอก (LLM, MT5 Bridge, Sentiment, Store) ห่อด้วย
//! [`call_with_retry`]:
//!
//! - timeout ต่อ attempt
//! - สูงสุด `max_attempts` ครั้ง, sleep ตาม `backoff` ระหว่าง attempt (30s, 60s, 120s)
//! - retry เฉพาะ `Transient` (และ `Timeout` ถ้า policy อนุญาต)
//! - ผลลัพธ์เป็น `Result<T, ProviderError>` เสมอ ไม่มี panic หลุดออกไป

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ProviderError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts:    u32,
    /// Delay before attempt n+1 is `backoff[n-1]` (last entry repeats).
    pub backoff:         Vec<Duration>,
    pub attempt_timeout: Duration,
    pub retry_timeouts:  bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts:    3,
            backoff:         vec![
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(120),
            ],
            attempt_timeout: Duration::from_secs(15),
            retry_timeouts:  true,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let idx = (attempt.saturating_sub(1)) as usize;
        self.backoff
            .get(idx)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    fn should_retry(&self, err: &ProviderError) -> bool {
        match err {
            ProviderError::Transient(_) => true,
            ProviderError::Timeout(_) => self.retry_timeouts,
            _ => false,
        }
    }
}

/// Run `op` under `policy`. Non-retryable errors come back as-is; a retryable
/// error on the final attempt comes back wrapped in `Exhausted`.
pub async fn call_with_retry<T, F, Fut>(
    call:   &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(policy.attempt_timeout)),
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !policy.should_retry(&err) {
            return Err(err);
        }

        if attempt >= max {
            warn!(call, attempts = attempt, error = %err, "❌ retries exhausted");
            return Err(ProviderError::Exhausted {
                call:     call.to_string(),
                attempts: attempt,
                last:     Box::new(err),
            });
        }

        let delay = policy.delay_after(attempt);
        warn!(
            call,
            attempt,
            max,
            retry_in_secs = delay.as_secs(),
            error = %err,
            "⚠️ call failed, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn make_policy(retry_timeouts: bool) -> RetryPolicy {
        RetryPolicy { retry_timeouts, ..RetryPolicy::default() }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds_after_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let c = calls.clone();
        let result = call_with_retry("bridge", &make_policy(true), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Transient("502".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 30s + 60s between the three attempts
        assert_eq!(started.elapsed(), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_three_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = call_with_retry("bridge", &make_policy(true), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Transient("down".into()))
            }
        })
        .await;

        match result {
            Err(ProviderError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = call_with_retry("bridge", &make_policy(true), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Rejected("401".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_hands_over_when_policy_says_so() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_secs(10),
            ..make_policy(false)
        };

        let c = calls.clone();
        let result: Result<(), _> = call_with_retry("claude", &policy, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_retried_when_enabled() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_secs(5),
            ..make_policy(true)
        };

        let c = calls.clone();
        let result: Result<(), _> = call_with_retry("store", &policy, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        })
        .await;

        assert!(result.as_ref().is_err_and(|e| e.is_timeout()));
        assert!(matches!(result, Err(ProviderError::Exhausted { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_schedule_repeats_last_step() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_after(1), Duration::from_secs(30));
        assert_eq!(p.delay_after(2), Duration::from_secs(60));
        assert_eq!(p.delay_after(3), Duration::from_secs(120));
        assert_eq!(p.delay_after(7), Duration::from_secs(120));
    }
}
