//! Backoff-retrying transport.
//!
//! Every model request goes through a [`Transport`]: up to `max_retries`
//! sequential attempts, with a jittered exponential sleep between them so
//! concurrent callers neither hammer the API nor retry in lockstep.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::LlmError;

/// Retry configuration, threaded into the transport at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_retries: u32,
    /// Base of the exponential delay, in seconds.
    pub backoff: f64,
    /// Upper bound of the uniform random term added to each delay, in seconds.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: 1.5,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: f64) -> Self {
        Self {
            max_retries,
            backoff,
            ..Default::default()
        }
    }

    /// Policy that sleeps the bare `backoff^attempt`, without jitter.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Deterministic part of the delay after failed attempt `attempt`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.backoff.powi(attempt as i32).max(0.0))
    }

    /// `backoff^attempt + U(0, jitter)` seconds.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter > 0.0 {
            rand::rng().random_range(0.0..self.jitter)
        } else {
            0.0
        };
        self.base_delay(attempt) + Duration::from_secs_f64(jitter)
    }
}

/// Something that can wait; injected so tests can observe the backoff.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Issues one logical request with bounded retries.
#[derive(Clone)]
pub struct Transport {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").field("policy", &self.policy).finish()
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Transport {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 0-based attempt index.
    pub async fn call<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let attempts = self.policy.max_retries.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    debug!("{}: non-retryable failure on attempt {}: {}", label, attempt + 1, e);
                    return Err(e);
                }
                Err(e) => {
                    if attempt + 1 >= attempts {
                        warn!("{}: giving up after {} attempts: {}", label, attempts, e);
                        return Err(e);
                    }
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        "{}: attempt {} failed ({}), retrying in {:.2}s",
                        label,
                        attempt + 1,
                        e,
                        delay.as_secs_f64()
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Fail-soft variant: any failure becomes `T::default()` (empty text,
    /// empty response). Callers must read an empty result as "no answer
    /// obtained".
    pub async fn call_or_default<T, F, Fut>(&self, label: &str, op: F) -> T
    where
        T: Default,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        match self.call(label, op).await {
            Ok(value) => value,
            Err(e) => {
                warn!("{}: no answer obtained: {}", label, e);
                T::default()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Records requested sleeps instead of waiting.
    #[derive(Default)]
    pub(crate) struct RecordingSleeper {
        pub sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    fn transport(policy: RetryPolicy) -> (Transport, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        (Transport::with_sleeper(policy, sleeper.clone()), sleeper)
    }

    fn transient() -> LlmError {
        LlmError::ApiError {
            status: 503,
            message: "overloaded".to_string(),
        }
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff, 1.5);
        assert_eq!(policy.jitter, 0.25);
    }

    #[test]
    fn test_delay_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 0..4 {
            let delay = policy.delay_for(attempt).as_secs_f64();
            let base = 1.5f64.powi(attempt as i32);
            assert!(delay >= base);
            assert!(delay < base + 0.25 + 1e-9);
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_k_failures() {
        let (transport, sleeper) = transport(RetryPolicy::new(4, 2.0));
        let calls = AtomicU32::new(0);

        let result = transport
            .call("test", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err(transient()) } else { Ok("answer") } }
            })
            .await;

        assert_eq!(result.unwrap(), "answer");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let sleeps = sleeper.sleeps.lock().unwrap();
        assert_eq!(sleeps.len(), 2);
        assert!(sleeps[0] >= Duration::from_secs_f64(1.0));
        assert!(sleeps[1] >= Duration::from_secs_f64(2.0));
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let (transport, sleeper) = transport(RetryPolicy::default());
        let calls = AtomicU32::new(0);

        let result: Result<String, _> = transport
            .call("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // no sleep after the final attempt
        assert_eq!(sleeper.sleeps.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_call_or_default_absorbs_failure() {
        let (transport, _) = transport(RetryPolicy::default());
        let text: String = transport
            .call_or_default("test", |_| async { Err(transient()) })
            .await;
        assert_eq!(text, "");
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let (transport, sleeper) = transport(RetryPolicy::default());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = transport
            .call("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LlmError::ToolsUnsupported("no tools".into())) }
            })
            .await;

        assert!(matches!(result, Err(LlmError::ToolsUnsupported(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_retries_still_attempts_once() {
        let (transport, _) = transport(RetryPolicy::new(0, 1.5));
        let result = transport.call("test", |_| async { Ok::<_, LlmError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
