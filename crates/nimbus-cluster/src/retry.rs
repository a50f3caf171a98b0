//! Bounded exponential backoff for cluster calls.
//!
//! Only [`ClusterError::Transient`] failures are retried. Permanent and
//! not-found errors return immediately so the caller sees the rejection
//! without delay.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tracing::{error, warn};

use crate::types::{
    ClusterError, ClusterResourceClient, ClusterResult, DeleteOutcome, ResourceDoc,
    ResourceHandle, ResourceRef, ResourceStatus,
};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Scale each delay by a random factor in [0.5, 1.5).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (1-based), before jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let secs = (self.base_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Run `operation` until it succeeds, fails non-transiently, or the policy's
/// attempt ceiling is reached.
pub async fn retry_transient<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> ClusterResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClusterResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if attempt >= max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "giving up after max attempts"
                    );
                    return Err(match e {
                        ClusterError::Transient(msg) => ClusterError::Transient(format!(
                            "{msg} (gave up after {attempt} attempts)"
                        )),
                        other => other,
                    });
                }

                let mut delay = policy.delay_for(attempt);
                if policy.jitter {
                    let factor = rand::thread_rng().gen_range(0.5..1.5);
                    delay = Duration::from_secs_f64(delay.as_secs_f64() * factor);
                }

                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Wraps any client so that apply, patch and delete retry transient failures.
///
/// `get` is passed through with a single attempt: readiness polling already
/// treats a failed read as "not ready yet" and has its own deadline.
#[derive(Debug, Clone)]
pub struct Retrying<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C> Retrying<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<C: ClusterResourceClient> ClusterResourceClient for Retrying<C> {
    async fn apply(&self, doc: &ResourceDoc) -> ClusterResult<ResourceHandle> {
        let name = format!("apply {}", doc.target);
        retry_transient(&self.policy, &name, || self.inner.apply(doc)).await
    }

    async fn get(&self, target: &ResourceRef) -> ClusterResult<ResourceStatus> {
        self.inner.get(target).await
    }

    async fn patch(&self, target: &ResourceRef, fields: &Value) -> ClusterResult<()> {
        let name = format!("patch {target}");
        retry_transient(&self.policy, &name, || self.inner.patch(target, fields)).await
    }

    async fn delete(&self, target: &ResourceRef) -> ClusterResult<DeleteOutcome> {
        let name = format!("delete {target}");
        retry_transient(&self.policy, &name, || self.inner.delete(target)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let p = fast_policy(10);
        assert_eq!(p.delay_for(1), Duration::from_millis(10));
        assert_eq!(p.delay_for(2), Duration::from_millis(20));
        assert_eq!(p.delay_for(3), Duration::from_millis(40));
        assert_eq!(p.delay_for(6), Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let result = retry_transient(&fast_policy(5), "op", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ClusterError::Transient("503".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_is_respected() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let result: ClusterResult<()> = retry_transient(&fast_policy(3), "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ClusterError::Transient("connection refused".into()))
            }
        })
        .await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("gave up after 3 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_is_not_retried() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let result: ClusterResult<()> = retry_transient(&fast_policy(5), "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ClusterError::Permanent("admission webhook denied".into()))
            }
        })
        .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(
            result,
            Err(ClusterError::Permanent("admission webhook denied".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let _ = retry_transient(&fast_policy(0), "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ClusterError::Transient("x".into()))
            }
        })
        .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
