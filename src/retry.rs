//! Bounded exponential backoff for registry calls.

use crate::config::{RETRY_INITIAL_DELAY, RETRY_MAX_DELAY, RETRY_MAX_ELAPSED};
use crate::error::AvrowResult;
use crate::registry::{DecodingRegistry, EncodingRegistry, RegistryError, SchemaGetter};
use crate::schema::Schema;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};

/// Delays between attempts of one registry call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Ceiling of the first delay.
    pub initial: Duration,
    /// Largest ceiling any delay may have.
    pub max_delay: Duration,
    /// Time after which no further attempt is started.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial: RETRY_INITIAL_DELAY,
            max_delay: RETRY_MAX_DELAY,
            max_elapsed: RETRY_MAX_ELAPSED,
        }
    }
}

// Full jitter: a uniform delay between zero and the ceiling.
fn jitter(ceiling: Duration) -> Duration {
    let nanos = ceiling.as_nanos().min(u64::MAX as u128) as u64;
    if nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::thread_rng().gen_range(0..=nanos))
}

impl RetryPolicy {
    /// Runs `op` until it succeeds, fails with an error that is not
    /// retriable, or the time budget is spent. Returns the last result.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RegistryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RegistryError>>,
    {
        let start = Instant::now();
        let mut ceiling = self.initial;
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_retriable() => return Err(e),
                Err(e) => e,
            };
            let delay = jitter(ceiling);
            if start.elapsed() + delay >= self.max_elapsed {
                return Err(err);
            }
            log::warn!(
                "{} failed (attempt {}): {}; retrying in {:?}",
                what,
                attempt,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
            ceiling = (ceiling * 2).min(self.max_delay);
            attempt += 1;
        }
    }
}

/// A registry whose lookups are retried according to a [`RetryPolicy`].
///
/// The header helpers are delegated unchanged.
pub struct Retrying<R> {
    inner: R,
    policy: RetryPolicy,
}

impl<R> Retrying<R> {
    /// Wraps `inner` with the default policy.
    pub fn new(inner: R) -> Self {
        Retrying::with_policy(inner, RetryPolicy::default())
    }

    /// Wraps `inner` with `policy`.
    pub fn with_policy(inner: R, policy: RetryPolicy) -> Self {
        Retrying { inner, policy }
    }

    /// The wrapped registry.
    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: SchemaGetter> SchemaGetter for Retrying<R> {
    fn schema_id<'m>(&self, msg: &'m [u8]) -> Option<(i64, &'m [u8])> {
        self.inner.schema_id(msg)
    }

    fn append_with_schema_id(&self, buf: &mut Vec<u8>, body: &[u8], id: i64) -> AvrowResult<()> {
        self.inner.append_with_schema_id(buf, body, id)
    }

    async fn schema_for_id(&self, id: i64) -> Result<String, RegistryError> {
        self.policy
            .run("schema lookup", || self.inner.schema_for_id(id))
            .await
    }
}

#[async_trait]
impl<R: EncodingRegistry> EncodingRegistry for Retrying<R> {
    fn append_schema_id(&self, buf: &mut Vec<u8>, id: i64) -> AvrowResult<()> {
        self.inner.append_schema_id(buf, id)
    }

    async fn id_for_schema(&self, schema: &Schema) -> Result<i64, RegistryError> {
        self.policy
            .run("schema registration", || self.inner.id_for_schema(schema))
            .await
    }
}

#[async_trait]
impl<R: DecodingRegistry> DecodingRegistry for Retrying<R> {
    fn decode_schema_id<'m>(&self, msg: &'m [u8]) -> Option<(i64, &'m [u8])> {
        self.inner.decode_schema_id(msg)
    }

    async fn schema_for_id(&self, id: i64) -> Result<Schema, RegistryError> {
        self.policy
            .run("schema lookup", || self.inner.schema_for_id(id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Fails `failures` times with `err`, then answers.
    struct Flaky {
        failures: usize,
        err: RegistryError,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize, err: RegistryError) -> Self {
            Flaky {
                failures,
                err,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SchemaGetter for Flaky {
        async fn schema_for_id(&self, _id: i64) -> Result<String, RegistryError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(self.err.clone());
            }
            Ok(r#""int""#.to_string())
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_elapsed: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let reg = Retrying::with_policy(
            Flaky::new(3, RegistryError::Unavailable("refused".into())),
            fast(),
        );
        assert_eq!(reg.schema_for_id(1).await, Ok(r#""int""#.to_string()));
        assert_eq!(reg.inner().calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let reg = Retrying::with_policy(Flaky::new(3, RegistryError::NotFound(1)), fast());
        assert_eq!(reg.schema_for_id(1).await, Err(RegistryError::NotFound(1)));
        assert_eq!(reg.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let err = RegistryError::Status {
            code: 503,
            message: "unavailable".into(),
        };
        let policy = RetryPolicy {
            max_elapsed: Duration::ZERO,
            ..fast()
        };
        let reg = Retrying::with_policy(Flaky::new(usize::MAX, err.clone()), policy);
        assert_eq!(reg.schema_for_id(1).await, Err(err));
        assert_eq!(reg.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn jitter_is_bounded() {
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(jitter(Duration::from_millis(3)) <= Duration::from_millis(3));
        }
    }
}
