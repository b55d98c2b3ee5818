//! Exponential backoff with jitter, shared by every component that retries
//! transient object-store or ring-KV errors.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::future_not_send,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]
use observability_deps::tracing::warn;
use rand::prelude::*;
use std::ops::ControlFlow;
use std::time::Duration;

/// Exponential backoff with jitter.
///
/// See <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>
#[derive(Debug, Clone)]
#[allow(missing_copy_implementations)]
pub struct BackoffConfig {
    /// Initial backoff.
    pub init_backoff: Duration,

    /// Maximum backoff.
    pub max_backoff: Duration,

    /// Multiplier for each backoff round.
    pub base: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            base: 3.,
        }
    }
}

/// Error returned once a bounded retry budget is exhausted.
#[derive(Debug, thiserror::Error)]
#[error("retry budget of {attempts} attempt(s) exhausted: {source}")]
pub struct RetriesExhausted<E> {
    /// Number of attempts made before giving up.
    pub attempts: usize,
    /// The last error observed.
    #[source]
    pub source: E,
}

/// [`Backoff`] can be created from a [`BackoffConfig`].
///
/// Consecutive calls to [`Backoff::next`] return the next backoff interval.
pub struct Backoff {
    init_backoff: f64,
    next_backoff_secs: f64,
    max_backoff_secs: f64,
    base: f64,
    attempts: usize,
    rng: Option<Box<dyn RngCore + Sync + Send>>,
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff")
            .field("init_backoff", &self.init_backoff)
            .field("next_backoff_secs", &self.next_backoff_secs)
            .field("max_backoff_secs", &self.max_backoff_secs)
            .field("base", &self.base)
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl Backoff {
    /// Create a new [`Backoff`] from the provided [`BackoffConfig`].
    pub fn new(config: &BackoffConfig) -> Self {
        Self::new_with_rng(config, None)
    }

    /// Creates a new `Backoff` with the optional `rng`.
    ///
    /// Uses [`rand::thread_rng()`] if no rng is provided.
    pub fn new_with_rng(
        config: &BackoffConfig,
        rng: Option<Box<dyn RngCore + Sync + Send>>,
    ) -> Self {
        let init_backoff = config.init_backoff.as_secs_f64();
        Self {
            init_backoff,
            next_backoff_secs: init_backoff,
            max_backoff_secs: config.max_backoff.as_secs_f64(),
            base: config.base,
            attempts: 0,
            rng,
        }
    }

    /// Number of attempts made so far (including the first, non-retried one).
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Returns the next backoff duration to wait for.
    fn next(&mut self) -> Duration {
        self.attempts += 1;
        let range = self.init_backoff..(self.next_backoff_secs * self.base);

        let rand_backoff = match self.rng.as_mut() {
            Some(rng) => rng.gen_range(range),
            None => thread_rng().gen_range(range),
        };

        let next_backoff = self.max_backoff_secs.min(rand_backoff);
        Duration::from_secs_f64(std::mem::replace(&mut self.next_backoff_secs, next_backoff))
    }

    /// Retry an operation forever, backing off between attempts, until it
    /// reports success via [`ControlFlow::Break`]. Intended for transient
    /// storage errors that are expected to clear on their own (§7 "Transient
    /// storage").
    pub async fn retry_with_backoff<F, F1, B, E>(
        &mut self,
        op_name: &str,
        mut do_stuff: F,
    ) -> B
    where
        F: (FnMut() -> F1) + Send,
        F1: std::future::Future<Output = ControlFlow<B, E>> + Send,
        E: std::error::Error + Send,
    {
        loop {
            // first execute `F` and then use it, so we can avoid `F: Sync`.
            let do_stuff = do_stuff();

            let e = match do_stuff.await {
                ControlFlow::Break(r) => break r,
                ControlFlow::Continue(e) => e,
            };

            let backoff = self.next();
            warn!(
                e=%e,
                op_name,
                attempt = self.attempts,
                backoff_secs = backoff.as_secs_f64(),
                "operation failed, backing off before retry",
            );
            tokio::time::sleep(backoff).await;
        }
    }

    /// Retry an operation up to `max_attempts` times, returning the last
    /// error once the budget is exhausted. This is the shape used for
    /// per-tenant `compaction_retries` (§7 "per-tenant retries ... on
    /// exhaustion, surface 'failed'").
    pub async fn retry_with_backoff_bounded<F, F1, B, E>(
        &mut self,
        op_name: &str,
        max_attempts: usize,
        mut do_stuff: F,
    ) -> Result<B, RetriesExhausted<E>>
    where
        F: (FnMut() -> F1) + Send,
        F1: std::future::Future<Output = Result<B, E>> + Send,
        E: std::error::Error + Send,
    {
        loop {
            match do_stuff().await {
                Ok(b) => return Ok(b),
                Err(e) => {
                    if self.attempts + 1 >= max_attempts {
                        return Err(RetriesExhausted {
                            attempts: self.attempts + 1,
                            source: e,
                        });
                    }
                    let backoff = self.next();
                    warn!(
                        e=%e,
                        op_name,
                        attempt = self.attempts,
                        max_attempts,
                        backoff_secs = backoff.as_secs_f64(),
                        "operation failed, backing off before retry",
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Retry every error forever (no bound), converting `Result` into the
    /// `ControlFlow` shape [`Backoff::retry_with_backoff`] expects.
    pub async fn retry_all_errors<F, F1, B, E>(&mut self, op_name: &str, mut do_stuff: F) -> B
    where
        F: (FnMut() -> F1) + Send,
        F1: std::future::Future<Output = Result<B, E>> + Send,
        E: std::error::Error + Send,
    {
        self.retry_with_backoff(op_name, move || {
            let do_stuff = do_stuff();

            async {
                match do_stuff.await {
                    Ok(b) => ControlFlow::Break(b),
                    Err(e) => ControlFlow::Continue(e),
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use std::convert::Infallible;

    #[test]
    fn next_backoff_is_bounded_by_init_and_max() {
        let init_backoff_secs = 1.;
        let max_backoff_secs = 500.;
        let base = 3.;

        let config = BackoffConfig {
            init_backoff: Duration::from_secs_f64(init_backoff_secs),
            max_backoff: Duration::from_secs_f64(max_backoff_secs),
            base,
        };

        let assert_fuzzy_eq = |a: f64, b: f64| assert!((b - a).abs() < 0.0001, "{} != {}", a, b);

        // rng that always returns the minimum of the range
        let rng = Box::new(StepRng::new(0, 0));
        let mut backoff = Backoff::new_with_rng(&config, Some(rng));
        for _ in 0..20 {
            assert_eq!(backoff.next().as_secs_f64(), init_backoff_secs);
        }

        // rng that always returns the maximum of the range
        let rng = Box::new(StepRng::new(u64::MAX, 0));
        let mut backoff = Backoff::new_with_rng(&config, Some(rng));
        for i in 0..20 {
            let value = (base.powi(i) * init_backoff_secs).min(max_backoff_secs);
            assert_fuzzy_eq(backoff.next().as_secs_f64(), value);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_retry_gives_up_after_max_attempts() {
        let config = BackoffConfig {
            init_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            base: 2.,
        };
        let mut backoff = Backoff::new(&config);
        let mut calls = 0usize;

        let result: Result<Infallible, _> = backoff
            .retry_with_backoff_bounded("always-fails", 3, || {
                calls += 1;
                async move { Err::<Infallible, _>(TestErr) }
            })
            .await
            .map(|_: Infallible| unreachable!());

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(calls, 3);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("test error")]
    struct TestErr;
}
