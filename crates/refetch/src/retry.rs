use std::future::Future;

use tokio::time;

use crate::config::RetryPolicy;
use crate::error::{FetchError, FetchResult};

/// Runs the task produced by `task_gen` until it succeeds, fails terminally,
/// or the policy's attempt budget is used up.
///
/// The delay before retry *n* (1-indexed) is `base_delay * 2^(n-1)`, capped
/// at `max_delay` when one is configured. Only transient failures are
/// retried; intermediate ones are invisible to the caller, which observes a
/// single settled result. When the budget runs out, the last transient error
/// is surfaced wrapped in [`FetchError::AttemptsExhausted`].
///
/// When the policy carries a per-attempt timeout, an attempt exceeding it is
/// abandoned and counted as a transient [`FetchError::Timeout`].
pub async fn retry<G, F, T>(policy: &RetryPolicy, task_gen: G) -> FetchResult<T>
where
    G: Fn() -> F,
    F: Future<Output = FetchResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match policy.timeout {
            Some(limit) => match time::timeout(limit, task_gen()).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(limit)),
            },
            None => task_gen().await,
        };

        let err = match result {
            Ok(value) => break Ok(value),
            Err(err) if !err.is_retryable() => break Err(err),
            Err(err) => err,
        };

        if attempt >= max_attempts {
            break Err(FetchError::AttemptsExhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        // saturate: the exponent overflows u32 past 32 attempts
        let mut delay = policy.base_delay.saturating_mul(2u32.saturating_pow(attempt - 1));
        if let Some(cap) = policy.max_delay {
            delay = delay.min(cap);
        }
        tracing::debug!(attempt, ?delay, error = %err, "transient failure, backing off");
        time::sleep(delay).await;
    }
}
