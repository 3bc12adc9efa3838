//! Retry policy for provider adapter calls (spec §4.5): classify a failed
//! call into retry / resize / reauth-once / fatal, back off exponentially
//! with jitter, and never retry past a cancellation.
//!
//! The cancellation-aware wait loop is grounded on the supplementary example
//! repo `querymt-querymt`'s `call_llm_with_retry`/`wait_with_cancellation`
//! (`tokio::select!` between a sleep and a cancellation signal) — the
//! closest available reference for a retry loop that also has to stop
//! cleanly mid-wait, since the teacher's own implementation of this file was
//! absent from the retrieval pack.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Maximum number of attempts before a retryable error becomes fatal (spec
/// §4.5's numeric policy).
const MAX_ATTEMPTS: u32 = 8;

/// Base backoff delay; attempt `n` waits `BASE_DELAY * 2^(n-1)`.
const BASE_DELAY: Duration = Duration::from_millis(2000);

/// +/-20% jitter applied to the computed backoff delay.
const JITTER_FRACTION: f64 = 0.20;

/// Minimum `max_tokens` a context-limit resize will ever produce.
const MIN_RESIZED_MAX_TOKENS: u64 = 1000;

/// Reserved headroom subtracted from the context limit when resizing
/// `max_tokens` after a 400 context-limit error.
const RESIZE_HEADROOM: u64 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_DELAY,
            jitter_fraction: JITTER_FRACTION,
        }
    }
}

/// Whether an HTTP status code is worth retrying at all (429 rate limit,
/// 529 Anthropic overloaded, and 5xx server errors).
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 529 | 500..=599)
}

/// Everything the retry loop needs to know about a failed call, without
/// coupling it to any one provider's error type.
pub trait IsRetryable {
    /// A transient error worth retrying with backoff (rate limit, 5xx,
    /// overloaded). Mutually exclusive with the other classifications.
    fn is_retryable(&self) -> bool;
    /// Provider-supplied `Retry-After`, when present — takes priority over
    /// the computed exponential delay.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
    /// A 401: worth exactly one re-authentication attempt.
    fn is_reauth(&self) -> bool {
        false
    }
    /// A 400 "context limit exceeded" error, carrying `(input_tokens,
    /// requested_max_tokens, context_limit)` so the caller can resize and
    /// retry once with `safe_max_tokens`.
    fn context_limit_resize(&self) -> Option<(u64, u64, u64)> {
        None
    }
    /// A deliberate cancellation — never retried, regardless of the above.
    fn is_cancelled(&self) -> bool {
        false
    }
    /// Called once, when a retryable error has exhausted `max_attempts`, so
    /// the final error can be annotated with a message mentioning the retry
    /// limit (spec §8 property 7). Default is a no-op for error types that
    /// don't need this.
    fn with_retry_limit_message(self, _attempts: u32) -> Self
    where
        Self: Sized,
    {
        self
    }
}

/// `max(contextLimit - inputTokens - 1000, 1000)` (spec §4.5's exact
/// resize formula).
pub fn safe_max_tokens(input_tokens: u64, context_limit: u64) -> u64 {
    context_limit
        .saturating_sub(input_tokens)
        .saturating_sub(RESIZE_HEADROOM)
        .max(MIN_RESIZED_MAX_TOKENS)
}

/// What the retry loop learned after an attempt, passed back into the next
/// call so it can adjust the request (currently: a resized `max_tokens`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryState {
    pub attempt: u32,
    pub resized_max_tokens: Option<u64>,
}

fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.base_delay.as_millis() as f64 * 2f64.powi((attempt as i32) - 1);
    let jitter = rand::thread_rng().gen_range(-config.jitter_fraction..=config.jitter_fraction);
    let millis = (exp * (1.0 + jitter)).max(0.0) as u64;
    Duration::from_millis(millis)
}

/// Sleep for `delay`, bailing out early if `token` is cancelled. Returns
/// `true` if the wait was cut short by cancellation.
async fn wait_with_cancellation(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = token.cancelled() => true,
    }
}

/// Drive `call` to completion, retrying according to spec §4.5's policy.
///
/// `call` receives the current [`RetryState`] (attempt number, and any
/// resized `max_tokens` from a prior context-limit error) and returns the
/// provider's `Result`. A 401 is retried exactly once regardless of
/// `max_attempts`. A context-limit error always resizes and retries once
/// (it doesn't consume a backoff attempt — the request was never accepted).
/// All other classifications follow `max_attempts`.
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<T, E>
where
    E: IsRetryable,
    F: FnMut(RetryState) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut state = RetryState::default();
    let mut reauth_used = false;
    let mut resize_used = false;

    loop {
        state.attempt += 1;

        if cancel.is_cancelled() {
            // Let the underlying call produce its own cancellation error so
            // callers get a consistent error type out of this function.
            return call(state).await;
        }

        match call(state).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if err.is_cancelled() {
                    return Err(err);
                }

                if let Some((input_tokens, _requested, context_limit)) =
                    err.context_limit_resize().filter(|_| !resize_used)
                {
                    resize_used = true;
                    state.resized_max_tokens = Some(safe_max_tokens(input_tokens, context_limit));
                    tracing::warn!(
                        input_tokens,
                        context_limit,
                        resized = state.resized_max_tokens,
                        "context limit exceeded, resizing max_tokens and retrying"
                    );
                    continue;
                }

                if err.is_reauth() && !reauth_used {
                    reauth_used = true;
                    tracing::warn!(attempt = state.attempt, "reauthenticating after 401");
                    continue;
                }

                if err.is_retryable() && state.attempt < config.max_attempts {
                    let delay = err
                        .retry_after()
                        .unwrap_or_else(|| backoff_delay(config, state.attempt));
                    tracing::warn!(
                        attempt = state.attempt,
                        max_attempts = config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "retryable provider error, backing off"
                    );
                    if wait_with_cancellation(delay, cancel).await {
                        return Err(err);
                    }
                    continue;
                }

                if err.is_retryable() {
                    return Err(err.with_retry_limit_message(state.attempt));
                }

                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Default)]
    struct FakeError {
        retryable: bool,
        reauth: bool,
        cancelled: bool,
        resize: Option<(u64, u64, u64)>,
        retry_limit_message: Option<String>,
    }

    impl IsRetryable for FakeError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
        fn is_reauth(&self) -> bool {
            self.reauth
        }
        fn context_limit_resize(&self) -> Option<(u64, u64, u64)> {
            self.resize
        }
        fn is_cancelled(&self) -> bool {
            self.cancelled
        }
        fn with_retry_limit_message(self, attempts: u32) -> Self {
            FakeError {
                retry_limit_message: Some(format!("retry limit of {attempts} attempts exceeded")),
                ..self
            }
        }
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(529));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn resize_formula_matches_spec() {
        assert_eq!(safe_max_tokens(190_000, 200_000), 9_000);
        // Never goes below the floor even when input already exceeds limit.
        assert_eq!(safe_max_tokens(250_000, 200_000), 1_000);
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<u32, FakeError> = with_retry(&RetryConfig::default(), &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            base_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let result: Result<u32, FakeError> = with_retry(&config, &cancel, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(FakeError {
                        retryable: true,
                        reauth: false,
                        cancelled: false,
                        resize: None,
                        retry_limit_message: None,
                    })
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_errors_are_never_retried() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<u32, FakeError> = with_retry(&RetryConfig::default(), &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(FakeError {
                    retryable: true,
                    reauth: false,
                    cancelled: true,
                    resize: None,
                    retry_limit_message: None,
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reauth_retried_exactly_once() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<u32, FakeError> = with_retry(&RetryConfig::default(), &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(FakeError {
                    retryable: false,
                    reauth: true,
                    cancelled: false,
                    resize: None,
                    retry_limit_message: None,
                })
            }
        })
        .await;
        assert!(result.is_err());
        // One original attempt + one reauth retry, then fatal.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn context_limit_resizes_state_once() {
        let cancel = CancellationToken::new();
        let seen_resize = std::sync::Mutex::new(Vec::new());
        let result: Result<u32, FakeError> = with_retry(&RetryConfig::default(), &cancel, |state| {
            seen_resize.lock().unwrap().push(state.resized_max_tokens);
            async move {
                if state.attempt == 1 {
                    Err(FakeError {
                        retryable: false,
                        reauth: false,
                        cancelled: false,
                        resize: Some((190_000, 16_000, 200_000)),
                        retry_limit_message: None,
                    })
                } else {
                    Ok(1)
                }
            }
        })
        .await;
        assert!(result.is_ok());
        let seen = seen_resize.into_inner().unwrap();
        assert_eq!(seen, vec![None, Some(9_000)]);
    }

    #[tokio::test]
    async fn exhausts_max_attempts() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let result: Result<u32, FakeError> = with_retry(&config, &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(FakeError {
                    retryable: true,
                    reauth: false,
                    cancelled: false,
                    resize: None,
                    retry_limit_message: None,
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    /// Spec §8 property 7: a provider returning 429 indefinitely terminates
    /// after exactly `MAX_ATTEMPTS` (8) attempts with an error whose message
    /// mentions the retry limit.
    #[tokio::test]
    async fn exhausts_default_attempts_with_retry_limit_message() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            base_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let result: Result<u32, FakeError> = with_retry(&config, &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(FakeError {
                    retryable: true,
                    reauth: false,
                    cancelled: false,
                    resize: None,
                    retry_limit_message: None,
                })
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
        let err = result.unwrap_err();
        assert_eq!(
            err.retry_limit_message.as_deref(),
            Some("retry limit of 8 attempts exceeded")
        );
    }
}
