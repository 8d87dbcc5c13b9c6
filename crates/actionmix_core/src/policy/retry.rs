//! Retry with exponential backoff around the execution of an action.
//!
//! When check-internet shares the loop, connectivity is re-checked at the
//! start of every attempt and a connectivity failure backs off against the
//! check-internet `max_retry_delay` instead of the retry `max_delay`.

use super::connectivity;
use crate::action::Action;
use crate::config::{ResolvedCheckInternet, ResolvedRetry};
use crate::error::{ActionError, MixResult, UserException};
use crate::key::Key;
use crate::session::Shared;

/// Why one attempt failed.
enum Failure {
    Offline(ActionError),
    Action(ActionError),
}

/// The end of a retry series.
pub(crate) struct Executed<T> {
    pub result: MixResult<T>,
    /// False if every attempt stopped at the connectivity check.
    pub invoked: bool,
}

/// Runs `action` under `retry`, re-checking connectivity each attempt when
/// `connectivity` is given.
pub(crate) async fn execute<T: Send + 'static>(
    shared: &Shared,
    key: &Key,
    action: &Action<T>,
    retry: &ResolvedRetry,
    connectivity: Option<&ResolvedCheckInternet>,
) -> Executed<T> {
    let mut attempt: u32 = 0;
    let mut invoked = false;
    loop {
        let failure = match attempt_once(shared, action, connectivity).await {
            Ok(value) => {
                return Executed {
                    result: Ok(value),
                    invoked: true,
                }
            }
            Err(failure) => failure,
        };
        invoked |= matches!(failure, Failure::Action(_));
        let (error, cap) = match (&failure, connectivity) {
            (Failure::Offline(e), Some(check)) => (e, check.max_retry_delay),
            (Failure::Offline(e), None) | (Failure::Action(e), _) => (e, retry.max_delay),
        };

        let retries_used = attempt as usize + 1;
        if !error.is_retryable() || !retry.max_retries.allows(retries_used) {
            tracing::debug!(key = %key, attempts = retries_used, error = %error, "retries exhausted");
            let error = match failure {
                Failure::Offline(e) => {
                    if let Some(hook) = connectivity.and_then(|c| c.on_no_internet.as_ref()) {
                        hook(key);
                    }
                    e
                }
                Failure::Action(e) => e,
            };
            return Executed {
                result: Err(error),
                invoked,
            };
        }

        let delay = retry.delay_for(attempt, cap);
        tracing::warn!(
            key = %key,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "action failed, retrying"
        );
        if let Some(hook) = &retry.on_retry {
            hook(attempt, delay, error);
        }
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

async fn attempt_once<T: Send + 'static>(
    shared: &Shared,
    action: &Action<T>,
    connectivity: Option<&ResolvedCheckInternet>,
) -> Result<T, Failure> {
    if let Some(check) = connectivity {
        if !connectivity::check(shared).await {
            let exception = UserException::no_connectivity(check.if_open_dialog);
            return Err(Failure::Offline(exception.into()));
        }
    }
    action.invoke().await.map_err(Failure::Action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CheckInternetConfig, Policies, ProgrammingError, RetryConfig, StaticProbe};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn failing(calls: &Arc<AtomicU32>) -> Action<u8> {
        let calls = Arc::clone(calls);
        Action::sync(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ActionError::msg("boom"))
        })
    }

    fn retry(config: RetryConfig) -> ResolvedRetry {
        Policies::new().retry(config).resolve(&Key::from("k")).retry.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn max_retries_bounds_invocations() {
        let shared = Shared::new(Arc::new(StaticProbe::new(true)));
        let calls = Arc::new(AtomicU32::new(0));
        let delays = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&delays);
        let retry = retry(
            RetryConfig::default()
                .with_max_retries(3)
                .with_initial_delay(Duration::from_millis(100))
                .with_on_retry(move |attempt, delay, _| seen.lock().push((attempt, delay))),
        );

        let executed = execute(&shared, &Key::from("k"), &failing(&calls), &retry, None).await;
        assert!(executed.invoked);
        assert_eq!(executed.result.unwrap_err().to_string(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            *delays.lock(),
            vec![
                (0, Duration::from_millis(100)),
                (1, Duration::from_millis(200)),
                (2, Duration::from_millis(400)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn programming_errors_are_not_retried() {
        let shared = Shared::new(Arc::new(StaticProbe::new(true)));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let action: Action<()> = Action::sync(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ProgrammingError::InvalidConfig { message: "bad".into() }.into())
        });
        let retry = retry(RetryConfig::unlimited());

        let error = execute(&shared, &Key::from("k"), &action, &retry, None)
            .await
            .result
            .unwrap_err();
        assert!(error.is_programming());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_attempts_use_connectivity_cap() {
        let shared = Shared::new(Arc::new(StaticProbe::new(false)));
        let calls = Arc::new(AtomicU32::new(0));
        let offline_hits = Arc::new(AtomicU32::new(0));
        let hits = Arc::clone(&offline_hits);
        let check = Policies::new()
            .check_internet(
                CheckInternetConfig::default()
                    .with_max_retry_delay(Duration::from_millis(50))
                    .with_dialog(false)
                    .with_on_no_internet(move |_| {
                        hits.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .resolve(&Key::from("k"))
            .check_internet
            .unwrap();
        let retry = retry(
            RetryConfig::default()
                .with_max_retries(2)
                .with_initial_delay(Duration::from_millis(100)),
        );

        let start = Instant::now();
        let executed =
            execute(&shared, &Key::from("k"), &failing(&calls), &retry, Some(&check)).await;
        assert!(!executed.invoked);
        let error = executed.result.unwrap_err();
        assert!(error.as_user().is_some_and(UserException::is_no_connectivity));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(offline_hits.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }
}
