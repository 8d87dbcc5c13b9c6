//! Per-policy configs and their resolved forms.

use super::{Hook, Layer, Limit};
use crate::action::DropReason;
use crate::error::ActionError;
use crate::key::Key;
use std::sync::Arc;
use std::time::Duration;

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(333);
/// Default throttle window.
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(1);
/// Default freshness window.
pub const DEFAULT_FRESH_FOR: Duration = Duration::from_secs(1);
/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(350);
/// Default backoff multiplier.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Default cap on any backoff delay caused by an action failure.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);
/// Default cap on any backoff delay caused by missing connectivity.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Called with the lock key and the time left when a throttle vetoes.
pub type OnThrottled = Hook<dyn Fn(&Key, Duration) + Send + Sync>;
/// Called before sleeping with the failed attempt, the delay and the error.
pub type OnRetry = Hook<dyn Fn(u32, Duration, &ActionError) + Send + Sync>;
/// Called with the lock key and queue position when a call is queued.
pub type OnQueued = Hook<dyn Fn(&Key, usize) + Send + Sync>;
/// Called with the lock key and the reason for every drop.
pub type OnDropped = Hook<dyn Fn(&Key, DropReason) + Send + Sync>;
/// Called once with the dispatch key when connectivity ultimately fails.
pub type OnNoInternet = Hook<dyn Fn(&Key) + Send + Sync>;

/// Debounce: only the last call within the window runs.
#[derive(Debug, Clone, Default)]
pub struct DebounceConfig {
    /// Lock key; defaults to the dispatch key.
    pub lock: Option<Key>,
    /// Quiet period after the last call.
    pub duration: Option<Duration>,
}

layered!(DebounceConfig { lock, duration });

impl DebounceConfig {
    /// Sets the lock key.
    pub fn with_lock(mut self, lock: impl Into<Key>) -> Self {
        self.lock = Some(lock.into());
        self
    }

    /// Sets the quiet period.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    fn resolve(self, key: &Key) -> ResolvedDebounce {
        ResolvedDebounce {
            lock: self.lock.unwrap_or_else(|| key.clone()),
            duration: self.duration.unwrap_or(DEFAULT_DEBOUNCE),
        }
    }
}

/// Check-internet: gate on connectivity before running.
#[derive(Debug, Clone, Default)]
pub struct CheckInternetConfig {
    /// Resolve to a no-op instead of raising, with a single upfront check.
    pub abort_silently: Option<bool>,
    /// Queue the connectivity exception (`true`) or return it (`false`).
    pub if_open_dialog: Option<bool>,
    /// Backoff cap for connectivity failures inside a retry loop.
    pub max_retry_delay: Option<Duration>,
    /// Fired once when connectivity ultimately fails.
    pub on_no_internet: Option<OnNoInternet>,
}

layered!(CheckInternetConfig {
    abort_silently,
    if_open_dialog,
    max_retry_delay,
    on_no_internet,
});

impl CheckInternetConfig {
    /// Sets silent abort.
    pub fn with_abort_silently(mut self, abort_silently: bool) -> Self {
        self.abort_silently = Some(abort_silently);
        self
    }

    /// Sets whether the connectivity exception is queued for display.
    pub fn with_dialog(mut self, if_open_dialog: bool) -> Self {
        self.if_open_dialog = Some(if_open_dialog);
        self
    }

    /// Sets the backoff cap used for connectivity failures.
    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    /// Sets the no-internet hook.
    pub fn with_on_no_internet(mut self, f: impl Fn(&Key) + Send + Sync + 'static) -> Self {
        self.on_no_internet = Some(Hook(Arc::new(f)));
        self
    }

    fn resolve(self) -> ResolvedCheckInternet {
        ResolvedCheckInternet {
            abort_silently: self.abort_silently.unwrap_or(false),
            if_open_dialog: self.if_open_dialog.unwrap_or(true),
            max_retry_delay: self.max_retry_delay.unwrap_or(DEFAULT_MAX_RETRY_DELAY),
            on_no_internet: self.on_no_internet,
        }
    }
}

/// Non-reentrant: abort while another call with the same lock is active.
#[derive(Debug, Clone, Default)]
pub struct NonReentrantConfig {
    /// Lock key; defaults to the dispatch key.
    pub lock: Option<Key>,
}

layered!(NonReentrantConfig { lock });

impl NonReentrantConfig {
    /// Sets the lock key.
    pub fn with_lock(mut self, lock: impl Into<Key>) -> Self {
        self.lock = Some(lock.into());
        self
    }
}

/// Throttle: run at most once per window.
#[derive(Debug, Clone, Default)]
pub struct ThrottleConfig {
    /// Lock key; defaults to the dispatch key.
    pub lock: Option<Key>,
    /// Window length.
    pub duration: Option<Duration>,
    /// Skip the check but still refresh the window.
    pub ignore_throttle: Option<bool>,
    /// Clear the window when the action fails.
    pub remove_lock_on_error: Option<bool>,
    /// Fired on every veto.
    pub on_throttled: Option<OnThrottled>,
}

layered!(ThrottleConfig {
    lock,
    duration,
    ignore_throttle,
    remove_lock_on_error,
    on_throttled,
});

impl ThrottleConfig {
    /// Sets the lock key.
    pub fn with_lock(mut self, lock: impl Into<Key>) -> Self {
        self.lock = Some(lock.into());
        self
    }

    /// Sets the window length.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Sets whether the check is skipped.
    pub fn with_ignore_throttle(mut self, ignore: bool) -> Self {
        self.ignore_throttle = Some(ignore);
        self
    }

    /// Sets whether a failure clears the window.
    pub fn with_remove_lock_on_error(mut self, remove: bool) -> Self {
        self.remove_lock_on_error = Some(remove);
        self
    }

    /// Sets the veto hook.
    pub fn with_on_throttled(mut self, f: impl Fn(&Key, Duration) + Send + Sync + 'static) -> Self {
        self.on_throttled = Some(Hook(Arc::new(f)));
        self
    }

    fn resolve(self, key: &Key) -> ResolvedThrottle {
        ResolvedThrottle {
            lock: self.lock.unwrap_or_else(|| key.clone()),
            duration: self.duration.unwrap_or(DEFAULT_THROTTLE),
            ignore_throttle: self.ignore_throttle.unwrap_or(false),
            remove_lock_on_error: self.remove_lock_on_error.unwrap_or(false),
            on_throttled: self.on_throttled,
        }
    }
}

/// Fresh: skip while the last successful result is still fresh.
#[derive(Debug, Clone, Default)]
pub struct FreshConfig {
    /// Lock key; defaults to the dispatch key.
    pub lock: Option<Key>,
    /// How long a result stays fresh.
    pub fresh_for: Option<Duration>,
    /// Skip the check but still refresh the window.
    pub ignore_fresh: Option<bool>,
}

layered!(FreshConfig {
    lock,
    fresh_for,
    ignore_fresh,
});

impl FreshConfig {
    /// Sets the lock key.
    pub fn with_lock(mut self, lock: impl Into<Key>) -> Self {
        self.lock = Some(lock.into());
        self
    }

    /// Sets the freshness window.
    pub fn with_fresh_for(mut self, fresh_for: Duration) -> Self {
        self.fresh_for = Some(fresh_for);
        self
    }

    /// Sets whether the check is skipped.
    pub fn with_ignore_fresh(mut self, ignore: bool) -> Self {
        self.ignore_fresh = Some(ignore);
        self
    }

    fn resolve(self, key: &Key) -> ResolvedFresh {
        ResolvedFresh {
            lock: self.lock.unwrap_or_else(|| key.clone()),
            fresh_for: self.fresh_for.unwrap_or(DEFAULT_FRESH_FOR),
            ignore_fresh: self.ignore_fresh.unwrap_or(false),
        }
    }
}

/// Sequential: run calls sharing a lock one at a time, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct SequentialConfig {
    /// Lock key; defaults to the dispatch key.
    pub lock: Option<Key>,
    /// Maximum number of waiters (the running call is not counted).
    pub max_queue_size: Option<Limit>,
    /// When full, evict the oldest waiter instead of rejecting the arrival.
    pub drop_oldest: Option<bool>,
    /// Drop waiters that waited longer than this when their turn comes.
    pub queue_timeout: Option<Duration>,
    /// Fired when a call is queued rather than started.
    pub on_queued: Option<OnQueued>,
    /// Fired for every drop.
    pub on_dropped: Option<OnDropped>,
}

layered!(SequentialConfig {
    lock,
    max_queue_size,
    drop_oldest,
    queue_timeout,
    on_queued,
    on_dropped,
});

impl SequentialConfig {
    /// Only the most recent pending call survives.
    pub fn latest_wins() -> Self {
        Self::default()
            .with_max_queue_size(1)
            .with_drop_oldest(true)
    }

    /// Sets the lock key.
    pub fn with_lock(mut self, lock: impl Into<Key>) -> Self {
        self.lock = Some(lock.into());
        self
    }

    /// Bounds the number of waiters.
    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = Some(Limit::AtMost(max));
        self
    }

    /// Removes any bound on the number of waiters.
    pub fn unbounded(mut self) -> Self {
        self.max_queue_size = Some(Limit::Unbounded);
        self
    }

    /// Sets the eviction mode.
    pub fn with_drop_oldest(mut self, drop_oldest: bool) -> Self {
        self.drop_oldest = Some(drop_oldest);
        self
    }

    /// Sets the per-waiter timeout.
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = Some(timeout);
        self
    }

    /// Sets the queued hook, called with the lock key and the call's
    /// position.
    ///
    /// Positions count the calls queued under the lock since it was last
    /// idle, starting at 1. They are never renumbered: waiters that start
    /// running, time out or are evicted keep their slot in the count, so
    /// the position is the depth the queue had reached when the call joined.
    pub fn with_on_queued(mut self, f: impl Fn(&Key, usize) + Send + Sync + 'static) -> Self {
        self.on_queued = Some(Hook(Arc::new(f)));
        self
    }

    /// Sets the dropped hook.
    pub fn with_on_dropped(
        mut self,
        f: impl Fn(&Key, DropReason) + Send + Sync + 'static,
    ) -> Self {
        self.on_dropped = Some(Hook(Arc::new(f)));
        self
    }

    fn resolve(self, key: &Key) -> ResolvedSequential {
        ResolvedSequential {
            lock: self.lock.unwrap_or_else(|| key.clone()),
            max_queue_size: self.max_queue_size.unwrap_or(Limit::Unbounded),
            drop_oldest: self.drop_oldest.unwrap_or(false),
            queue_timeout: self.queue_timeout,
            on_queued: self.on_queued,
            on_dropped: self.on_dropped,
        }
    }
}

/// Retry with exponential backoff.
#[derive(Debug, Clone, Default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: Option<Limit>,
    /// Delay before the first retry.
    pub initial_delay: Option<Duration>,
    /// Growth factor per attempt.
    pub multiplier: Option<f64>,
    /// Cap on delays caused by action failures.
    pub max_delay: Option<Duration>,
    /// Fired before every backoff sleep.
    pub on_retry: Option<OnRetry>,
}

layered!(RetryConfig {
    max_retries,
    initial_delay,
    multiplier,
    max_delay,
    on_retry,
});

impl RetryConfig {
    /// Retries forever.
    pub fn unlimited() -> Self {
        Self {
            max_retries: Some(Limit::Unbounded),
            ..Self::default()
        }
    }

    /// Sets the number of retries.
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(Limit::AtMost(retries));
        self
    }

    /// Sets the first delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Sets the delay cap for action failures.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Sets the retry hook.
    pub fn with_on_retry(
        mut self,
        f: impl Fn(u32, Duration, &ActionError) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Hook(Arc::new(f)));
        self
    }

    fn resolve(self) -> ResolvedRetry {
        ResolvedRetry {
            max_retries: self.max_retries.unwrap_or(Limit::AtMost(DEFAULT_MAX_RETRIES)),
            initial_delay: self.initial_delay.unwrap_or(DEFAULT_INITIAL_DELAY),
            multiplier: self.multiplier.unwrap_or(DEFAULT_MULTIPLIER),
            max_delay: self.max_delay.unwrap_or(DEFAULT_MAX_DELAY),
            on_retry: self.on_retry,
        }
    }
}

/// The full policy bundle of a dispatch; also used as a preset.
///
/// A policy is active when its slot is `Some`.
#[derive(Debug, Clone, Default)]
pub struct Policies {
    /// Debounce.
    pub debounce: Option<DebounceConfig>,
    /// Check-internet.
    pub check_internet: Option<CheckInternetConfig>,
    /// Non-reentrant.
    pub non_reentrant: Option<NonReentrantConfig>,
    /// Throttle.
    pub throttle: Option<ThrottleConfig>,
    /// Fresh.
    pub fresh: Option<FreshConfig>,
    /// Sequential.
    pub sequential: Option<SequentialConfig>,
    /// Retry.
    pub retry: Option<RetryConfig>,
}

impl Layer for Policies {
    fn layer(self, overlay: Self) -> Self {
        Self {
            debounce: self.debounce.layer(overlay.debounce),
            check_internet: self.check_internet.layer(overlay.check_internet),
            non_reentrant: self.non_reentrant.layer(overlay.non_reentrant),
            throttle: self.throttle.layer(overlay.throttle),
            fresh: self.fresh.layer(overlay.fresh),
            sequential: self.sequential.layer(overlay.sequential),
            retry: self.retry.layer(overlay.retry),
        }
    }
}

impl Policies {
    /// Creates an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables debounce.
    pub fn debounce(mut self, config: DebounceConfig) -> Self {
        self.debounce = Some(config);
        self
    }

    /// Enables check-internet.
    pub fn check_internet(mut self, config: CheckInternetConfig) -> Self {
        self.check_internet = Some(config);
        self
    }

    /// Enables non-reentrant.
    pub fn non_reentrant(mut self, config: NonReentrantConfig) -> Self {
        self.non_reentrant = Some(config);
        self
    }

    /// Enables throttle.
    pub fn throttle(mut self, config: ThrottleConfig) -> Self {
        self.throttle = Some(config);
        self
    }

    /// Enables fresh.
    pub fn fresh(mut self, config: FreshConfig) -> Self {
        self.fresh = Some(config);
        self
    }

    /// Enables sequential.
    pub fn sequential(mut self, config: SequentialConfig) -> Self {
        self.sequential = Some(config);
        self
    }

    /// Enables retry.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Fills every unset field of every active policy from the library
    /// defaults.
    pub fn resolve(self, key: &Key) -> ResolvedPolicies {
        ResolvedPolicies {
            debounce: self.debounce.map(|c| c.resolve(key)),
            check_internet: self.check_internet.map(CheckInternetConfig::resolve),
            non_reentrant: self.non_reentrant.map(|c| ResolvedNonReentrant {
                lock: c.lock.unwrap_or_else(|| key.clone()),
            }),
            throttle: self.throttle.map(|c| c.resolve(key)),
            fresh: self.fresh.map(|c| c.resolve(key)),
            sequential: self.sequential.map(|c| c.resolve(key)),
            retry: self.retry.map(RetryConfig::resolve),
        }
    }
}

/// Resolved debounce.
#[derive(Debug, Clone)]
pub struct ResolvedDebounce {
    /// Lock key.
    pub lock: Key,
    /// Quiet period.
    pub duration: Duration,
}

/// Resolved check-internet.
#[derive(Debug, Clone)]
pub struct ResolvedCheckInternet {
    /// Silent abort.
    pub abort_silently: bool,
    /// Queue instead of return.
    pub if_open_dialog: bool,
    /// Connectivity backoff cap.
    pub max_retry_delay: Duration,
    /// No-internet hook.
    pub on_no_internet: Option<OnNoInternet>,
}

/// Resolved non-reentrant.
#[derive(Debug, Clone)]
pub struct ResolvedNonReentrant {
    /// Lock key.
    pub lock: Key,
}

/// Resolved throttle.
#[derive(Debug, Clone)]
pub struct ResolvedThrottle {
    /// Lock key.
    pub lock: Key,
    /// Window length.
    pub duration: Duration,
    /// Skip the check.
    pub ignore_throttle: bool,
    /// Clear on failure.
    pub remove_lock_on_error: bool,
    /// Veto hook.
    pub on_throttled: Option<OnThrottled>,
}

/// Resolved fresh.
#[derive(Debug, Clone)]
pub struct ResolvedFresh {
    /// Lock key.
    pub lock: Key,
    /// Freshness window.
    pub fresh_for: Duration,
    /// Skip the check.
    pub ignore_fresh: bool,
}

/// Resolved sequential.
#[derive(Debug, Clone)]
pub struct ResolvedSequential {
    /// Lock key.
    pub lock: Key,
    /// Waiter bound.
    pub max_queue_size: Limit,
    /// Eviction mode.
    pub drop_oldest: bool,
    /// Per-waiter timeout.
    pub queue_timeout: Option<Duration>,
    /// Queued hook.
    pub on_queued: Option<OnQueued>,
    /// Dropped hook.
    pub on_dropped: Option<OnDropped>,
}

/// Resolved retry.
#[derive(Debug, Clone)]
pub struct ResolvedRetry {
    /// Retries after the first attempt.
    pub max_retries: Limit,
    /// First delay.
    pub initial_delay: Duration,
    /// Growth factor.
    pub multiplier: f64,
    /// Cap for action failures.
    pub max_delay: Duration,
    /// Retry hook.
    pub on_retry: Option<OnRetry>,
}

impl ResolvedRetry {
    /// Backoff before retrying after failed attempt `attempt` (0-based):
    /// `min(cap, initial_delay * multiplier^attempt)`.
    pub fn delay_for(&self, attempt: u32, cap: Duration) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos < 0.0 || nanos >= cap.as_nanos() as f64 {
            return cap;
        }
        Duration::from_nanos(nanos.round() as u64).min(cap)
    }
}

/// Every active policy of one dispatch, fully populated.
#[derive(Debug, Clone, Default)]
pub struct ResolvedPolicies {
    /// Debounce.
    pub debounce: Option<ResolvedDebounce>,
    /// Check-internet.
    pub check_internet: Option<ResolvedCheckInternet>,
    /// Non-reentrant.
    pub non_reentrant: Option<ResolvedNonReentrant>,
    /// Throttle.
    pub throttle: Option<ResolvedThrottle>,
    /// Fresh.
    pub fresh: Option<ResolvedFresh>,
    /// Sequential.
    pub sequential: Option<ResolvedSequential>,
    /// Retry.
    pub retry: Option<ResolvedRetry>,
}

impl ResolvedPolicies {
    /// True when connectivity is re-checked inside the retry loop.
    pub fn connectivity_in_retry(&self) -> bool {
        self.retry.is_some()
            && self
                .check_internet
                .as_ref()
                .is_some_and(|c| !c.abort_silently)
    }

    /// The check-internet policy when it runs once, before any lock.
    pub fn upfront_connectivity(&self) -> Option<&ResolvedCheckInternet> {
        if self.connectivity_in_retry() {
            None
        } else {
            self.check_internet.as_ref()
        }
    }
}
