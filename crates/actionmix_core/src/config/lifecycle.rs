//! Lifecycle hooks and the per-call config bundle.

use super::{
    CheckInternetConfig, DebounceConfig, FreshConfig, Layer, NonReentrantConfig, Policies,
    RetryConfig, SequentialConfig, ThrottleConfig,
};
use crate::action::Action;
use crate::error::{ActionError, MixResult};
use std::fmt;
use std::sync::Arc;

type BeforeFn = Arc<dyn Fn() -> MixResult<()> + Send + Sync>;
type AfterFn = Arc<dyn Fn() -> MixResult<()> + Send + Sync>;
type WrapRunFn<T> = Arc<dyn Fn(Action<T>) -> Action<T> + Send + Sync>;
type CatchErrorFn = Arc<dyn Fn(ActionError) -> Option<ActionError> + Send + Sync>;

/// Hooks around the execution of an action.
///
/// Nesting: `before` → `wrap_run(action)` (inside any retry loop) →
/// `catch_error` on failure → `after`, which always runs.
pub struct Lifecycle<T> {
    pub(crate) before: Option<BeforeFn>,
    pub(crate) wrap_run: Option<WrapRunFn<T>>,
    pub(crate) after: Option<AfterFn>,
    pub(crate) catch_error: Option<CatchErrorFn>,
}

impl<T> Default for Lifecycle<T> {
    fn default() -> Self {
        Self {
            before: None,
            wrap_run: None,
            after: None,
            catch_error: None,
        }
    }
}

impl<T> Clone for Lifecycle<T> {
    fn clone(&self) -> Self {
        Self {
            before: self.before.clone(),
            wrap_run: self.wrap_run.clone(),
            after: self.after.clone(),
            catch_error: self.catch_error.clone(),
        }
    }
}

impl<T> fmt::Debug for Lifecycle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("before", &self.before.is_some())
            .field("wrap_run", &self.wrap_run.is_some())
            .field("after", &self.after.is_some())
            .field("catch_error", &self.catch_error.is_some())
            .finish()
    }
}

impl<T> Lifecycle<T> {
    pub(crate) fn wrap(&self, action: Action<T>) -> Action<T> {
        match &self.wrap_run {
            Some(wrap) => wrap(action),
            None => action,
        }
    }

    pub(crate) fn run_before(&self) -> MixResult<()> {
        match &self.before {
            Some(before) => before(),
            None => Ok(()),
        }
    }

    pub(crate) fn run_after(&self) -> MixResult<()> {
        match &self.after {
            Some(after) => after(),
            None => Ok(()),
        }
    }

    /// `None` means the error was suppressed.
    pub(crate) fn catch(&self, error: ActionError) -> Option<ActionError> {
        match &self.catch_error {
            Some(catch) => catch(error),
            None => Some(error),
        }
    }
}

/// Everything a single dispatch can be configured with.
///
/// # Example
///
/// ```
/// use actionmix_core::{MixConfig, ThrottleConfig, RetryConfig};
/// use std::time::Duration;
///
/// let config: MixConfig<u32> = MixConfig::new()
///     .throttle(ThrottleConfig::default().with_duration(Duration::from_secs(2)))
///     .retry(RetryConfig::default().with_max_retries(5))
///     .after(|| Ok(()));
/// ```
pub struct MixConfig<T> {
    pub(crate) preset: Option<Policies>,
    pub(crate) policies: Policies,
    pub(crate) lifecycle: Lifecycle<T>,
}

impl<T> Default for MixConfig<T> {
    fn default() -> Self {
        Self {
            preset: None,
            policies: Policies::default(),
            lifecycle: Lifecycle::default(),
        }
    }
}

impl<T> Clone for MixConfig<T> {
    fn clone(&self) -> Self {
        Self {
            preset: self.preset.clone(),
            policies: self.policies.clone(),
            lifecycle: self.lifecycle.clone(),
        }
    }
}

impl<T> fmt::Debug for MixConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixConfig")
            .field("preset", &self.preset)
            .field("policies", &self.policies)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

impl<T> MixConfig<T> {
    /// Creates an empty config: no policy, no hook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a config from explicit policies.
    pub fn from_policies(policies: Policies) -> Self {
        Self {
            policies,
            ..Self::default()
        }
    }

    /// Sets the preset layer that sits between library defaults and the
    /// explicit policies.
    pub fn preset(mut self, preset: Policies) -> Self {
        self.preset = Some(preset);
        self
    }

    /// Enables debounce.
    pub fn debounce(mut self, config: DebounceConfig) -> Self {
        self.policies.debounce = Some(config);
        self
    }

    /// Enables check-internet.
    pub fn check_internet(mut self, config: CheckInternetConfig) -> Self {
        self.policies.check_internet = Some(config);
        self
    }

    /// Enables non-reentrant.
    pub fn non_reentrant(mut self, config: NonReentrantConfig) -> Self {
        self.policies.non_reentrant = Some(config);
        self
    }

    /// Enables throttle.
    pub fn throttle(mut self, config: ThrottleConfig) -> Self {
        self.policies.throttle = Some(config);
        self
    }

    /// Enables fresh.
    pub fn fresh(mut self, config: FreshConfig) -> Self {
        self.policies.fresh = Some(config);
        self
    }

    /// Enables sequential.
    pub fn sequential(mut self, config: SequentialConfig) -> Self {
        self.policies.sequential = Some(config);
        self
    }

    /// Enables retry.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.policies.retry = Some(config);
        self
    }

    /// Sets the `before` hook. An error skips the action; `after` still runs.
    pub fn before(mut self, f: impl Fn() -> MixResult<()> + Send + Sync + 'static) -> Self {
        self.lifecycle.before = Some(Arc::new(f));
        self
    }

    /// Sets the `after` hook. Runs on every completed execution; an error it
    /// returns supersedes the action's outcome.
    pub fn after(mut self, f: impl Fn() -> MixResult<()> + Send + Sync + 'static) -> Self {
        self.lifecycle.after = Some(Arc::new(f));
        self
    }

    /// Sets the `wrap_run` hook, which maps the action before execution.
    pub fn wrap_run(mut self, f: impl Fn(Action<T>) -> Action<T> + Send + Sync + 'static) -> Self {
        self.lifecycle.wrap_run = Some(Arc::new(f));
        self
    }

    /// Sets the `catch_error` hook. Return `None` to suppress the error,
    /// `Some(e)` to propagate `e` (the same or a replacement).
    pub fn catch_error(
        mut self,
        f: impl Fn(ActionError) -> Option<ActionError> + Send + Sync + 'static,
    ) -> Self {
        self.lifecycle.catch_error = Some(Arc::new(f));
        self
    }

    /// Merges preset and explicit policies (explicit wins field by field).
    pub fn effective_policies(&self) -> Policies {
        self.preset
            .clone()
            .unwrap_or_default()
            .layer(self.policies.clone())
    }

    pub(crate) fn into_parts(self) -> (Policies, Lifecycle<T>) {
        let policies = self.preset.unwrap_or_default().layer(self.policies);
        (policies, self.lifecycle)
    }
}
