//! The dispatch context and orchestrator.
//!
//! A [`Mixer`] owns the process-wide policy state. [`Mixer::dispatch`]
//! resolves the effective policies of one call and walks them in a fixed
//! order; every step up to the first suspension point runs synchronously
//! inside `dispatch`, so two calls dispatched back to back are ordered by
//! dispatch order, not by when their futures are first polled.

use crate::action::{Action, Dispatched, NoOpReason, Outcome};
use crate::config::{Lifecycle, MixConfig, ResolvedCheckInternet, ResolvedPolicies};
use crate::error::{ActionError, MixResult, UserException};
use crate::error_queue::ErrorQueue;
use crate::key::Key;
use crate::policy::connectivity::{self, ConnectivityProbe, TcpProbe};
use crate::policy::debounce::DebounceTicket;
use crate::policy::non_reentrant::KeyLock;
use crate::policy::sequential::{self, Enqueued, SequentialTurn};
use crate::policy::throttle::ExpiryGuard;
use crate::policy::{retry, run_deferred, Deferred};
use crate::session::{Disposable, Prop, Session, Shared};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;

/// Receives every error a dispatch returns as `Err`, with its key.
pub type ErrorHandler = Arc<dyn Fn(&Key, &ActionError) + Send + Sync>;

/// Receives a [`MixEvent`] for every executed action.
pub type Observer = Arc<dyn Fn(&MixEvent) + Send + Sync>;

/// What the global observer sees.
#[derive(Debug, Clone)]
pub enum MixEvent {
    /// An action passed every gate and is about to run.
    Started {
        /// The dispatch key.
        key: Key,
    },
    /// An action finished, after its lifecycle hooks.
    Completed {
        /// The dispatch key.
        key: Key,
        /// The error the dispatch settled with, if any.
        error: Option<ActionError>,
        /// Time from start to completion.
        duration: Duration,
    },
}

/// App-level wiring that survives [`Mixer::clear`].
#[derive(Default)]
pub(crate) struct Settings {
    error_handler: Option<ErrorHandler>,
    observer: Option<Observer>,
}

/// Parameters of [`Mixer::clear`].
#[derive(Debug, Clone, Default)]
pub struct ClearOptions {
    /// Simulated connectivity for the new session; `None` asks the probe.
    pub force_connectivity: Option<bool>,
    /// New error-queue capacity; `None` keeps the current one.
    pub max_errors_queued: Option<usize>,
}

impl ClearOptions {
    /// Simulates connectivity in the new session.
    pub fn with_force_connectivity(mut self, online: bool) -> Self {
        self.force_connectivity = Some(online);
        self
    }

    /// Changes the error-queue capacity.
    pub fn with_max_errors_queued(mut self, max: usize) -> Self {
        self.max_errors_queued = Some(max);
        self
    }
}

/// Parameters of [`Mixer::prepare_to_logout`].
#[derive(Debug, Clone, Default)]
pub struct LogoutOptions {
    /// Wait before the first wipe.
    pub delay_before: Duration,
    /// Wait between the first and the second wipe.
    pub delay_after: Duration,
    /// Options for both wipes.
    pub clear: ClearOptions,
}

impl LogoutOptions {
    /// Sets the delay before the first wipe.
    pub fn with_delay_before(mut self, delay: Duration) -> Self {
        self.delay_before = delay;
        self
    }

    /// Sets the delay before the second wipe.
    pub fn with_delay_after(mut self, delay: Duration) -> Self {
        self.delay_after = delay;
        self
    }

    /// Sets the clear options.
    pub fn with_clear(mut self, clear: ClearOptions) -> Self {
        self.clear = clear;
        self
    }
}

/// The dispatch context.
///
/// Cheap to clone; clones share state. Use [`Mixer::global`] for the
/// process-wide instance or [`Mixer::new`] for an isolated one.
///
/// # Example
///
/// ```
/// use actionmix_core::{Action, Dispatched, MixConfig, Mixer, NonReentrantConfig};
///
/// let mixer = Mixer::new();
/// let outcome = mixer.dispatch(
///     "save",
///     Action::sync(|| Ok(42)),
///     MixConfig::new().non_reentrant(NonReentrantConfig::default()),
/// );
/// // No policy suspended, so the result is already there.
/// assert_eq!(outcome.immediate().unwrap().unwrap(), Dispatched::Value(42));
/// ```
#[derive(Clone)]
pub struct Mixer {
    shared: Arc<Shared>,
}

impl Mixer {
    /// Creates an isolated context probing connectivity over TCP.
    pub fn new() -> Self {
        Self::with_probe(TcpProbe::new())
    }

    /// Creates an isolated context with a custom connectivity probe.
    pub fn with_probe(probe: impl ConnectivityProbe + 'static) -> Self {
        Self {
            shared: Arc::new(Shared::new(Arc::new(probe))),
        }
    }

    /// The process-wide context, created on first use.
    pub fn global() -> &'static Mixer {
        static GLOBAL: OnceLock<Mixer> = OnceLock::new();
        GLOBAL.get_or_init(Mixer::new)
    }

    /// Installs the global error handler.
    pub fn set_error_handler(&self, handler: impl Fn(&Key, &ActionError) + Send + Sync + 'static) {
        self.shared.settings.write().error_handler = Some(Arc::new(handler));
    }

    /// Installs the global observer.
    pub fn set_observer(&self, observer: impl Fn(&MixEvent) + Send + Sync + 'static) {
        self.shared.settings.write().observer = Some(Arc::new(observer));
    }

    /// Replaces the connectivity probe.
    pub fn set_probe(&self, probe: impl ConnectivityProbe + 'static) {
        *self.shared.probe.write() = Arc::new(probe);
    }

    /// Simulates connectivity for the current session (`None` stops).
    pub fn force_connectivity(&self, online: Option<bool>) {
        self.shared.session.lock().forced_connectivity = online;
    }

    /// The error queue.
    pub fn errors(&self) -> &ErrorQueue {
        &self.shared.errors
    }

    /// True while at least one action under `key` is running.
    pub fn is_waiting(&self, key: &Key) -> bool {
        self.shared.session.lock().waiting.contains_key(key)
    }

    /// True if the last action under `key` failed with a user exception.
    pub fn is_failed(&self, key: &Key) -> bool {
        self.shared.session.lock().failed.contains_key(key)
    }

    /// The user exception the last action under `key` failed with.
    pub fn exception_for(&self, key: &Key) -> Option<UserException> {
        self.shared.session.lock().failed.get(key).cloned()
    }

    /// Clears the failed flag of `key`.
    pub fn clear_failed(&self, key: &Key) {
        self.shared.session.lock().failed.remove(key);
    }

    /// Marks `key` active in the non-reentrant set, unless it already is.
    pub fn try_acquire_lock(&self, key: impl Into<Key>) -> Option<KeyLock> {
        KeyLock::try_acquire(&self.shared, key.into())
    }

    /// Increments the session counter of `key` and returns the new value.
    pub fn increment_counter(&self, key: &Key) -> u64 {
        let mut session = self.shared.session.lock();
        let counter = session.counters.entry(key.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// The session counter of `key` (0 if never set).
    pub fn counter(&self, key: &Key) -> u64 {
        self.shared
            .session
            .lock()
            .counters
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Sets the session counter of `key`.
    pub fn set_counter(&self, key: &Key, value: u64) {
        self.shared.session.lock().counters.insert(key.clone(), value);
    }

    /// Stores a session-scoped value under `key`.
    pub fn set_prop<V: Any + Send + Sync>(&self, key: impl Into<Key>, value: V) {
        let replaced = self
            .shared
            .session
            .lock()
            .props
            .insert(key.into(), Prop::Value(Arc::new(value)));
        drop(replaced);
    }

    /// Reads a session-scoped value, if one of type `V` is stored.
    pub fn prop<V: Any + Send + Sync>(&self, key: &Key) -> Option<Arc<V>> {
        let prop = self.shared.session.lock().props.get(key).cloned();
        match prop {
            Some(Prop::Value(value)) => value.downcast::<V>().ok(),
            _ => None,
        }
    }

    /// Removes a prop. A tracked disposable is disposed.
    pub fn remove_prop(&self, key: &Key) -> bool {
        let removed = self.shared.session.lock().props.remove(key);
        match removed {
            Some(Prop::Disposable(resource)) => {
                resource.dispose();
                true
            }
            Some(Prop::Value(_)) => true,
            None => false,
        }
    }

    /// Tracks a resource to dispose on logout. A resource already tracked
    /// under `key` is disposed.
    pub fn track_disposable(&self, key: impl Into<Key>, resource: impl Disposable + 'static) {
        let replaced = self
            .shared
            .session
            .lock()
            .props
            .insert(key.into(), Prop::Disposable(Arc::new(resource)));
        if let Some(Prop::Disposable(previous)) = replaced {
            previous.dispose();
        }
    }

    /// Wipes all session state: locks, queues, debounce slots, counters,
    /// flags, props and the error queue. The error handler, observer and
    /// probe are kept. Calls waiting in a queue or debounce window resolve
    /// to [`NoOpReason::Cleared`].
    pub fn clear(&self, options: ClearOptions) {
        let (previous, epoch) = {
            let mut session = self.shared.session.lock();
            let epoch = session.epoch + 1;
            let mut next = Session::new(epoch);
            next.forced_connectivity = options.force_connectivity;
            (std::mem::replace(&mut *session, next), epoch)
        };
        self.shared.errors.reset(options.max_errors_queued);
        // Dropped outside the lock: waking cleared waiters may re-enter.
        drop(previous);
        tracing::info!(epoch, "session cleared");
    }

    /// Prepares for a user switch: waits, disposes tracked resources,
    /// clears, waits again and clears again to catch work that was still
    /// settling.
    pub async fn prepare_to_logout(&self, options: LogoutOptions) {
        tracing::info!(
            delay_before_ms = options.delay_before.as_millis() as u64,
            delay_after_ms = options.delay_after.as_millis() as u64,
            "preparing to logout"
        );
        if !options.delay_before.is_zero() {
            tokio::time::sleep(options.delay_before).await;
        }
        self.dispose_tracked();
        self.clear(options.clear.clone());
        if !options.delay_after.is_zero() {
            tokio::time::sleep(options.delay_after).await;
        }
        self.dispose_tracked();
        self.clear(options.clear);
    }

    fn dispose_tracked(&self) {
        let resources: Vec<Arc<dyn Disposable>> = self
            .shared
            .session
            .lock()
            .props
            .values()
            .filter_map(|prop| match prop {
                Prop::Disposable(resource) => Some(Arc::clone(resource)),
                Prop::Value(_) => None,
            })
            .collect();
        tracing::debug!(count = resources.len(), "disposing tracked resources");
        for resource in resources {
            resource.dispose();
        }
    }

    /// Starts run tracking for `key`: sets the waiting flag, clears the
    /// failed flag and notifies the observer.
    pub fn begin_run(&self, key: &Key) -> RunTracker {
        RunTracker::begin(&self.shared, key.clone())
    }

    /// Routes an error that is leaving a dispatch: a user exception sets the
    /// failed flag and is queued when it asks for a dialog; everything else
    /// reaches the error handler and is returned.
    pub fn route_error<T>(&self, key: &Key, error: ActionError) -> MixResult<Dispatched<T>> {
        route_error(&self.shared, key, error)
    }

    /// Dispatches `action` under `key`.
    ///
    /// Policies run in this order: debounce, check-internet, non-reentrant,
    /// throttle, fresh, sequential, then the action inside its lifecycle
    /// hooks (and the retry loop, if configured). A vetoed call resolves to
    /// [`Dispatched::NoOp`].
    ///
    /// The result is [`Outcome::Immediate`] when nothing needed to suspend.
    pub fn dispatch<T: Send + 'static>(
        &self,
        key: impl Into<Key>,
        action: Action<T>,
        config: MixConfig<T>,
    ) -> Outcome<T> {
        let key = key.into();
        let (policies, lifecycle) = config.into_parts();
        let policies = policies.resolve(&key);
        let action = lifecycle.wrap(action);
        tracing::trace!(key = %key, "dispatch");
        let plan = Arc::new(Plan {
            shared: Arc::clone(&self.shared),
            key,
            policies,
            lifecycle,
            action,
        });

        let ticket = plan
            .policies
            .debounce
            .as_ref()
            .map(|debounce| DebounceTicket::register(&plan.shared, debounce));
        match ticket {
            Some(ticket) => {
                Outcome::pending(async move {
                    if let Err(reason) = ticket.wait().await {
                        tracing::debug!(key = %plan.key, reason = ?reason, "debounced");
                        return Ok(Dispatched::NoOp(reason));
                    }
                    plan.check_connectivity().await
                })
            }
            None => plan.check_connectivity(),
        }
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.shared.session.lock();
        f.debug_struct("Mixer")
            .field("epoch", &session.epoch)
            .field("empty", &session.is_empty())
            .field("errors", &self.shared.errors)
            .finish()
    }
}

fn report(shared: &Shared, key: &Key, error: &ActionError) {
    let handler = shared.settings.read().error_handler.clone();
    if let Some(handler) = handler {
        handler(key, error);
    }
}

fn route_error<T>(shared: &Shared, key: &Key, error: ActionError) -> MixResult<Dispatched<T>> {
    match error {
        ActionError::User(exception) => {
            shared
                .session
                .lock()
                .failed
                .insert(key.clone(), exception.clone());
            if exception.if_open_dialog {
                tracing::debug!(key = %key, message = %exception, "user exception queued");
                shared.errors.push(exception);
                Ok(Dispatched::NoOp(NoOpReason::ErrorQueued))
            } else {
                let error = ActionError::User(exception);
                report(shared, key, &error);
                Err(error)
            }
        }
        error => {
            if error.is_programming() {
                tracing::warn!(key = %key, error = %error, "programming error");
            }
            report(shared, key, &error);
            Err(error)
        }
    }
}

/// Tracks one running action for the waiting flag and the observer.
///
/// The waiting flag is released on drop, so it also clears when the
/// dispatch future is dropped mid-flight.
pub struct RunTracker {
    shared: Arc<Shared>,
    key: Key,
    epoch: u64,
    started: Instant,
}

impl RunTracker {
    fn begin(shared: &Arc<Shared>, key: Key) -> Self {
        let epoch = {
            let mut session = shared.session.lock();
            *session.waiting.entry(key.clone()).or_insert(0) += 1;
            session.failed.remove(&key);
            session.epoch
        };
        let observer = shared.settings.read().observer.clone();
        if let Some(observer) = observer {
            observer(&MixEvent::Started { key: key.clone() });
        }
        Self {
            shared: Arc::clone(shared),
            key,
            epoch,
            started: Instant::now(),
        }
    }

    /// Reports completion to the observer.
    pub fn finish(&self, error: Option<&ActionError>) {
        let observer = self.shared.settings.read().observer.clone();
        if let Some(observer) = observer {
            observer(&MixEvent::Completed {
                key: self.key.clone(),
                error: error.cloned(),
                duration: self.started.elapsed(),
            });
        }
    }
}

impl Drop for RunTracker {
    fn drop(&mut self) {
        let key = &self.key;
        self.shared.with_epoch(self.epoch, |session| {
            if let Some(count) = session.waiting.get_mut(key) {
                *count -= 1;
                if *count == 0 {
                    session.waiting.remove(key);
                }
            }
        });
    }
}

impl fmt::Debug for RunTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunTracker").field("key", &self.key).finish()
    }
}

/// Everything one dispatch holds while it passes the gates and runs.
///
/// Field order is release order: the non-reentrant lock goes first, the
/// sequential turn last.
#[derive(Default)]
struct Gates {
    lock: Option<KeyLock>,
    throttle: Option<ExpiryGuard>,
    fresh: Option<ExpiryGuard>,
    turn: Option<SequentialTurn>,
}

enum Admission {
    Now,
    Queued(sequential::QueuedTicket),
}

impl Gates {
    /// Takes every configured gate in order, stopping at the first veto.
    /// On a veto the partial gates are handed back so they are released
    /// after the session lock.
    fn acquire(
        session: &mut Session,
        shared: &Arc<Shared>,
        key: &Key,
        policies: &ResolvedPolicies,
        now: Instant,
        deferred: &mut Vec<Deferred>,
    ) -> Result<(Gates, Admission), (Gates, NoOpReason)> {
        let mut gates = Gates::default();

        if let Some(non_reentrant) = &policies.non_reentrant {
            match KeyLock::acquire_in(session, shared, non_reentrant.lock.clone()) {
                Some(lock) => gates.lock = Some(lock),
                None => return Err((gates, NoOpReason::NonReentrant)),
            }
        }

        if let Some(throttle) = &policies.throttle {
            match ExpiryGuard::acquire_in(session, shared, throttle.request(), now) {
                Ok(guard) => gates.throttle = Some(guard),
                Err(remaining) => {
                    if let Some(hook) = throttle.on_throttled.clone() {
                        let lock = throttle.lock.clone();
                        deferred.push(Box::new(move || hook(&lock, remaining)));
                    }
                    return Err((gates, NoOpReason::Throttled { remaining }));
                }
            }
        }

        if let Some(fresh) = &policies.fresh {
            match ExpiryGuard::acquire_in(session, shared, fresh.request(), now) {
                Ok(guard) => gates.fresh = Some(guard),
                Err(remaining) => return Err((gates, NoOpReason::Fresh { remaining })),
            }
        }

        let admission = match &policies.sequential {
            None => Admission::Now,
            Some(config) => match sequential::enqueue(session, shared, config, now, deferred) {
                Enqueued::Start(turn) => {
                    gates.turn = Some(turn);
                    Admission::Now
                }
                Enqueued::Queued(ticket) => Admission::Queued(ticket),
                Enqueued::Rejected(reason) => return Err((gates, reason)),
            },
        };
        tracing::trace!(key = %key, "gates acquired");
        Ok((gates, admission))
    }

    fn complete(&mut self, failed: bool) {
        if let Some(throttle) = &mut self.throttle {
            throttle.complete(failed);
        }
        if let Some(fresh) = &mut self.fresh {
            fresh.complete(failed);
        }
    }
}

/// One resolved dispatch.
struct Plan<T> {
    shared: Arc<Shared>,
    key: Key,
    policies: ResolvedPolicies,
    lifecycle: Lifecycle<T>,
    action: Action<T>,
}

impl<T: Send + 'static> Plan<T> {
    /// Upfront connectivity gate (when it is not part of the retry loop).
    fn check_connectivity(self: &Arc<Self>) -> Outcome<T> {
        let Some(check) = self.policies.upfront_connectivity() else {
            return self.pass_gates();
        };
        match connectivity::forced(&self.shared) {
            Some(true) => self.pass_gates(),
            Some(false) => Outcome::Immediate(self.offline(check)),
            None => {
                let plan = Arc::clone(self);
                let check = check.clone();
                Outcome::pending(async move {
                    if connectivity::check(&plan.shared).await {
                        plan.pass_gates().await
                    } else {
                        plan.offline(&check)
                    }
                })
            }
        }
    }

    fn offline(&self, check: &ResolvedCheckInternet) -> MixResult<Dispatched<T>> {
        if let Some(hook) = &check.on_no_internet {
            hook(&self.key);
        }
        if check.abort_silently {
            tracing::debug!(key = %self.key, "no connectivity, aborting silently");
            return Ok(Dispatched::NoOp(NoOpReason::NoConnectivity));
        }
        route_error(
            &self.shared,
            &self.key,
            UserException::no_connectivity(check.if_open_dialog).into(),
        )
    }

    fn pass_gates(self: &Arc<Self>) -> Outcome<T> {
        let mut deferred = Vec::new();
        let acquired = {
            let mut session = self.shared.session.lock();
            Gates::acquire(
                &mut session,
                &self.shared,
                &self.key,
                &self.policies,
                Instant::now(),
                &mut deferred,
            )
        };
        let acquired = acquired.map_err(|(partial, reason)| {
            drop(partial);
            reason
        });
        run_deferred(deferred);

        match acquired {
            Err(reason) => {
                tracing::debug!(key = %self.key, reason = ?reason, "dispatch vetoed");
                Outcome::no_op(reason)
            }
            Ok((gates, Admission::Now)) => self.execute(gates),
            Ok((mut gates, Admission::Queued(ticket))) => {
                let plan = Arc::clone(self);
                Outcome::pending(async move {
                    match ticket.wait().await {
                        Ok(turn) => {
                            gates.turn = Some(turn);
                            plan.execute(gates).await
                        }
                        Err(reason) => {
                            drop(gates);
                            Ok(Dispatched::NoOp(reason))
                        }
                    }
                })
            }
        }
    }

    fn execute(self: &Arc<Self>, gates: Gates) -> Outcome<T> {
        match (&self.action, &self.policies.retry) {
            (Action::Sync(run), None) => {
                let tracker = RunTracker::begin(&self.shared, self.key.clone());
                let outcome = self.lifecycle.run_before().and_then(|()| run());
                Outcome::Immediate(self.settle(gates, tracker, outcome, true))
            }
            _ => {
                let plan = Arc::clone(self);
                Outcome::pending(async move { plan.run(gates).await })
            }
        }
    }

    async fn run(&self, gates: Gates) -> MixResult<Dispatched<T>> {
        let tracker = RunTracker::begin(&self.shared, self.key.clone());
        let (outcome, invoked) = match self.lifecycle.run_before() {
            Err(e) => (Err(e), true),
            Ok(()) => match &self.policies.retry {
                Some(policy) => {
                    let connectivity = self
                        .policies
                        .check_internet
                        .as_ref()
                        .filter(|_| self.policies.connectivity_in_retry());
                    let executed =
                        retry::execute(&self.shared, &self.key, &self.action, policy, connectivity)
                            .await;
                    (executed.result, executed.invoked)
                }
                None => (self.action.invoke().await, true),
            },
        };
        self.settle(gates, tracker, outcome, invoked)
    }

    /// `catch_error`, then `after`, then release the gates and route the
    /// error. If the action was never invoked (every attempt stopped at the
    /// connectivity check) the throttle and fresh windows are rolled back.
    fn settle(
        &self,
        mut gates: Gates,
        tracker: RunTracker,
        outcome: MixResult<T>,
        invoked: bool,
    ) -> MixResult<Dispatched<T>> {
        let action_failed = outcome.is_err();
        let caught = match outcome {
            Ok(value) => Ok(Dispatched::Value(value)),
            Err(error) => match self.lifecycle.catch(error) {
                Some(error) => Err(error),
                None => {
                    tracing::debug!(key = %self.key, "error suppressed by catch_error");
                    Ok(Dispatched::NoOp(NoOpReason::ErrorSuppressed))
                }
            },
        };
        let result = match self.lifecycle.run_after() {
            Ok(()) => caught,
            Err(error) => Err(error),
        };

        if invoked {
            gates.complete(action_failed || result.is_err());
        }
        tracker.finish(result.as_ref().err());
        drop(gates);
        drop(tracker);

        match result {
            Ok(dispatched) => Ok(dispatched),
            Err(error) => route_error(&self.shared, &self.key, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        FreshConfig, NonReentrantConfig, SequentialConfig, StaticProbe, ThrottleConfig,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mixer() -> Mixer {
        Mixer::with_probe(StaticProbe::new(true))
    }

    fn immediate<T: Send + 'static>(outcome: Outcome<T>) -> MixResult<Dispatched<T>> {
        outcome.immediate().expect("expected a synchronous outcome")
    }

    #[test]
    fn sync_action_without_suspending_policies_is_immediate() {
        let mixer = mixer();
        let outcome = mixer.dispatch(
            "k",
            Action::sync(|| Ok("done")),
            MixConfig::new()
                .non_reentrant(NonReentrantConfig::default())
                .throttle(ThrottleConfig::default())
                .fresh(FreshConfig::default())
                .sequential(SequentialConfig::default()),
        );
        assert_eq!(immediate(outcome).unwrap(), Dispatched::Value("done"));
        let session = mixer.shared.session.lock();
        assert!(session.non_reentrant.is_empty());
        assert!(session.sequential.is_empty());
        assert_eq!(session.throttle.len(), 1);
    }

    #[test]
    fn vetoed_throttle_rolls_back_earlier_gates() {
        let mixer = mixer();
        let config = || {
            MixConfig::new()
                .non_reentrant(NonReentrantConfig::default())
                .throttle(ThrottleConfig::default())
        };
        immediate(mixer.dispatch("k", Action::sync(|| Ok(())), config())).unwrap();
        let vetoed = immediate(mixer.dispatch("k", Action::sync(|| Ok(())), config())).unwrap();
        assert!(matches!(
            vetoed.no_op_reason(),
            Some(NoOpReason::Throttled { .. })
        ));
        assert!(mixer.shared.session.lock().non_reentrant.is_empty());
    }

    #[test]
    fn failed_flag_set_and_cleared_by_next_run() {
        let mixer = mixer();
        let key = Key::from("load");
        let failing = mixer.dispatch(
            key.clone(),
            Action::<()>::sync(|| Err(UserException::new("nope").into())),
            MixConfig::new(),
        );
        assert_eq!(
            immediate(failing).unwrap().no_op_reason(),
            Some(NoOpReason::ErrorQueued)
        );
        assert!(mixer.is_failed(&key));
        assert_eq!(mixer.exception_for(&key).unwrap().message, "nope");
        assert_eq!(mixer.errors().len(), 1);

        immediate(mixer.dispatch(key.clone(), Action::sync(|| Ok(())), MixConfig::new())).unwrap();
        assert!(!mixer.is_failed(&key));
    }

    #[test]
    fn observer_and_error_handler_see_runs() {
        let mixer = mixer();
        let events = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let (e, h) = (Arc::clone(&events), Arc::clone(&errors));
        mixer.set_observer(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });
        mixer.set_error_handler(move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        let result = immediate(mixer.dispatch(
            "k",
            Action::<()>::sync(|| Err(ActionError::msg("boom"))),
            MixConfig::new(),
        ));
        assert!(result.is_err());
        assert_eq!(events.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        mixer.clear(ClearOptions::default());
        immediate(mixer.dispatch("k", Action::sync(|| Ok(())), MixConfig::new())).unwrap();
        assert_eq!(events.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn counters_and_props_are_session_scoped() {
        let mixer = mixer();
        let key = Key::from("rev");
        assert_eq!(mixer.increment_counter(&key), 1);
        assert_eq!(mixer.increment_counter(&key), 2);
        mixer.set_prop("user", String::from("ada"));
        assert_eq!(*mixer.prop::<String>(&Key::from("user")).unwrap(), "ada");
        assert!(mixer.prop::<u32>(&Key::from("user")).is_none());

        mixer.clear(ClearOptions::default());
        assert_eq!(mixer.counter(&key), 0);
        assert!(mixer.prop::<String>(&Key::from("user")).is_none());
    }

    #[test]
    fn replaced_disposable_is_disposed() {
        let mixer = mixer();
        let disposed = Arc::new(AtomicUsize::new(0));
        let first = Arc::clone(&disposed);
        mixer.track_disposable(
            "timer",
            crate::DisposeFn(move || {
                first.fetch_add(1, Ordering::SeqCst);
            }),
        );
        mixer.track_disposable("timer", crate::DisposeFn(|| {}));
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(mixer.remove_prop(&Key::from("timer")));
        assert!(!mixer.remove_prop(&Key::from("timer")));
    }

    #[test]
    fn forced_offline_is_decided_synchronously() {
        let mixer = mixer();
        mixer.force_connectivity(Some(false));
        let outcome = mixer.dispatch(
            "k",
            Action::sync(|| Ok(1)),
            MixConfig::new().check_internet(crate::CheckInternetConfig::default().with_dialog(false)),
        );
        let error = immediate(outcome).unwrap_err();
        assert!(error.as_user().is_some_and(UserException::is_no_connectivity));
    }
}
