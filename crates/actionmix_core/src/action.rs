//! Actions and dispatch outcomes.

use crate::error::MixResult;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

type SyncFn<T> = Arc<dyn Fn() -> MixResult<T> + Send + Sync>;
type AsyncFn<T> = Arc<dyn Fn() -> BoxFuture<'static, MixResult<T>> + Send + Sync>;

/// A keyed unit of work: either a plain function or a future factory.
///
/// Actions are cheap to clone and may be invoked more than once (retry).
pub enum Action<T> {
    /// Runs to completion without suspending.
    Sync(SyncFn<T>),
    /// Produces a future on every invocation.
    Async(AsyncFn<T>),
}

impl<T> Clone for Action<T> {
    fn clone(&self) -> Self {
        match self {
            Action::Sync(f) => Action::Sync(Arc::clone(f)),
            Action::Async(f) => Action::Async(Arc::clone(f)),
        }
    }
}

impl<T: Send + 'static> Action<T> {
    /// Creates a synchronous action.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> MixResult<T> + Send + Sync + 'static,
    {
        Action::Sync(Arc::new(f))
    }

    /// Creates an asynchronous action from a future factory.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MixResult<T>> + Send + 'static,
    {
        Action::Async(Arc::new(move || f().boxed()))
    }

    /// Returns true if invoking this action never suspends.
    pub fn is_sync(&self) -> bool {
        matches!(self, Action::Sync(_))
    }

    /// Invokes the action, boxing a synchronous result into a ready future.
    pub fn invoke(&self) -> BoxFuture<'static, MixResult<T>> {
        match self {
            Action::Sync(f) => futures::future::ready(f()).boxed(),
            Action::Async(f) => f(),
        }
    }
}

impl<T> fmt::Debug for Action<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Sync(_) => f.write_str("Action::Sync"),
            Action::Async(_) => f.write_str("Action::Async"),
        }
    }
}

/// Why a sequential-queue entry was dropped without running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// The queue was at `max_queue_size` and the arrival was rejected.
    QueueFull,
    /// The waiter exceeded `queue_timeout` before its turn.
    Timeout,
    /// A newer arrival evicted this waiter (`drop_oldest`).
    Superseded,
}

/// Why a dispatch resolved without producing a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    /// A newer call in the same debounce window replaced this one.
    Debounced,
    /// Another invocation holds the non-reentrant lock.
    NonReentrant,
    /// The throttle window is still open.
    Throttled {
        /// Time left until the window closes.
        remaining: Duration,
    },
    /// The previous result is still fresh.
    Fresh {
        /// Time left until it goes stale.
        remaining: Duration,
    },
    /// Connectivity failed and the policy aborts silently.
    NoConnectivity,
    /// The sequential queue dropped this call.
    Dropped(DropReason),
    /// The action failed with a user exception that was queued for display.
    ErrorQueued,
    /// A `catch_error` hook suppressed the failure.
    ErrorSuppressed,
    /// A request for this key is already in flight; it will follow up.
    Coalesced,
    /// The session was cleared while this call was waiting.
    Cleared,
}

/// The resolved value of a dispatch: a value, or a no-op with its reason.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched<T> {
    /// The action ran and returned this value.
    Value(T),
    /// The action did not produce a value.
    NoOp(NoOpReason),
}

impl<T> Dispatched<T> {
    /// Returns the value, discarding the no-op reason.
    pub fn value(self) -> Option<T> {
        match self {
            Dispatched::Value(v) => Some(v),
            Dispatched::NoOp(_) => None,
        }
    }

    /// Returns true if no value was produced.
    pub fn is_no_op(&self) -> bool {
        matches!(self, Dispatched::NoOp(_))
    }

    /// Returns the no-op reason, if any.
    pub fn no_op_reason(&self) -> Option<NoOpReason> {
        match self {
            Dispatched::NoOp(reason) => Some(*reason),
            Dispatched::Value(_) => None,
        }
    }

    /// Maps the value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Dispatched<U> {
        match self {
            Dispatched::Value(v) => Dispatched::Value(f(v)),
            Dispatched::NoOp(reason) => Dispatched::NoOp(reason),
        }
    }
}

/// What `dispatch` hands back.
///
/// `Immediate` when neither the action nor any touched policy needed to
/// suspend; `Pending` otherwise. Both can be awaited through [`IntoFuture`],
/// but synchronous callers can match on `Immediate` and never touch a runtime.
///
/// A `Pending` outcome is lazy: nothing past the synchronous prefix happens
/// until it is awaited or [`spawn`](Self::spawn)ed. Dropping it releases
/// whatever the dispatch had acquired.
#[must_use = "a pending outcome does nothing unless awaited or spawned"]
pub enum Outcome<T> {
    /// The dispatch already finished.
    Immediate(MixResult<Dispatched<T>>),
    /// The dispatch continues when this future is polled.
    Pending(BoxFuture<'static, MixResult<Dispatched<T>>>),
}

impl<T: Send + 'static> Outcome<T> {
    pub(crate) fn pending<F>(future: F) -> Self
    where
        F: Future<Output = MixResult<Dispatched<T>>> + Send + 'static,
    {
        Outcome::Pending(future.boxed())
    }

    pub(crate) fn no_op(reason: NoOpReason) -> Self {
        Outcome::Immediate(Ok(Dispatched::NoOp(reason)))
    }

    /// Returns true if the dispatch finished synchronously.
    pub fn is_immediate(&self) -> bool {
        matches!(self, Outcome::Immediate(_))
    }

    /// Returns the synchronous result, or `None` if the dispatch is pending.
    pub fn immediate(self) -> Option<MixResult<Dispatched<T>>> {
        match self {
            Outcome::Immediate(result) => Some(result),
            Outcome::Pending(_) => None,
        }
    }

    /// Drives the outcome to completion on the current tokio runtime, for
    /// callers that do not wait for the result.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime, like [`tokio::spawn`].
    pub fn spawn(self) -> JoinHandle<MixResult<Dispatched<T>>> {
        tokio::spawn(self.into_future())
    }

    /// Maps the eventual value.
    pub fn map<U, F>(self, f: F) -> Outcome<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        match self {
            Outcome::Immediate(result) => Outcome::Immediate(result.map(|d| d.map(f))),
            Outcome::Pending(future) => {
                Outcome::pending(async move { future.await.map(|d| d.map(f)) })
            }
        }
    }
}

impl<T: Send + 'static> IntoFuture for Outcome<T> {
    type Output = MixResult<Dispatched<T>>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Outcome::Immediate(result) => futures::future::ready(result).boxed(),
            Outcome::Pending(future) => future,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Immediate(result) => f.debug_tuple("Immediate").field(result).finish(),
            Outcome::Pending(_) => f.write_str("Pending"),
        }
    }
}
