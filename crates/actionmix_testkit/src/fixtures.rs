//! Test fixtures: tracing setup, call counters and recorders.

use actionmix_core::{Action, ActionError, MixResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// Honours `RUST_LOG`; defaults to `actionmix=debug`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("actionmix=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Counts invocations of the actions it builds.
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    calls: Arc<AtomicUsize>,
}

impl CallCounter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of invocations so far.
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// A sync action returning `value`.
    pub fn sync_action<T: Clone + Send + Sync + 'static>(&self, value: T) -> Action<T> {
        let calls = Arc::clone(&self.calls);
        Action::sync(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value.clone())
        })
    }

    /// An async action that sleeps for `delay`, then returns `value`.
    pub fn sleeping_action<T: Clone + Send + Sync + 'static>(
        &self,
        delay: Duration,
        value: T,
    ) -> Action<T> {
        let calls = Arc::clone(&self.calls);
        Action::future(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let value = value.clone();
            async move {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
        })
    }

    /// An async action that always fails with `error`.
    pub fn failing_action<T: Send + 'static>(&self, error: ActionError) -> Action<T> {
        let calls = Arc::clone(&self.calls);
        Action::future(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let error = error.clone();
            async move { Err(error) }
        })
    }

    /// An async action that fails the first `failures` times, then returns
    /// `value`.
    pub fn flaky_action<T: Clone + Send + Sync + 'static>(
        &self,
        failures: usize,
        value: T,
    ) -> Action<T> {
        let calls = Arc::clone(&self.calls);
        Action::future(move || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            let value = value.clone();
            async move {
                if call < failures {
                    Err(ActionError::msg(format!("transient failure {call}")))
                } else {
                    Ok(value)
                }
            }
        })
    }
}

/// Collects values pushed from hooks.
#[derive(Debug)]
pub struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> Recorder<T> {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an item.
    pub fn push(&self, item: T) {
        self.items.lock().push(item);
    }

    /// Returns a copy of everything recorded.
    pub fn items(&self) -> Vec<T> {
        self.items.lock().clone()
    }

    /// Number of recorded items.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// Awaits a [`MixResult`] and panics with the error if it failed.
pub async fn ok<T>(future: impl std::future::Future<Output = MixResult<T>>) -> T {
    match future.await {
        Ok(value) => value,
        Err(e) => panic!("unexpected error: {e}"),
    }
}
