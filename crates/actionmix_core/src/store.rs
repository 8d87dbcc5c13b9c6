//! The state-store collaborator.

use tokio::sync::watch;

/// Holds one piece of application state.
///
/// The optimistic-sync engines read the current state, derive a new one and
/// emit it; they never hold a reference across a suspension point.
pub trait Store<S>: Send + Sync {
    /// Returns a snapshot of the current state.
    fn state(&self) -> S;

    /// Replaces the state and notifies observers.
    fn emit(&self, state: S);
}

/// An in-memory [`Store`] backed by a `watch` channel.
#[derive(Debug)]
pub struct MemoryStore<S> {
    tx: watch::Sender<S>,
}

impl<S: Clone + Send + Sync> MemoryStore<S> {
    /// Creates a store holding `initial`.
    pub fn new(initial: S) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }

    /// Applies `f` to the current state in place and notifies observers.
    pub fn update(&self, f: impl FnOnce(&mut S)) {
        self.tx.send_modify(f);
    }
}

impl<S: Clone + Send + Sync> Store<S> for MemoryStore<S> {
    fn state(&self) -> S {
        self.tx.borrow().clone()
    }

    fn emit(&self, state: S) {
        self.tx.send_replace(state);
    }
}
