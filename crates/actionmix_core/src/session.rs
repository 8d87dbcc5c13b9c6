//! Process-wide dispatch state.
//!
//! [`Shared`] is what every guard holds on to. Its [`Session`] is the part
//! wiped by `clear`; the settings, probe and error-queue wiring survive.
//!
//! Every guard remembers the session `epoch` it was created in and only
//! touches the session if the epoch still matches, so a guard that outlives
//! a `clear` can never release state that belongs to the next session.

use crate::error::UserException;
use crate::error_queue::ErrorQueue;
use crate::key::Key;
use crate::mixer::Settings;
use crate::policy::connectivity::ConnectivityProbe;
use crate::policy::debounce::DebounceSlot;
use crate::policy::sequential::SeqQueue;
use crate::policy::throttle::ExpiryLocks;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A resource released on logout.
pub trait Disposable: Send + Sync {
    /// Releases the resource. Must be idempotent.
    fn dispose(&self);
}

impl<T: Send + 'static> Disposable for tokio::task::JoinHandle<T> {
    fn dispose(&self) {
        self.abort();
    }
}

impl Disposable for tokio::task::AbortHandle {
    fn dispose(&self) {
        self.abort();
    }
}

/// Adapts a closure into a [`Disposable`].
pub struct DisposeFn<F>(pub F);

impl<F: Fn() + Send + Sync> Disposable for DisposeFn<F> {
    fn dispose(&self) {
        (self.0)();
    }
}

/// A value stored under a key alongside the dispatch state.
#[derive(Clone)]
pub(crate) enum Prop {
    Value(Arc<dyn Any + Send + Sync>),
    Disposable(Arc<dyn Disposable>),
}

/// Per-key state for one session.
pub(crate) struct Session {
    pub epoch: u64,
    pub non_reentrant: HashSet<Key>,
    pub throttle: ExpiryLocks,
    pub fresh: ExpiryLocks,
    pub debounce: HashMap<Key, DebounceSlot>,
    pub sequential: HashMap<Key, SeqQueue>,
    pub waiting: HashMap<Key, usize>,
    pub failed: HashMap<Key, UserException>,
    pub counters: HashMap<Key, u64>,
    pub props: HashMap<Key, Prop>,
    pub forced_connectivity: Option<bool>,
}

impl Session {
    pub fn new(epoch: u64) -> Self {
        Self {
            epoch,
            non_reentrant: HashSet::new(),
            throttle: ExpiryLocks::default(),
            fresh: ExpiryLocks::default(),
            debounce: HashMap::new(),
            sequential: HashMap::new(),
            waiting: HashMap::new(),
            failed: HashMap::new(),
            counters: HashMap::new(),
            props: HashMap::new(),
            forced_connectivity: None,
        }
    }

    /// True when no per-key state is held.
    pub fn is_empty(&self) -> bool {
        self.non_reentrant.is_empty()
            && self.throttle.is_empty()
            && self.fresh.is_empty()
            && self.debounce.is_empty()
            && self.sequential.is_empty()
            && self.waiting.is_empty()
            && self.failed.is_empty()
            && self.counters.is_empty()
            && self.props.is_empty()
    }
}

/// State shared by a [`Mixer`](crate::Mixer) and every guard it hands out.
pub(crate) struct Shared {
    pub session: Mutex<Session>,
    pub settings: RwLock<Settings>,
    pub probe: RwLock<Arc<dyn ConnectivityProbe>>,
    pub errors: ErrorQueue,
}

impl Shared {
    pub fn new(probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self {
            session: Mutex::new(Session::new(0)),
            settings: RwLock::new(Settings::default()),
            probe: RwLock::new(probe),
            errors: ErrorQueue::default(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.session.lock().epoch
    }

    /// Runs `f` on the session if it is still `epoch`.
    pub fn with_epoch<R>(&self, epoch: u64, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut session = self.session.lock();
        if session.epoch == epoch {
            Some(f(&mut session))
        } else {
            None
        }
    }
}
