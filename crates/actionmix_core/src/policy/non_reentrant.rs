//! Non-reentrant lock: one active invocation per lock key.

use crate::key::Key;
use crate::session::{Session, Shared};
use std::fmt;
use std::sync::Arc;

/// Holds a key in the non-reentrant set until dropped.
///
/// Obtained from [`Mixer::try_acquire_lock`](crate::Mixer::try_acquire_lock)
/// or internally by the non-reentrant policy.
pub struct KeyLock {
    shared: Arc<Shared>,
    key: Key,
    epoch: u64,
}

impl KeyLock {
    /// Marks `key` active, or returns `None` if it already is.
    pub(crate) fn acquire_in(session: &mut Session, shared: &Arc<Shared>, key: Key) -> Option<Self> {
        if !session.non_reentrant.insert(key.clone()) {
            tracing::trace!(key = %key, "non-reentrant lock busy");
            return None;
        }
        tracing::trace!(key = %key, "non-reentrant lock acquired");
        Some(Self {
            shared: Arc::clone(shared),
            key,
            epoch: session.epoch,
        })
    }

    pub(crate) fn try_acquire(shared: &Arc<Shared>, key: Key) -> Option<Self> {
        let mut session = shared.session.lock();
        Self::acquire_in(&mut session, shared, key)
    }

    /// The locked key.
    pub fn key(&self) -> &Key {
        &self.key
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        let key = &self.key;
        self.shared.with_epoch(self.epoch, |session| {
            session.non_reentrant.remove(key);
        });
        tracing::trace!(key = %key, "non-reentrant lock released");
    }
}

impl fmt::Debug for KeyLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLock")
            .field("key", &self.key)
            .field("epoch", &self.epoch)
            .finish()
    }
}
