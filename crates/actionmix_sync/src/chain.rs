//! Bookkeeping for one request chain: the in-flight lock, the waiting flag
//! and the follow-up budget.

use actionmix_core::{
    ActionError, Dispatched, Key, KeyLock, MixResult, Mixer, ProgrammingError, RunTracker,
};

/// Held from the first request of a chain until no follow-up is needed.
pub(crate) struct Chain {
    mixer: Mixer,
    key: Key,
    lock: KeyLock,
    tracker: RunTracker,
    limit: usize,
    follow_ups: usize,
}

impl Chain {
    /// Claims the in-flight flag of `key` under `namespace`, or returns
    /// `None` if a chain is already running.
    pub fn try_start(mixer: &Mixer, key: &Key, namespace: &str, limit: usize) -> Option<Self> {
        let lock = mixer.try_acquire_lock(key.scoped(namespace))?;
        tracing::trace!(key = %key, "request chain started");
        Some(Self {
            mixer: mixer.clone(),
            key: key.clone(),
            lock,
            tracker: mixer.begin_run(key),
            limit,
            follow_ups: 0,
        })
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    /// Counts a follow-up request. `superseded` is the error of the request
    /// being followed up, which is logged and otherwise dropped.
    pub fn follow_up(&mut self, superseded: Option<&ActionError>) -> MixResult<()> {
        if self.follow_ups >= self.limit {
            tracing::warn!(key = %self.key, limit = self.limit, "follow-up limit exceeded");
            return Err(ProgrammingError::FollowUpLimitExceeded {
                key: self.key.clone(),
                limit: self.limit,
            }
            .into());
        }
        self.follow_ups += 1;
        if let Some(error) = superseded {
            tracing::warn!(key = %self.key, error = %error, "superseded request failed");
        }
        tracing::debug!(key = %self.key, follow_up = self.follow_ups, "local state moved on, sending follow-up");
        Ok(())
    }

    /// Ends the chain and routes its final error.
    pub fn finish(self, error: Option<ActionError>) -> MixResult<Dispatched<()>> {
        let Chain {
            mixer,
            key,
            lock,
            tracker,
            follow_ups,
            ..
        } = self;
        tracker.finish(error.as_ref());
        drop(lock);
        drop(tracker);
        tracing::trace!(key = %key, follow_ups, "request chain finished");
        match error {
            None => Ok(Dispatched::Value(())),
            Some(error) => mixer.route_error(&key, error),
        }
    }
}
