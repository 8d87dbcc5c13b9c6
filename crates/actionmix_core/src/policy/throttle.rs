//! Expiry locks shared by the throttle and fresh policies.
//!
//! Both keep a `key -> expiry` map and block while `now < expiry`. They only
//! differ in what a failed run does to the window: throttle keeps it unless
//! told otherwise, fresh always rolls it back.

use crate::config::ResolvedThrottle;
use crate::key::Key;
use crate::session::{Session, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// `key -> expiry` map.
#[derive(Debug, Default)]
pub(crate) struct ExpiryLocks {
    entries: HashMap<Key, Instant>,
}

impl ExpiryLocks {
    /// Time left on `key`'s window, if it is still open.
    pub fn remaining(&self, key: &Key, now: Instant) -> Option<Duration> {
        self.entries
            .get(key)
            .filter(|expiry| now < **expiry)
            .map(|expiry| *expiry - now)
    }

    /// Sets the window and returns the one it replaced.
    pub fn set(&mut self, key: Key, expiry: Instant) -> Option<Instant> {
        self.entries.insert(key, expiry)
    }

    /// Restores `previous` if `key` still holds `expiry`.
    pub fn restore_if(&mut self, key: &Key, expiry: Instant, previous: Option<Instant>) -> bool {
        if self.entries.get(key) != Some(&expiry) {
            return false;
        }
        match previous {
            Some(previous) => {
                self.entries.insert(key.clone(), previous);
            }
            None => {
                self.entries.remove(key);
            }
        }
        true
    }

    /// Drops every window that has closed.
    pub fn prune(&mut self, now: Instant) {
        self.entries.retain(|_, expiry| *expiry > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which expiry map a guard belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExpiryKind {
    Throttle,
    Fresh,
}

impl ExpiryKind {
    fn locks(self, session: &mut Session) -> &mut ExpiryLocks {
        match self {
            ExpiryKind::Throttle => &mut session.throttle,
            ExpiryKind::Fresh => &mut session.fresh,
        }
    }
}

/// One expiry-lock request.
#[derive(Debug, Clone)]
pub(crate) struct ExpiryRequest {
    pub kind: ExpiryKind,
    pub lock: Key,
    pub window: Duration,
    pub ignore: bool,
    pub rollback_on_error: bool,
}

/// A window opened by one dispatch.
///
/// Dropped without [`complete`](Self::complete) (the action never ran),
/// it restores whatever window it replaced.
pub(crate) struct ExpiryGuard {
    shared: Arc<Shared>,
    kind: ExpiryKind,
    lock: Key,
    expiry: Instant,
    previous: Option<Instant>,
    epoch: u64,
    rollback_on_error: bool,
    settled: bool,
}

impl ExpiryGuard {
    /// Opens the window, or returns the time left on the current one.
    pub fn acquire_in(
        session: &mut Session,
        shared: &Arc<Shared>,
        request: ExpiryRequest,
        now: Instant,
    ) -> Result<Self, Duration> {
        let epoch = session.epoch;
        let locks = request.kind.locks(session);
        locks.prune(now);
        if !request.ignore {
            if let Some(remaining) = locks.remaining(&request.lock, now) {
                return Err(remaining);
            }
        }
        let expiry = now + request.window;
        let previous = locks.set(request.lock.clone(), expiry);
        tracing::trace!(
            key = %request.lock,
            kind = ?request.kind,
            window_ms = request.window.as_millis() as u64,
            "expiry lock set"
        );
        Ok(Self {
            shared: Arc::clone(shared),
            kind: request.kind,
            lock: request.lock,
            expiry,
            previous,
            epoch,
            rollback_on_error: request.rollback_on_error,
            settled: false,
        })
    }

    /// Records that the action ran. A failure rolls the window back when
    /// the policy asks for it.
    pub fn complete(&mut self, failed: bool) {
        if failed && self.rollback_on_error {
            self.rollback();
        }
        self.settled = true;
    }

    fn rollback(&self) {
        let (kind, lock, expiry, previous) = (self.kind, &self.lock, self.expiry, self.previous);
        let restored = self.shared.with_epoch(self.epoch, |session| {
            kind.locks(session).restore_if(lock, expiry, previous)
        });
        if restored == Some(true) {
            tracing::trace!(key = %lock, kind = ?kind, "expiry lock rolled back");
        }
    }
}

impl Drop for ExpiryGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.rollback();
        }
    }
}

impl ResolvedThrottle {
    pub(crate) fn request(&self) -> ExpiryRequest {
        ExpiryRequest {
            kind: ExpiryKind::Throttle,
            lock: self.lock.clone(),
            window: self.duration,
            ignore: self.ignore_throttle,
            rollback_on_error: self.remove_lock_on_error,
        }
    }
}
