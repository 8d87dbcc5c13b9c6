//! Server revisions, device ids and the revision-report callback.
//!
//! A server revision is applied to state only if it is strictly greater
//! than the stored one. Responses and pushes go through the same rule.

use actionmix_core::Key;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A server-assigned, monotonically comparable version of a key's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ServerRevision(pub u64);

impl ServerRevision {
    /// Returns the raw counter.
    pub fn get(self) -> u64 {
        self.0
    }

    /// Returns true if `self` may replace `stored`.
    ///
    /// Nothing stored yet accepts any revision.
    pub fn supersedes(self, stored: Option<ServerRevision>) -> bool {
        stored.map_or(true, |stored| self > stored)
    }
}

impl From<u64> for ServerRevision {
    fn from(revision: u64) -> Self {
        ServerRevision(revision)
    }
}

impl fmt::Display for ServerRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Identifies one client installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// A fresh random (v4) id.
    pub fn random() -> Self {
        DeviceId(Uuid::new_v4())
    }

    /// Wraps an existing id.
    pub fn from_uuid(uuid: Uuid) -> Self {
        DeviceId(uuid)
    }

    /// Returns the UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reads and writes the stored server revision inside application state.
pub trait ServerRevisionAccess<S>: Send + Sync {
    /// The revision last applied for `key`, or `None` if none was.
    fn server_revision(&self, state: &S, key: &Key) -> Option<ServerRevision>;

    /// Returns `state` with the stored revision for `key` set to `revision`.
    fn with_server_revision(&self, state: S, key: &Key, revision: ServerRevision) -> S;
}

/// The callback a push-aware send uses to report the server revision.
///
/// Every successful send must call [`inform`](Self::inform) before it
/// returns. Later calls overwrite earlier ones.
#[derive(Clone, Default)]
pub struct RevisionInformer {
    slot: Arc<Mutex<Option<ServerRevision>>>,
}

impl RevisionInformer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reports the revision the server assigned to this write.
    pub fn inform(&self, revision: impl Into<ServerRevision>) {
        *self.slot.lock() = Some(revision.into());
    }

    pub(crate) fn take(&self) -> Option<ServerRevision> {
        self.slot.lock().take()
    }
}

impl fmt::Debug for RevisionInformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevisionInformer")
            .field("informed", &*self.slot.lock())
            .finish()
    }
}
