//! Fresh policy: skip while the last successful run is still fresh.

use super::throttle::{ExpiryKind, ExpiryRequest};
use crate::config::ResolvedFresh;

impl ResolvedFresh {
    /// A failed run always rolls the window back so the next call can retry.
    pub(crate) fn request(&self) -> ExpiryRequest {
        ExpiryRequest {
            kind: ExpiryKind::Fresh,
            lock: self.lock.clone(),
            window: self.fresh_for,
            ignore: self.ignore_fresh,
            rollback_on_error: true,
        }
    }
}
