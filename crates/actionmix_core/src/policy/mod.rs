//! Policy resolvers.
//!
//! Each resolver owns one slice of the session state. Vetoing resolvers hand
//! back a guard on success and a [`NoOpReason`](crate::NoOpReason) otherwise;
//! guards release or roll back their state in `Drop`.
//!
//! User hooks (`on_throttled`, `on_queued`, `on_dropped`, ...) are always
//! called after the session lock has been released, so a hook may dispatch.

pub mod connectivity;
pub(crate) mod debounce;
pub(crate) mod fresh;
pub mod non_reentrant;
pub(crate) mod retry;
pub(crate) mod sequential;
pub(crate) mod throttle;

/// A hook call postponed until the session lock is released.
pub(crate) type Deferred = Box<dyn FnOnce() + Send>;

pub(crate) fn run_deferred(deferred: Vec<Deferred>) {
    for call in deferred {
        call();
    }
}
