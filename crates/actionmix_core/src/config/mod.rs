//! Layered policy configuration.
//!
//! Every policy config is a struct of optional fields. Three layers are
//! merged field by field, highest precedence last:
//!
//! ```text
//! library default  <-  preset  <-  explicit per-call config
//! ```
//!
//! [`Layer::layer`] is the pure merge; `resolve` turns the merged config into
//! a fully-populated `Resolved*` struct once, right before the dispatch uses it.

/// Implements [`Layer`] for a struct whose fields are all `Option`s.
macro_rules! layered {
    ($ty:ident { $($field:ident),* $(,)? }) => {
        impl $crate::config::Layer for $ty {
            fn layer(self, overlay: Self) -> Self {
                Self {
                    $($field: overlay.$field.or(self.$field),)*
                }
            }
        }
    };
}
pub(crate) use layered;

mod lifecycle;
mod policies;

use std::fmt;
use std::sync::Arc;

pub use lifecycle::{Lifecycle, MixConfig};
pub use policies::{
    CheckInternetConfig, DebounceConfig, FreshConfig, NonReentrantConfig, OnDropped,
    OnNoInternet, OnQueued, OnRetry, OnThrottled, Policies, ResolvedCheckInternet,
    ResolvedDebounce, ResolvedFresh, ResolvedNonReentrant, ResolvedPolicies, ResolvedRetry,
    ResolvedSequential, ResolvedThrottle, RetryConfig, SequentialConfig, ThrottleConfig,
};

/// Field-level merge of two config layers.
pub trait Layer: Sized {
    /// Merges `overlay` on top of `self`: every field `overlay` sets wins,
    /// every field it leaves unset falls through to `self`.
    fn layer(self, overlay: Self) -> Self;
}

impl<C: Layer> Layer for Option<C> {
    fn layer(self, overlay: Self) -> Self {
        match (self, overlay) {
            (Some(base), Some(overlay)) => Some(base.layer(overlay)),
            (base, None) => base,
            (None, overlay) => overlay,
        }
    }
}

/// An upper bound that may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// No bound.
    Unbounded,
    /// At most this many.
    AtMost(usize),
}

impl Limit {
    /// Returns true if `count` is still within the limit.
    pub fn allows(&self, count: usize) -> bool {
        match self {
            Limit::Unbounded => true,
            Limit::AtMost(max) => count <= *max,
        }
    }

    /// Returns true if `len` items already fill the limit.
    pub fn is_full(&self, len: usize) -> bool {
        match self {
            Limit::Unbounded => false,
            Limit::AtMost(max) => len >= *max,
        }
    }
}

/// A shared callback stored in a config.
///
/// Wrapping the `Arc<dyn Fn>` keeps configs `Clone` and `Debug`.
pub struct Hook<F: ?Sized>(pub(crate) Arc<F>);

impl<F: ?Sized> Hook<F> {
    /// Wraps an already shared callback.
    pub fn from_arc(f: Arc<F>) -> Self {
        Hook(f)
    }
}

impl<F: ?Sized> Clone for Hook<F> {
    fn clone(&self) -> Self {
        Hook(Arc::clone(&self.0))
    }
}

impl<F: ?Sized> fmt::Debug for Hook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook(..)")
    }
}

impl<F: ?Sized> std::ops::Deref for Hook<F> {
    type Target = F;

    fn deref(&self) -> &F {
        &self.0
    }
}
