//! # actionmix core
//!
//! Policy-composition dispatcher for keyed actions.
//!
//! This crate provides:
//! - Structural [`Key`]s that partition all policy state
//! - Layered policy configs (debounce, check-internet, non-reentrant,
//!   throttle, fresh, sequential, retry) with field-level merging
//! - The process-wide [`Mixer`] context with an explicit `clear` lifecycle
//! - The dispatch orchestrator with a synchronous fast path
//! - A bounded, broadcast-backed [`ErrorQueue`] for user-facing exceptions
//!
//! ## Policy order
//!
//! Every dispatch evaluates its configured policies in a fixed order:
//! 1. debounce
//! 2. check-internet
//! 3. non-reentrant
//! 4. throttle
//! 5. fresh
//! 6. sequential
//! 7. the action itself, wrapped by the lifecycle hooks
//!
//! Retry wraps the execution of step 7 (and the connectivity re-check when
//! combined with check-internet).
//!
//! ## Key Invariants
//!
//! - A vetoed dispatch never runs and never errors: it resolves to a no-op
//! - Every lock and queue entry is removed once no longer needed
//! - Bookkeeping before the first suspension point runs inside `dispatch`
//! - `clear` wipes session state and preserves app-level wiring

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
pub mod config;
mod effect;
mod error;
mod error_queue;
mod key;
mod mixer;
pub mod policy;
mod session;
mod store;

pub use action::{Action, Dispatched, DropReason, NoOpReason, Outcome};
pub use config::{
    CheckInternetConfig, DebounceConfig, FreshConfig, Hook, Layer, Lifecycle, Limit, MixConfig,
    NonReentrantConfig, Policies, RetryConfig, SequentialConfig, ThrottleConfig,
};
pub use effect::Effect;
pub use error::{ActionError, MixResult, ProgrammingError, UserException, UserExceptionKind};
pub use error_queue::{ErrorQueue, DEFAULT_MAX_ERRORS_QUEUED};
pub use key::Key;
pub use mixer::{
    ClearOptions, ErrorHandler, LogoutOptions, MixEvent, Mixer, Observer, RunTracker,
};
pub use policy::connectivity::{ConnectivityProbe, StaticProbe, TcpProbe};
pub use policy::non_reentrant::KeyLock;
pub use session::{DisposeFn, Disposable};
pub use store::{MemoryStore, Store};
