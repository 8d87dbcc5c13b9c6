//! # actionmix Sync
//!
//! Optimistic-update synchronization engines built on the actionmix
//! dispatcher.
//!
//! This crate provides:
//! - [`OptimisticSync`]: apply locally, send once, follow up while local
//!   state keeps diverging from what was sent
//! - [`OptimisticSyncWithPush`]: the same with per-key local revisions,
//!   server-revision reconciliation and server-push merging
//!
//! ## Key Invariants
//!
//! - State is mutated synchronously at dispatch, before any network step
//! - At most one request per key is in flight; later dispatches coalesce
//! - Only the last response of a follow-up chain is applied to state
//! - A server revision is applied only if strictly greater than the stored one
//!
//! ## Example
//!
//! ```rust,ignore
//! use actionmix_sync::OptimisticSync;
//!
//! let engine = OptimisticSync::new(Mixer::global().clone(), store);
//! // Flips `liked` at once; the request runs when the outcome is awaited.
//! engine.dispatch(("like", post_id), ToggleLike).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chain;
mod config;
mod optimistic;
mod push;
mod revision;

pub use config::{SyncConfig, DEFAULT_MAX_FOLLOW_UP_REQUESTS};
pub use optimistic::{OptimisticCommand, OptimisticSync};
pub use push::{OptimisticSyncWithPush, PushCommand, PushDisposition, PushRequest, ServerPush};
pub use revision::{DeviceId, RevisionInformer, ServerRevision, ServerRevisionAccess};
