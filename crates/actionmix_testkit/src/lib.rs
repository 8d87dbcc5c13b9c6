//! # actionmix Testkit
//!
//! Test utilities for actionmix.
//!
//! This crate provides:
//! - Tracing setup and call-counting fixtures
//! - A scripted connectivity probe
//! - A fake server with latency, scripted failures and a revision counter
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use actionmix_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn counts_sends() {
//!     init_tracing();
//!     let server = FakeServer::new(|v: u32| v);
//!     server.send(1).await.unwrap();
//!     assert_eq!(server.request_count(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod connectivity;
pub mod fixtures;
pub mod generators;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::connectivity::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
}

pub use connectivity::*;
pub use fixtures::*;
pub use generators::*;
pub use server::*;
