//! A fake server for optimistic-sync tests.
//!
//! The server records every value it receives, answers after a fixed
//! latency, bumps a revision counter per accepted request and can be told
//! to fail upcoming requests.

use actionmix_core::{ActionError, MixResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// A reply from [`FakeServer::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply<V> {
    /// The value as the server stored it (after normalisation).
    pub value: V,
    /// The server revision assigned to this write.
    pub revision: u64,
}

/// Scripted in-memory server.
pub struct FakeServer<V> {
    normalize: Box<dyn Fn(V) -> V + Send + Sync>,
    latency: Duration,
    received: Mutex<Vec<V>>,
    failures: Mutex<VecDeque<ActionError>>,
    revision: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl<V: Clone + Send + Sync + 'static> FakeServer<V> {
    /// Creates a server that stores `normalize(value)` for every request.
    pub fn new(normalize: impl Fn(V) -> V + Send + Sync + 'static) -> Self {
        Self {
            normalize: Box::new(normalize),
            latency: Duration::from_millis(100),
            received: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            revision: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Sets the response latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Starts the revision counter at `revision`.
    pub fn with_revision(self, revision: u64) -> Self {
        self.revision.store(revision, Ordering::SeqCst);
        self
    }

    /// Makes the next request fail with `error`. Calls queue up.
    pub fn fail_next(&self, error: ActionError) {
        self.failures.lock().push_back(error);
    }

    /// Handles one request.
    pub async fn send(&self, value: V) -> MixResult<Reply<V>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.received.lock().push(value.clone());

        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.failures.lock().pop_front() {
            tracing::debug!(error = %error, "fake server failing request");
            return Err(error);
        }
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Reply {
            value: (self.normalize)(value),
            revision,
        })
    }

    /// Every value received, in arrival order.
    pub fn received(&self) -> Vec<V> {
        self.received.lock().clone()
    }

    /// Number of requests received.
    pub fn request_count(&self) -> usize {
        self.received.lock().len()
    }

    /// The last revision handed out.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Advances the revision as if another client wrote, returning the new
    /// revision.
    pub fn bump_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The highest number of requests that were in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl<V> fmt::Debug for FakeServer<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeServer")
            .field("latency", &self.latency)
            .field("revision", &self.revision.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn normalises_and_counts_revisions() {
        let server = FakeServer::new(|v: i32| v + 5).with_latency(Duration::from_millis(20));
        let reply = server.send(1).await.unwrap();
        assert_eq!(reply, Reply { value: 6, revision: 1 });
        assert_eq!(server.send(2).await.unwrap().revision, 2);
        assert_eq!(server.received(), vec![1, 2]);
        assert_eq!(server.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_failures_do_not_bump_revision() {
        let server = FakeServer::new(|v: i32| v);
        server.fail_next(ActionError::msg("down"));
        assert!(server.send(1).await.is_err());
        assert_eq!(server.revision(), 0);
        assert_eq!(server.send(1).await.unwrap().revision, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tracks_concurrency() {
        let server = FakeServer::new(|v: i32| v);
        let (a, b) = tokio::join!(server.send(1), server.send(2));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(server.max_in_flight(), 2);
    }
}
