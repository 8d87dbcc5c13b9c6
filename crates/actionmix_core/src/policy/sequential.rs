//! Sequential queue: calls sharing a lock key run one at a time, FIFO.
//!
//! ```text
//! Idle --enqueue--> Running --turn dropped--> Running(next) | Idle
//! ```
//!
//! The running call holds a [`SequentialTurn`]; dropping it hands the turn to
//! the next live waiter, skipping waiters past their timeout. When nobody is
//! left the queue entry is removed.

use super::Deferred;
use crate::action::{DropReason, NoOpReason};
use crate::config::{OnDropped, ResolvedSequential};
use crate::key::Key;
use crate::session::{Session, Shared};
use std::collections::hash_map::Entry;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// What a waiter is told when the queue gets to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    Run,
    Dropped(DropReason),
}

struct Waiter {
    id: u64,
    enqueued_at: Instant,
    timeout: Option<Duration>,
    grant: oneshot::Sender<Grant>,
    on_dropped: Option<OnDropped>,
}

/// Per-key queue state. Its presence in the session means "running".
#[derive(Default)]
pub(crate) struct SeqQueue {
    /// Calls queued since the lock was last idle; the source of positions.
    joined: usize,
    next_id: u64,
    waiters: VecDeque<Waiter>,
}

impl SeqQueue {
    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }
}

impl std::fmt::Debug for SeqQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeqQueue")
            .field("joined", &self.joined)
            .field("waiting", &self.waiters.len())
            .finish()
    }
}

/// Result of joining a queue.
pub(crate) enum Enqueued {
    /// The queue was idle; run now.
    Start(SequentialTurn),
    /// Wait for the turn.
    Queued(QueuedTicket),
    /// The arrival was dropped.
    Rejected(NoOpReason),
}

fn drop_hook(hook: &Option<OnDropped>, lock: &Key, reason: DropReason, deferred: &mut Vec<Deferred>) {
    tracing::debug!(key = %lock, reason = ?reason, "sequential call dropped");
    if let Some(hook) = hook.clone() {
        let lock = lock.clone();
        deferred.push(Box::new(move || hook(&lock, reason)));
    }
}

/// Joins the queue for `config.lock`. Hooks are pushed to `deferred` and
/// must run after the session lock is released.
pub(crate) fn enqueue(
    session: &mut Session,
    shared: &Arc<Shared>,
    config: &ResolvedSequential,
    now: Instant,
    deferred: &mut Vec<Deferred>,
) -> Enqueued {
    let epoch = session.epoch;
    let lock = &config.lock;
    let queue = match session.sequential.entry(lock.clone()) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            entry.insert(SeqQueue::default());
            tracing::trace!(key = %lock, "sequential queue started");
            return Enqueued::Start(SequentialTurn {
                shared: Arc::clone(shared),
                lock: lock.clone(),
                epoch,
            });
        }
    };

    if config.max_queue_size.is_full(queue.waiters.len()) {
        let victim = if config.drop_oldest {
            queue.waiters.pop_front()
        } else {
            None
        };
        match victim {
            Some(victim) => {
                let _ = victim.grant.send(Grant::Dropped(DropReason::Superseded));
                drop_hook(&victim.on_dropped, lock, DropReason::Superseded, deferred);
            }
            None => {
                drop_hook(&config.on_dropped, lock, DropReason::QueueFull, deferred);
                return Enqueued::Rejected(NoOpReason::Dropped(DropReason::QueueFull));
            }
        }
    }

    queue.joined += 1;
    queue.next_id += 1;
    let position = queue.joined;
    let id = queue.next_id;
    let (tx, rx) = oneshot::channel();
    queue.waiters.push_back(Waiter {
        id,
        enqueued_at: now,
        timeout: config.queue_timeout,
        grant: tx,
        on_dropped: config.on_dropped.clone(),
    });
    tracing::debug!(key = %lock, position, "sequential call queued");
    if let Some(hook) = config.on_queued.clone() {
        let lock = lock.clone();
        deferred.push(Box::new(move || hook(&lock, position)));
    }

    Enqueued::Queued(QueuedTicket {
        shared: Arc::clone(shared),
        lock: lock.clone(),
        epoch,
        id,
        grant: rx,
        resolved: false,
    })
}

/// Hands the turn to the next live waiter, or removes the queue.
fn advance(shared: &Shared, lock: &Key, epoch: u64) {
    let mut deferred: Vec<Deferred> = Vec::new();
    shared.with_epoch(epoch, |session| {
        let now = Instant::now();
        let idle = match session.sequential.get_mut(lock) {
            None => false,
            Some(queue) => loop {
                let Some(waiter) = queue.waiters.pop_front() else {
                    break true;
                };
                let expired = waiter
                    .timeout
                    .is_some_and(|timeout| now.duration_since(waiter.enqueued_at) > timeout);
                if expired {
                    let _ = waiter.grant.send(Grant::Dropped(DropReason::Timeout));
                    drop_hook(&waiter.on_dropped, lock, DropReason::Timeout, &mut deferred);
                    continue;
                }
                if waiter.grant.send(Grant::Run).is_ok() {
                    tracing::trace!(key = %lock, waiter = waiter.id, "sequential turn handed over");
                    break false;
                }
            },
        };
        if idle {
            session.sequential.remove(lock);
            tracing::trace!(key = %lock, "sequential queue idle");
        }
    });
    super::run_deferred(deferred);
}

/// The right to run, held by the active call of a queue.
pub(crate) struct SequentialTurn {
    shared: Arc<Shared>,
    lock: Key,
    epoch: u64,
}

impl Drop for SequentialTurn {
    fn drop(&mut self) {
        advance(&self.shared, &self.lock, self.epoch);
    }
}

/// A queued call waiting for its turn.
pub(crate) struct QueuedTicket {
    shared: Arc<Shared>,
    lock: Key,
    epoch: u64,
    id: u64,
    grant: oneshot::Receiver<Grant>,
    resolved: bool,
}

impl QueuedTicket {
    /// Waits for the turn. `Err` carries why the call will not run.
    pub async fn wait(mut self) -> Result<SequentialTurn, NoOpReason> {
        let grant = (&mut self.grant).await;
        self.resolved = true;
        match grant {
            Ok(Grant::Run) => Ok(SequentialTurn {
                shared: Arc::clone(&self.shared),
                lock: self.lock.clone(),
                epoch: self.epoch,
            }),
            Ok(Grant::Dropped(reason)) => Err(NoOpReason::Dropped(reason)),
            Err(_) => Err(NoOpReason::Cleared),
        }
    }
}

impl Drop for QueuedTicket {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        match self.grant.try_recv() {
            // Granted but never picked up: pass the turn on.
            Ok(Grant::Run) => advance(&self.shared, &self.lock, self.epoch),
            Ok(Grant::Dropped(_)) | Err(oneshot::error::TryRecvError::Closed) => {}
            Err(oneshot::error::TryRecvError::Empty) => {
                let (lock, id) = (&self.lock, self.id);
                self.shared.with_epoch(self.epoch, |session| {
                    if let Some(queue) = session.sequential.get_mut(lock) {
                        queue.waiters.retain(|waiter| waiter.id != id);
                    }
                });
            }
        }
    }
}
