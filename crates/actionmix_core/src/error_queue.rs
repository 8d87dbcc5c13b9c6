//! Bounded queue of user-facing exceptions.
//!
//! UI layers pop one exception at a time (e.g. to show a dialog) and listen
//! on [`ErrorQueue::subscribe`] to learn when a new one arrives. When more
//! exceptions arrive than the capacity allows, the oldest are dropped.

use crate::error::UserException;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::broadcast;

/// Default queue capacity.
pub const DEFAULT_MAX_ERRORS_QUEUED: usize = 10;

const NOTIFY_CAPACITY: usize = 64;

/// A bounded FIFO of user exceptions with a broadcast notification channel.
pub struct ErrorQueue {
    inner: Mutex<Inner>,
    notify: broadcast::Sender<UserException>,
}

struct Inner {
    queue: VecDeque<UserException>,
    capacity: usize,
}

impl ErrorQueue {
    /// Creates a queue holding at most `capacity` exceptions.
    pub fn new(capacity: usize) -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                capacity,
            }),
            notify,
        }
    }

    /// Appends an exception, dropping the oldest past capacity, and
    /// notifies subscribers.
    pub fn push(&self, exception: UserException) {
        {
            let mut inner = self.inner.lock();
            inner.queue.push_back(exception.clone());
            while inner.queue.len() > inner.capacity {
                if let Some(dropped) = inner.queue.pop_front() {
                    tracing::debug!(message = %dropped, "error queue full, dropping oldest");
                }
            }
        }
        // No subscribers is fine.
        let _ = self.notify.send(exception);
    }

    /// Removes and returns the oldest exception.
    pub fn pop(&self) -> Option<UserException> {
        self.inner.lock().queue.pop_front()
    }

    /// Returns the oldest exception without removing it.
    pub fn peek(&self) -> Option<UserException> {
        self.inner.lock().queue.front().cloned()
    }

    /// Removes and returns every queued exception, oldest first.
    pub fn drain(&self) -> Vec<UserException> {
        self.inner.lock().queue.drain(..).collect()
    }

    /// Number of queued exceptions.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Current capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Subscribes to every exception pushed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<UserException> {
        self.notify.subscribe()
    }

    /// Empties the queue and optionally changes its capacity.
    ///
    /// Subscribers stay subscribed.
    pub(crate) fn reset(&self, capacity: Option<usize>) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        if let Some(capacity) = capacity {
            inner.capacity = capacity;
        }
    }
}

impl Default for ErrorQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ERRORS_QUEUED)
    }
}

impl std::fmt::Debug for ErrorQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ErrorQueue")
            .field("len", &inner.queue.len())
            .field("capacity", &inner.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let queue = ErrorQueue::new(5);
        queue.push(UserException::new("a"));
        queue.push(UserException::new("b"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peek().unwrap().message, "a");
        assert_eq!(queue.pop().unwrap().message, "a");
        assert_eq!(queue.pop().unwrap().message, "b");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn oldest_dropped_past_capacity() {
        let queue = ErrorQueue::new(2);
        for m in ["a", "b", "c"] {
            queue.push(UserException::new(m));
        }
        let messages: Vec<_> = queue.drain().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn subscribers_see_pushes() {
        let queue = ErrorQueue::default();
        let mut rx = queue.subscribe();
        queue.push(UserException::new("offline"));
        assert_eq!(rx.try_recv().unwrap().message, "offline");
    }

    #[test]
    fn reset_keeps_subscribers_and_changes_capacity() {
        let queue = ErrorQueue::default();
        let mut rx = queue.subscribe();
        queue.push(UserException::new("x"));
        queue.reset(Some(1));
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 1);

        queue.push(UserException::new("y"));
        queue.push(UserException::new("z"));
        assert_eq!(queue.len(), 1);
        assert_eq!(rx.try_recv().unwrap().message, "x");
        assert_eq!(rx.try_recv().unwrap().message, "y");
    }
}
