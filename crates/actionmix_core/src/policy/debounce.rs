//! Debounce: only the last call within the quiet period runs.
//!
//! Registering bumps the slot's generation and wakes the previous sleeper,
//! which resolves to [`NoOpReason::Debounced`] without reaching any later
//! policy. The slot is removed by whichever ticket owns the latest
//! generation once it wakes or is dropped.

use crate::action::NoOpReason;
use crate::config::ResolvedDebounce;
use crate::key::Key;
use crate::session::Shared;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant};

/// Per-key debounce state.
#[derive(Debug)]
pub(crate) struct DebounceSlot {
    generation: u64,
    supersede: Option<oneshot::Sender<()>>,
}

/// One registered call waiting out the quiet period.
pub(crate) struct DebounceTicket {
    shared: Arc<Shared>,
    lock: Key,
    generation: u64,
    epoch: u64,
    deadline: Instant,
    superseded: oneshot::Receiver<()>,
}

impl DebounceTicket {
    /// Registers a call and supersedes the pending one, if any.
    pub fn register(shared: &Arc<Shared>, config: &ResolvedDebounce) -> Self {
        let (tx, rx) = oneshot::channel();
        let mut session = shared.session.lock();
        let epoch = session.epoch;
        let slot = session
            .debounce
            .entry(config.lock.clone())
            .or_insert(DebounceSlot {
                generation: 0,
                supersede: None,
            });
        slot.generation += 1;
        if let Some(previous) = slot.supersede.replace(tx) {
            // The previous ticket may already be gone.
            let _ = previous.send(());
        }
        tracing::trace!(key = %config.lock, generation = slot.generation, "debounce registered");
        Self {
            shared: Arc::clone(shared),
            lock: config.lock.clone(),
            generation: slot.generation,
            epoch,
            deadline: Instant::now() + config.duration,
            superseded: rx,
        }
    }

    /// Waits out the quiet period. `Err` means this call must not run.
    pub async fn wait(mut self) -> Result<(), NoOpReason> {
        tokio::select! {
            _ = sleep_until(self.deadline) => {}
            signal = &mut self.superseded => {
                return Err(match signal {
                    Ok(()) => NoOpReason::Debounced,
                    Err(_) => NoOpReason::Cleared,
                });
            }
        }
        match self.owns_slot() {
            Some(true) => Ok(()),
            Some(false) => Err(NoOpReason::Debounced),
            None => Err(NoOpReason::Cleared),
        }
    }

    fn owns_slot(&self) -> Option<bool> {
        self.shared.with_epoch(self.epoch, |session| {
            session
                .debounce
                .get(&self.lock)
                .is_some_and(|slot| slot.generation == self.generation)
        })
    }
}

impl Drop for DebounceTicket {
    fn drop(&mut self) {
        let (lock, generation) = (&self.lock, self.generation);
        self.shared.with_epoch(self.epoch, |session| {
            if session
                .debounce
                .get(lock)
                .is_some_and(|slot| slot.generation == generation)
            {
                session.debounce.remove(lock);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::StaticProbe;
    use std::time::Duration;

    fn setup() -> (Arc<Shared>, ResolvedDebounce) {
        let shared = Arc::new(Shared::new(Arc::new(StaticProbe::new(true))));
        let config = ResolvedDebounce {
            lock: Key::from("search"),
            duration: Duration::from_millis(300),
        };
        (shared, config)
    }

    #[tokio::test(start_paused = true)]
    async fn latest_call_survives() {
        let (shared, config) = setup();
        let first = DebounceTicket::register(&shared, &config);
        tokio::time::advance(Duration::from_millis(100)).await;
        let second = DebounceTicket::register(&shared, &config);

        assert_eq!(first.wait().await, Err(NoOpReason::Debounced));
        assert_eq!(second.wait().await, Ok(()));
        assert!(shared.session.lock().debounce.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_period_counts_from_last_call() {
        let (shared, config) = setup();
        let start = Instant::now();
        let ticket = DebounceTicket::register(&shared, &config);
        ticket.wait().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_resolves_sleepers() {
        let (shared, config) = setup();
        let ticket = DebounceTicket::register(&shared, &config);
        let old = std::mem::replace(&mut *shared.session.lock(), Session::new(1));
        drop(old);
        assert_eq!(ticket.wait().await, Err(NoOpReason::Cleared));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_ticket_frees_slot() {
        let (shared, config) = setup();
        let ticket = DebounceTicket::register(&shared, &config);
        assert_eq!(shared.session.lock().debounce.len(), 1);
        drop(ticket);
        assert!(shared.session.lock().debounce.is_empty());
    }
}
