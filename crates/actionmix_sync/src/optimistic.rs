//! Optimistic sync without server push.
//!
//! Every dispatch applies its value to state at once. Only the network call
//! is coalesced: while a request for a key is in flight, further dispatches
//! just update state, and the in-flight chain sends one follow-up with the
//! latest value if state no longer matches what it sent.

use crate::chain::Chain;
use crate::config::SyncConfig;
use actionmix_core::{
    ActionError, Dispatched, Key, MixResult, Mixer, NoOpReason, Outcome, Store,
};
use async_trait::async_trait;
use futures::FutureExt;
use std::sync::Arc;

const IN_FLIGHT: &str = "optimistic-sync";

/// One kind of optimistic mutation against state `S`.
#[async_trait]
pub trait OptimisticCommand<S>: Send + Sync + 'static {
    /// The value sent to the server.
    type Value: Clone + PartialEq + Send + Sync + 'static;
    /// What the server answers with.
    type Response: Send + 'static;

    /// Computes the new local value from the current state.
    fn value_to_apply(&self, state: &S) -> Self::Value;

    /// Returns `state` with `value` applied.
    fn apply_optimistic_value(&self, state: &S, value: &Self::Value) -> S;

    /// Reads the value this command manages back out of state.
    fn value_from_state(&self, state: &S) -> Self::Value;

    /// Sends `value`. `Ok(None)` means the server had nothing to say.
    async fn send_value_to_server(&self, value: Self::Value) -> MixResult<Option<Self::Response>>;

    /// Maps the final response of a chain onto state. `None` leaves state
    /// alone.
    fn apply_server_response(&self, _state: &S, _response: Self::Response) -> Option<S> {
        None
    }

    /// Runs after every request. `Some` replaces state; an error supersedes
    /// the request's outcome.
    fn on_finish(
        &self,
        _state: &S,
        _optimistic_value: &Self::Value,
        _error: Option<&ActionError>,
    ) -> MixResult<Option<S>> {
        Ok(None)
    }

    /// Decides whether state has moved away from what was sent.
    fn should_send_another_request(&self, sent: &Self::Value, current: &Self::Value) -> bool {
        sent != current
    }
}

/// The optimistic-sync engine.
pub struct OptimisticSync<S> {
    mixer: Mixer,
    store: Arc<dyn Store<S>>,
    config: SyncConfig,
}

impl<S> Clone for OptimisticSync<S> {
    fn clone(&self) -> Self {
        Self {
            mixer: self.mixer.clone(),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: Send + 'static> OptimisticSync<S> {
    /// Creates an engine over `store`.
    pub fn new(mixer: Mixer, store: Arc<dyn Store<S>>) -> Self {
        Self {
            mixer,
            store,
            config: SyncConfig::default(),
        }
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Applies `command` optimistically and syncs it under `key`.
    ///
    /// State is updated before this returns. If a request for `key` is
    /// already in flight the result is an immediate
    /// [`NoOpReason::Coalesced`]; the running chain picks the change up.
    ///
    /// Otherwise the request chain is the returned pending outcome. It only
    /// runs once awaited or [spawned](Outcome::spawn); dropping it sends
    /// nothing and frees the key, leaving the optimistic value in state.
    pub fn dispatch<C>(&self, key: impl Into<Key>, command: C) -> Outcome<()>
    where
        C: OptimisticCommand<S>,
    {
        let key = key.into();
        let state = self.store.state();
        let value = command.value_to_apply(&state);
        self.store
            .emit(command.apply_optimistic_value(&state, &value));
        tracing::trace!(key = %key, "optimistic value applied");

        let Some(chain) =
            Chain::try_start(&self.mixer, &key, IN_FLIGHT, self.config.max_follow_up_requests)
        else {
            tracing::debug!(key = %key, "request in flight, coalescing");
            return Outcome::Immediate(Ok(Dispatched::NoOp(NoOpReason::Coalesced)));
        };
        let store = Arc::clone(&self.store);
        Outcome::Pending(run(chain, store, command, value).boxed())
    }
}

async fn run<S, C>(
    mut chain: Chain,
    store: Arc<dyn Store<S>>,
    command: C,
    mut sent: C::Value,
) -> MixResult<Dispatched<()>>
where
    S: Send + 'static,
    C: OptimisticCommand<S>,
{
    loop {
        let (response, error) = match command.send_value_to_server(sent.clone()).await {
            Ok(response) => (response, None),
            Err(error) => (None, Some(error)),
        };
        let error = match command.on_finish(&store.state(), &sent, error.as_ref()) {
            Ok(Some(next)) => {
                store.emit(next);
                error
            }
            Ok(None) => error,
            Err(hook_error) => Some(hook_error),
        };
        if error.as_ref().is_some_and(ActionError::is_programming) {
            return chain.finish(error);
        }

        let current = command.value_from_state(&store.state());
        if command.should_send_another_request(&sent, &current) {
            if let Err(limit) = chain.follow_up(error.as_ref()) {
                return chain.finish(Some(limit));
            }
            sent = current;
            continue;
        }

        if let Some(response) = response {
            let state = store.state();
            if let Some(next) = command.apply_server_response(&state, response) {
                store.emit(next);
            }
        }
        tracing::debug!(key = %chain.key(), failed = error.is_some(), "optimistic sync settled");
        return chain.finish(error);
    }
}
