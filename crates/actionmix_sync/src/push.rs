//! Optimistic sync with server push.
//!
//! Works like [`OptimisticSync`](crate::OptimisticSync) but tracks a local
//! revision per key, bumped on every dispatch. A follow-up is sent whenever
//! the local revision moved on since the request was sent, even if the value
//! cycled back to what was sent.
//!
//! Server revisions order everything the server says: a response or a push
//! touches state only if its revision is strictly greater than the stored
//! one.

use crate::chain::Chain;
use crate::config::SyncConfig;
use crate::revision::{DeviceId, RevisionInformer, ServerRevision, ServerRevisionAccess};
use actionmix_core::{
    ActionError, Dispatched, Key, MixResult, Mixer, NoOpReason, Outcome, ProgrammingError, Store,
};
use async_trait::async_trait;
use futures::FutureExt;
use std::fmt;
use std::sync::Arc;

const IN_FLIGHT: &str = "optimistic-sync-push";
const LOCAL_REVISION: &str = "local-revision";
const SENT_REVISION: &str = "sent-revision";

/// What a push-aware send receives.
#[derive(Debug, Clone)]
pub struct PushRequest<V> {
    /// The value to store.
    pub value: V,
    /// The local revision current when the value was read.
    pub local_revision: u64,
    /// This client.
    pub device_id: DeviceId,
    /// Must be told the server revision before the send returns.
    pub informer: RevisionInformer,
}

/// One kind of push-aware optimistic mutation against state `S`.
#[async_trait]
pub trait PushCommand<S>: Send + Sync + 'static {
    /// The value sent to the server.
    type Value: Clone + Send + Sync + 'static;
    /// What the server answers with.
    type Response: Send + 'static;

    /// Computes the new local value from the current state.
    fn value_to_apply(&self, state: &S) -> Self::Value;

    /// Returns `state` with `value` applied.
    fn apply_optimistic_value(&self, state: &S, value: &Self::Value) -> S;

    /// Reads the value this command manages back out of state.
    fn value_from_state(&self, state: &S) -> Self::Value;

    /// Sends the request. On success it must call
    /// `request.informer.inform(..)` first; returning without doing so is a
    /// [`ProgrammingError::ServerRevisionNotInformed`].
    async fn send_value_to_server(
        &self,
        request: PushRequest<Self::Value>,
    ) -> MixResult<Option<Self::Response>>;

    /// Maps the final response of a chain onto state.
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
}

/// An out-of-band change announced by the server.
pub struct ServerPush<S> {
    /// The key the change belongs to.
    pub key: Key,
    /// The revision the server assigned to the change.
    pub server_revision: ServerRevision,
    /// The local revision of the write that caused it, as the writer sent it.
    pub local_revision: u64,
    /// The device that wrote it.
    pub device_id: DeviceId,
    apply: Box<dyn FnOnce(S) -> S + Send>,
}

impl<S> ServerPush<S> {
    /// Creates a push whose `apply` maps the current state to the new one.
    pub fn new(
        key: impl Into<Key>,
        server_revision: impl Into<ServerRevision>,
        local_revision: u64,
        device_id: DeviceId,
        apply: impl FnOnce(S) -> S + Send + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            server_revision: server_revision.into(),
            local_revision,
            device_id,
            apply: Box::new(apply),
        }
    }
}

impl<S> fmt::Debug for ServerPush<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerPush")
            .field("key", &self.key)
            .field("server_revision", &self.server_revision)
            .field("local_revision", &self.local_revision)
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// What [`OptimisticSyncWithPush::server_push`] did with a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushDisposition {
    /// Applied.
    Applied,
    /// Applied; it echoes a write this client already sent.
    AppliedSelfEcho,
    /// Ignored: its revision does not exceed the stored one.
    Stale,
}

/// The optimistic-sync engine with revision reconciliation.
pub struct OptimisticSyncWithPush<S> {
    mixer: Mixer,
    store: Arc<dyn Store<S>>,
    revisions: Arc<dyn ServerRevisionAccess<S>>,
    config: SyncConfig,
}

impl<S> Clone for OptimisticSyncWithPush<S> {
    fn clone(&self) -> Self {
        Self {
            mixer: self.mixer.clone(),
            store: Arc::clone(&self.store),
            revisions: Arc::clone(&self.revisions),
            config: self.config.clone(),
        }
    }
}

impl<S: Send + 'static> OptimisticSyncWithPush<S> {
    /// Creates an engine over `store`, reading and writing server revisions
    /// through `revisions`.
    pub fn new(
        mixer: Mixer,
        store: Arc<dyn Store<S>>,
        revisions: Arc<dyn ServerRevisionAccess<S>>,
    ) -> Self {
        Self {
            mixer,
            store,
            revisions,
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

    /// The current local revision of `key` (0 before the first dispatch).
    pub fn local_revision(&self, key: &Key) -> u64 {
        self.mixer.counter(&key.scoped(LOCAL_REVISION))
    }

    /// Applies `command` optimistically and syncs it under `key`.
    ///
    /// The local revision is bumped and state updated before this returns,
    /// whether or not a request is sent.
    ///
    /// As with [`OptimisticSync::dispatch`](crate::OptimisticSync::dispatch),
    /// a pending outcome must be awaited or [spawned](Outcome::spawn) for
    /// the request to go out.
    pub fn dispatch<C>(&self, key: impl Into<Key>, command: C) -> Outcome<()>
    where
        C: PushCommand<S>,
    {
        let key = key.into();
        let revision = self.mixer.increment_counter(&key.scoped(LOCAL_REVISION));
        let state = self.store.state();
        let value = command.value_to_apply(&state);
        self.store
            .emit(command.apply_optimistic_value(&state, &value));
        tracing::trace!(key = %key, local_revision = revision, "optimistic value applied");

        let Some(chain) =
            Chain::try_start(&self.mixer, &key, IN_FLIGHT, self.config.max_follow_up_requests)
        else {
            tracing::debug!(key = %key, local_revision = revision, "request in flight, coalescing");
            return Outcome::Immediate(Ok(Dispatched::NoOp(NoOpReason::Coalesced)));
        };
        let engine = self.clone();
        Outcome::Pending(
            async move { engine.run(chain, command, value, revision).await }.boxed(),
        )
    }

    async fn run<C>(
        &self,
        mut chain: Chain,
        command: C,
        mut value: C::Value,
        mut sent_revision: u64,
    ) -> MixResult<Dispatched<()>>
    where
        C: PushCommand<S>,
    {
        let key = chain.key().clone();
        let local_key = key.scoped(LOCAL_REVISION);
        let sent_key = key.scoped(SENT_REVISION);
        loop {
            chain.mixer().set_counter(&sent_key, sent_revision);
            let informer = RevisionInformer::new();
            let request = PushRequest {
                value: value.clone(),
                local_revision: sent_revision,
                device_id: self.config.device_id,
                informer: informer.clone(),
            };
            let (reply, error) = match command.send_value_to_server(request).await {
                Ok(response) => match informer.take() {
                    Some(revision) => (Some((revision, response)), None),
                    None => {
                        tracing::warn!(key = %key, "send returned without informing the server revision");
                        let error = ProgrammingError::ServerRevisionNotInformed { key: key.clone() };
                        (None, Some(error.into()))
                    }
                },
                Err(error) => (None, Some(error)),
            };
            let error = match command.on_finish(&self.store.state(), &value, error.as_ref()) {
                Ok(Some(next)) => {
                    self.store.emit(next);
                    error
                }
                Ok(None) => error,
                Err(hook_error) => Some(hook_error),
            };
            if error.as_ref().is_some_and(ActionError::is_programming) {
                return chain.finish(error);
            }

            let current = chain.mixer().counter(&local_key);
            if current > sent_revision {
                if let Some((revision, _)) = reply {
                    self.record_revision(&key, revision);
                }
                if let Err(limit) = chain.follow_up(error.as_ref()) {
                    return chain.finish(Some(limit));
                }
                sent_revision = current;
                value = command.value_from_state(&self.store.state());
                continue;
            }

            if let Some((revision, response)) = reply {
                self.apply_response(&command, &key, revision, response);
            }
            tracing::debug!(key = %key, failed = error.is_some(), "optimistic sync settled");
            return chain.finish(error);
        }
    }

    /// Stores `revision` without touching the rest of state.
    fn record_revision(&self, key: &Key, revision: ServerRevision) {
        let state = self.store.state();
        if revision.supersedes(self.revisions.server_revision(&state, key)) {
            self.store
                .emit(self.revisions.with_server_revision(state, key, revision));
        }
    }

    fn apply_response<C>(&self, command: &C, key: &Key, revision: ServerRevision, response: Option<C::Response>)
    where
        C: PushCommand<S>,
    {
        let state = self.store.state();
        let stored = self.revisions.server_revision(&state, key);
        if !revision.supersedes(stored) {
            tracing::debug!(key = %key, revision = %revision, stored = ?stored, "stale response ignored");
            return;
        }
        let applied = response.and_then(|response| command.apply_server_response(&state, response));
        let next = applied.unwrap_or(state);
        self.store
            .emit(self.revisions.with_server_revision(next, key, revision));
    }

    /// Merges a server push into state if its revision is newer than the
    /// stored one.
    pub fn server_push(&self, push: ServerPush<S>) -> PushDisposition {
        let ServerPush {
            key,
            server_revision,
            local_revision,
            device_id,
            apply,
        } = push;
        let self_echo = device_id == self.config.device_id
            && local_revision <= self.mixer.counter(&key.scoped(SENT_REVISION));

        let state = self.store.state();
        let stored = self.revisions.server_revision(&state, &key);
        if !server_revision.supersedes(stored) {
            tracing::debug!(
                key = %key,
                revision = %server_revision,
                stored = ?stored,
                self_echo,
                "stale push ignored"
            );
            return PushDisposition::Stale;
        }
        let next = apply(state);
        self.store
            .emit(self.revisions.with_server_revision(next, &key, server_revision));
        tracing::debug!(key = %key, revision = %server_revision, self_echo, "push applied");
        if self_echo {
            PushDisposition::AppliedSelfEcho
        } else {
            PushDisposition::Applied
        }
    }
}
