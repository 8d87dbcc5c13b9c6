//! Integration tests for the optimistic-sync engine.

use actionmix_core::{
    ActionError, Dispatched, Key, MemoryStore, MixResult, Mixer, NoOpReason, StaticProbe, Store,
};
use actionmix_sync::{OptimisticCommand, OptimisticSync, SyncConfig};
use actionmix_testkit::{init_tracing, FakeServer, Recorder, Reply};
use async_trait::async_trait;
use proptest::prelude::*;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq)]
struct Post {
    liked: bool,
    likes: i64,
}

/// Flips `liked`; the server answers with the normalised like count.
struct ToggleLike {
    server: Arc<FakeServer<i64>>,
    finished: Recorder<Option<String>>,
}

#[async_trait]
impl OptimisticCommand<Post> for ToggleLike {
    type Value = bool;
    type Response = Reply<i64>;

    fn value_to_apply(&self, state: &Post) -> bool {
        !state.liked
    }

    fn apply_optimistic_value(&self, state: &Post, liked: &bool) -> Post {
        Post {
            liked: *liked,
            likes: state.likes + if *liked { 1 } else { -1 },
        }
    }

    fn value_from_state(&self, state: &Post) -> bool {
        state.liked
    }

    async fn send_value_to_server(&self, liked: bool) -> MixResult<Option<Reply<i64>>> {
        let reply = self.server.send(i64::from(liked)).await?;
        Ok(Some(reply))
    }

    fn apply_server_response(&self, state: &Post, reply: Reply<i64>) -> Option<Post> {
        Some(Post {
            likes: reply.value,
            ..state.clone()
        })
    }

    fn on_finish(
        &self,
        _state: &Post,
        _optimistic_value: &bool,
        error: Option<&ActionError>,
    ) -> MixResult<Option<Post>> {
        self.finished.push(error.map(|e| e.to_string()));
        Ok(None)
    }
}

struct Fixture {
    mixer: Mixer,
    store: Arc<MemoryStore<Post>>,
    engine: OptimisticSync<Post>,
    server: Arc<FakeServer<i64>>,
    finished: Recorder<Option<String>>,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let mixer = Mixer::with_probe(StaticProbe::new(true));
        let store = Arc::new(MemoryStore::new(Post::default()));
        let engine = OptimisticSync::new(mixer.clone(), store.clone());
        // The server normalises the stored value to `v + 5`.
        let server = Arc::new(FakeServer::new(|v: i64| v + 5));
        Self {
            mixer,
            store,
            engine,
            server,
            finished: Recorder::new(),
        }
    }

    fn toggle(&self) -> actionmix_core::Outcome<()> {
        self.engine.dispatch(
            "like",
            ToggleLike {
                server: Arc::clone(&self.server),
                finished: self.finished.clone(),
            },
        )
    }
}

#[tokio::test(start_paused = true)]
async fn single_toggle_sends_once() {
    let fx = Fixture::new();
    let outcome = fx.toggle();
    assert!(fx.store.state().liked);
    assert!(fx.mixer.is_waiting(&Key::from("like")));

    assert_eq!(outcome.await.unwrap(), Dispatched::Value(()));
    let state = fx.store.state();
    assert!(state.liked);
    assert_eq!(state.likes, 6);
    assert_eq!(fx.server.received(), vec![1]);
    assert_eq!(fx.finished.items(), vec![None]);
    assert!(!fx.mixer.is_waiting(&Key::from("like")));
}

#[tokio::test(start_paused = true)]
async fn spawned_toggle_reaches_server() {
    let fx = Fixture::new();
    let handle = fx.toggle().spawn();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fx.server.received(), vec![1]);
    assert_eq!(fx.store.state().likes, 6);
    assert_eq!(handle.await.unwrap().unwrap(), Dispatched::Value(()));
}

#[tokio::test(start_paused = true)]
async fn dropped_outcome_sends_nothing_and_frees_key() {
    let fx = Fixture::new();
    drop(fx.toggle());
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(fx.store.state().liked);
    assert!(fx.server.received().is_empty());
    assert!(!fx.mixer.is_waiting(&Key::from("like")));

    // The next toggle owns the key again.
    assert_eq!(fx.toggle().await.unwrap(), Dispatched::Value(()));
    assert_eq!(fx.server.received(), vec![0]);
    assert_eq!(fx.store.state().likes, 5);
}

#[tokio::test(start_paused = true)]
async fn toggles_during_flight_coalesce() {
    let fx = Fixture::new();
    let first = fx.toggle();
    assert_eq!(
        fx.toggle().immediate().unwrap().unwrap(),
        Dispatched::NoOp(NoOpReason::Coalesced)
    );
    assert_eq!(
        fx.toggle().immediate().unwrap().unwrap(),
        Dispatched::NoOp(NoOpReason::Coalesced)
    );

    first.await.unwrap();
    // true, false, true: back where the first request left off.
    assert_eq!(fx.server.received(), vec![1]);
    assert!(fx.store.state().liked);
}

#[tokio::test(start_paused = true)]
async fn divergence_triggers_one_follow_up() {
    let fx = Fixture::new();
    let first = fx.toggle();
    let _ = fx.toggle();

    first.await.unwrap();
    assert_eq!(fx.server.received(), vec![1, 0]);
    assert_eq!(fx.server.max_in_flight(), 1);
    assert_eq!(fx.finished.len(), 2);
    let state = fx.store.state();
    assert!(!state.liked);
    // Only the follow-up's response (0 + 5) reached state.
    assert_eq!(state.likes, 5);
}

#[tokio::test(start_paused = true)]
async fn failure_of_superseded_request_is_not_routed() {
    let fx = Fixture::new();
    let handled = Recorder::new();
    let sink = handled.clone();
    fx.mixer.set_error_handler(move |_, error| sink.push(error.to_string()));
    fx.server.fail_next(ActionError::msg("timeout"));

    let first = fx.toggle();
    let _ = fx.toggle();

    assert_eq!(first.await.unwrap(), Dispatched::Value(()));
    assert_eq!(
        fx.finished.items(),
        vec![Some("timeout".to_string()), None]
    );
    assert!(handled.is_empty());
    assert!(fx.mixer.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn final_failure_is_routed_and_releases_key() {
    let fx = Fixture::new();
    let handled = Recorder::new();
    let sink = handled.clone();
    fx.mixer.set_error_handler(move |_, error| sink.push(error.to_string()));
    fx.server.fail_next(ActionError::msg("down"));

    assert!(fx.toggle().await.is_err());
    assert_eq!(handled.items(), vec!["down".to_string()]);

    // The in-flight flag was released: the next toggle sends again.
    assert_eq!(fx.toggle().await.unwrap(), Dispatched::Value(()));
    assert_eq!(fx.server.request_count(), 2);
}

/// Sets the value, and on every completion drifts state away again.
struct Drift;

#[async_trait]
impl OptimisticCommand<i64> for Drift {
    type Value = i64;
    type Response = ();

    fn value_to_apply(&self, state: &i64) -> i64 {
        state + 1
    }

    fn apply_optimistic_value(&self, _state: &i64, value: &i64) -> i64 {
        *value
    }

    fn value_from_state(&self, state: &i64) -> i64 {
        *state
    }

    async fn send_value_to_server(&self, _value: i64) -> MixResult<Option<()>> {
        Ok(None)
    }

    fn on_finish(&self, state: &i64, _value: &i64, _error: Option<&ActionError>) -> MixResult<Option<i64>> {
        Ok(Some(state + 1))
    }
}

#[tokio::test]
async fn endless_divergence_hits_follow_up_limit() {
    let mixer = Mixer::with_probe(StaticProbe::new(true));
    let handled = Recorder::new();
    let sink = handled.clone();
    mixer.set_error_handler(move |_, error| sink.push(error.is_programming()));
    let store = Arc::new(MemoryStore::new(0i64));
    let engine = OptimisticSync::new(mixer.clone(), store.clone())
        .with_config(SyncConfig::new().with_max_follow_up_requests(3));

    let error = engine.dispatch("drift", Drift).await.unwrap_err();
    assert!(error.is_programming());
    assert_eq!(handled.items(), vec![true]);
    assert!(mixer.errors().is_empty());
    // One initial request, three follow-ups, then the fourth on_finish drift.
    assert_eq!(store.state(), 5);
}

/// Sets state to a fixed number.
struct SetValue {
    value: i64,
    server: Arc<FakeServer<i64>>,
}

#[async_trait]
impl OptimisticCommand<i64> for SetValue {
    type Value = i64;
    type Response = ();

    fn value_to_apply(&self, _state: &i64) -> i64 {
        self.value
    }

    fn apply_optimistic_value(&self, _state: &i64, value: &i64) -> i64 {
        *value
    }

    fn value_from_state(&self, state: &i64) -> i64 {
        *state
    }

    async fn send_value_to_server(&self, value: i64) -> MixResult<Option<()>> {
        self.server.send(value).await?;
        Ok(None)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn one_request_in_flight_and_last_value_wins(
        steps in prop::collection::vec((0u64..150, 0i64..4), 1..12)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        let (received, max_in_flight, last_state) = runtime.block_on(async {
            let mixer = Mixer::with_probe(StaticProbe::new(true));
            let store = Arc::new(MemoryStore::new(-1i64));
            let engine = OptimisticSync::new(mixer, store.clone());
            let server = Arc::new(FakeServer::new(|v: i64| v).with_latency(Duration::from_millis(100)));

            let mut chains = Vec::new();
            for (gap, value) in &steps {
                tokio::time::sleep(Duration::from_millis(*gap)).await;
                let outcome = engine.dispatch(
                    "k",
                    SetValue { value: *value, server: Arc::clone(&server) },
                );
                if !outcome.is_immediate() {
                    chains.push(tokio::spawn(outcome.into_future()));
                }
            }
            for chain in chains {
                chain.await.unwrap().unwrap();
            }
            (server.received(), server.max_in_flight(), store.state())
        });

        let last_dispatched = steps.last().map(|(_, v)| *v).unwrap();
        prop_assert_eq!(max_in_flight, 1);
        prop_assert_eq!(last_state, last_dispatched);
        prop_assert_eq!(received.last().copied(), Some(last_dispatched));
        prop_assert!(received.len() <= steps.len());
    }
}
