//! Integration tests for the sequential queue.

use actionmix_core::{
    Action, Dispatched, DropReason, Key, MixConfig, Mixer, NoOpReason, SequentialConfig,
    StaticProbe,
};
use futures::future::join_all;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

fn mixer() -> Mixer {
    Mixer::with_probe(StaticProbe::new(true))
}

/// Records `id` when it starts and again when it finishes.
fn job(log: &Arc<Mutex<Vec<String>>>, id: u32, duration: Duration) -> Action<u32> {
    let log = Arc::clone(log);
    Action::future(move || {
        log.lock().push(format!("start {id}"));
        let log = Arc::clone(&log);
        async move {
            tokio::time::sleep(duration).await;
            log.lock().push(format!("end {id}"));
            Ok(id)
        }
    })
}

#[tokio::test(start_paused = true)]
async fn runs_in_dispatch_order_regardless_of_duration() {
    let mixer = mixer();
    let log = Arc::new(Mutex::new(Vec::new()));
    let outcomes: Vec<_> = (1..=4)
        .map(|id| {
            let duration = Duration::from_millis(50 - u64::from(id) * 10);
            mixer
                .dispatch("queue", job(&log, id, duration), MixConfig::new().sequential(SequentialConfig::default()))
                .into_future()
        })
        .collect();

    let results = join_all(outcomes).await;
    let values: Vec<_> = results.into_iter().map(|r| r.unwrap().value()).collect();
    assert_eq!(values, vec![Some(1), Some(2), Some(3), Some(4)]);
    assert_eq!(
        *log.lock(),
        vec![
            "start 1", "end 1", "start 2", "end 2", "start 3", "end 3", "start 4", "end 4"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn queued_positions_count_arrivals_until_idle() {
    let mixer = mixer();
    let log = Arc::new(Mutex::new(Vec::new()));
    let queued = Arc::new(Mutex::new(Vec::new()));
    let dispatch = |id| {
        let queued = Arc::clone(&queued);
        let config = MixConfig::new().sequential(
            SequentialConfig::default().with_on_queued(move |_, position| queued.lock().push(position)),
        );
        tokio::spawn(
            mixer
                .dispatch("q", job(&log, id, Duration::from_millis(100)), config)
                .into_future(),
        )
    };

    let first = dispatch(1);
    let second = dispatch(2);
    // 1 has finished and 2 is running when 3 arrives: 3 is alone in the
    // queue but still gets the next index.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let third = dispatch(3);
    for handle in [first, second, third] {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(*queued.lock(), vec![1, 2]);

    // The queue went idle, so numbering starts over.
    let fourth = dispatch(4);
    let fifth = dispatch(5);
    fourth.await.unwrap().unwrap();
    fifth.await.unwrap().unwrap();
    assert_eq!(*queued.lock(), vec![1, 2, 1]);
}

#[tokio::test(start_paused = true)]
async fn latest_wins_keeps_first_and_last() {
    let mixer = mixer();
    let log = Arc::new(Mutex::new(Vec::new()));
    let queued = Arc::new(Mutex::new(Vec::new()));
    let dropped = Arc::new(Mutex::new(Vec::new()));
    let config = {
        let (queued, dropped) = (Arc::clone(&queued), Arc::clone(&dropped));
        move || {
            let (queued, dropped) = (Arc::clone(&queued), Arc::clone(&dropped));
            MixConfig::new().sequential(
                SequentialConfig::latest_wins()
                    .with_on_queued(move |_, position| queued.lock().push(position))
                    .with_on_dropped(move |_, reason| dropped.lock().push(reason)),
            )
        }
    };

    let outcomes: Vec<_> = (1..=4)
        .map(|id| {
            mixer
                .dispatch("save", job(&log, id, Duration::from_millis(100)), config())
                .into_future()
        })
        .collect();
    let results: Vec<_> = join_all(outcomes)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(
        results,
        vec![
            Dispatched::Value(1),
            Dispatched::NoOp(NoOpReason::Dropped(DropReason::Superseded)),
            Dispatched::NoOp(NoOpReason::Dropped(DropReason::Superseded)),
            Dispatched::Value(4),
        ]
    );
    assert_eq!(*log.lock(), vec!["start 1", "end 1", "start 4", "end 4"]);
    assert_eq!(*queued.lock(), vec![1, 2, 3]);
    assert_eq!(
        *dropped.lock(),
        vec![DropReason::Superseded, DropReason::Superseded]
    );
}

#[tokio::test(start_paused = true)]
async fn full_queue_rejects_new_arrivals() {
    let mixer = mixer();
    let log = Arc::new(Mutex::new(Vec::new()));
    let config = || MixConfig::new().sequential(SequentialConfig::default().with_max_queue_size(1));

    let first = mixer.dispatch("k", job(&log, 1, Duration::from_millis(10)), config());
    let second = mixer.dispatch("k", job(&log, 2, Duration::from_millis(10)), config());
    let third = mixer.dispatch("k", job(&log, 3, Duration::from_millis(10)), config());

    assert_eq!(
        third.immediate().unwrap().unwrap(),
        Dispatched::NoOp(NoOpReason::Dropped(DropReason::QueueFull))
    );
    assert_eq!(first.await.unwrap(), Dispatched::Value(1));
    assert_eq!(second.await.unwrap(), Dispatched::Value(2));
}

#[tokio::test(start_paused = true)]
async fn waiters_past_timeout_are_skipped() {
    let mixer = mixer();
    let log = Arc::new(Mutex::new(Vec::new()));
    let dropped = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&dropped);
    let impatient = MixConfig::new().sequential(
        SequentialConfig::default()
            .with_queue_timeout(Duration::from_millis(50))
            .with_on_dropped(move |key, reason| seen.lock().push((key.clone(), reason))),
    );
    let patient = || MixConfig::new().sequential(SequentialConfig::default());

    let first = mixer.dispatch("k", job(&log, 1, Duration::from_millis(100)), patient());
    let second = mixer.dispatch("k", job(&log, 2, Duration::from_millis(10)), impatient);
    let third = mixer.dispatch("k", job(&log, 3, Duration::from_millis(10)), patient());

    let results = join_all([first.into_future(), second.into_future(), third.into_future()]).await;
    assert_eq!(results[0].as_ref().unwrap(), &Dispatched::Value(1));
    assert_eq!(
        results[1].as_ref().unwrap(),
        &Dispatched::NoOp(NoOpReason::Dropped(DropReason::Timeout))
    );
    assert_eq!(results[2].as_ref().unwrap(), &Dispatched::Value(3));
    assert_eq!(*dropped.lock(), vec![(Key::from("k"), DropReason::Timeout)]);
}

#[tokio::test(start_paused = true)]
async fn failure_still_advances_queue() {
    let mixer = mixer();
    let config = || MixConfig::new().sequential(SequentialConfig::default());
    let failing: Action<u32> = Action::future(|| async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Err(actionmix_core::ActionError::msg("boom"))
    });

    let first = mixer.dispatch("k", failing, config());
    let second = mixer.dispatch("k", Action::sync(|| Ok(2)), config());
    assert!(first.await.is_err());
    assert_eq!(second.await.unwrap(), Dispatched::Value(2));
}

#[tokio::test(start_paused = true)]
async fn separate_locks_do_not_wait_for_each_other() {
    let mixer = mixer();
    let log = Arc::new(Mutex::new(Vec::new()));
    let config = |lock: &str| {
        MixConfig::new().sequential(SequentialConfig::default().with_lock(lock))
    };

    let slow = mixer.dispatch("a", job(&log, 1, Duration::from_millis(100)), config("one"));
    let fast = mixer.dispatch("b", job(&log, 2, Duration::from_millis(10)), config("two"));
    join_all([slow.into_future(), fast.into_future()]).await;
    assert_eq!(*log.lock(), vec!["start 1", "start 2", "end 2", "end 1"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn completion_order_is_dispatch_order(durations in proptest::collection::vec(0u64..200, 1..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        let finished = runtime.block_on(async {
            let mixer = mixer();
            let finished = Arc::new(Mutex::new(Vec::new()));
            let outcomes: Vec<_> = durations
                .iter()
                .enumerate()
                .map(|(index, millis)| {
                    let finished = Arc::clone(&finished);
                    let delay = Duration::from_millis(*millis);
                    let action = Action::future(move || {
                        let finished = Arc::clone(&finished);
                        async move {
                            tokio::time::sleep(delay).await;
                            finished.lock().push(index);
                            Ok(())
                        }
                    });
                    mixer
                        .dispatch("fifo", action, MixConfig::new().sequential(SequentialConfig::default()))
                        .into_future()
                })
                .collect();
            join_all(outcomes).await;
            let order = finished.lock().clone();
            order
        });
        prop_assert_eq!(finished, (0..durations.len()).collect::<Vec<_>>());
    }
}
