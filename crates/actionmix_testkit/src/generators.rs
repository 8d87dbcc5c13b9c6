//! Property-based test generators using proptest.

use actionmix_core::Key;
use proptest::prelude::*;
use std::time::Duration;

/// Strategy for textual keys.
pub fn name_key_strategy() -> impl Strategy<Value = Key> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}")
        .expect("Invalid regex")
        .prop_map(Key::from)
}

/// Strategy for arbitrary keys: names, ids and shallow composites.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    let leaf = prop_oneof![name_key_strategy(), any::<i64>().prop_map(Key::from)];
    leaf.prop_recursive(2, 8, 4, |inner| {
        prop::collection::vec(inner, 1..4).prop_map(Key::from)
    })
}

/// Strategy for action durations up to `max_ms` milliseconds.
pub fn duration_strategy(max_ms: u64) -> impl Strategy<Value = Duration> {
    (0..=max_ms).prop_map(Duration::from_millis)
}

/// Strategy for a burst of dispatches: the gap before each one.
pub fn dispatch_gaps_strategy(max_len: usize, max_gap_ms: u64) -> impl Strategy<Value = Vec<Duration>> {
    prop::collection::vec(duration_strategy(max_gap_ms), 1..=max_len)
}
