//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use actionmix_core::{Key, Mixer, StaticProbe};
use rand::seq::SliceRandom;
use rand::Rng;

/// A mixer that never touches the network.
pub fn bench_mixer() -> Mixer {
    Mixer::with_probe(StaticProbe::new(true))
}

/// Generate `count` distinct textual keys.
pub fn generate_keys(count: usize) -> Vec<Key> {
    (0..count).map(|i| Key::from(format!("key_{i}"))).collect()
}

/// Generate `count` composite keys of the `("entity", id)` shape.
pub fn generate_composite_keys(count: usize) -> Vec<Key> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| Key::from(("entity", rng.gen::<i64>())))
        .collect()
}

/// Returns `keys` in random order.
pub fn shuffled(keys: &[Key]) -> Vec<Key> {
    let mut keys = keys.to_vec();
    keys.shuffle(&mut rand::thread_rng());
    keys
}
