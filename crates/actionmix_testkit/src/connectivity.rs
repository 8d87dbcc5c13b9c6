//! A scripted connectivity probe.

use actionmix_core::ConnectivityProbe;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Answers from a script, then repeats a fallback answer.
///
/// Counts how often it was asked, which lets tests assert how many times a
/// policy re-checked connectivity.
#[derive(Debug)]
pub struct ScriptedProbe {
    script: Mutex<VecDeque<bool>>,
    fallback: bool,
    probes: AtomicUsize,
}

impl ScriptedProbe {
    /// Answers `script` in order, then `fallback` forever.
    pub fn new(script: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            probes: AtomicUsize::new(0),
        }
    }

    /// Always answers `online`.
    pub fn always(online: bool) -> Self {
        Self::new([], online)
    }

    /// Number of probes so far.
    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProbe for ScriptedProbe {
    async fn has_connectivity(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.script.lock().pop_front().unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_then_fallback() {
        let probe = ScriptedProbe::new([false, false], true);
        assert!(!probe.has_connectivity().await);
        assert!(!probe.has_connectivity().await);
        assert!(probe.has_connectivity().await);
        assert!(probe.has_connectivity().await);
        assert_eq!(probe.probes(), 4);
    }
}
