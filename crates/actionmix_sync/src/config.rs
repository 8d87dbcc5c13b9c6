//! Configuration for the optimistic-sync engines.

use crate::revision::DeviceId;

/// Default bound on follow-up requests in one chain.
pub const DEFAULT_MAX_FOLLOW_UP_REQUESTS: usize = 10_000;

/// Configuration for optimistic-sync engines.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Follow-ups allowed after the first request of a chain. Needing more is
    /// a programming error.
    pub max_follow_up_requests: usize,
    /// Identifies this client in requests and pushes.
    pub device_id: DeviceId,
}

impl SyncConfig {
    /// Creates a configuration with a fresh random device id.
    pub fn new() -> Self {
        Self {
            max_follow_up_requests: DEFAULT_MAX_FOLLOW_UP_REQUESTS,
            device_id: DeviceId::random(),
        }
    }

    /// Sets the follow-up bound.
    pub fn with_max_follow_up_requests(mut self, max: usize) -> Self {
        self.max_follow_up_requests = max;
        self
    }

    /// Sets the device id.
    pub fn with_device_id(mut self, device_id: DeviceId) -> Self {
        self.device_id = device_id;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let device = DeviceId::random();
        let config = SyncConfig::new()
            .with_max_follow_up_requests(3)
            .with_device_id(device);
        assert_eq!(config.max_follow_up_requests, 3);
        assert_eq!(config.device_id, device);
    }

    #[test]
    fn defaults() {
        let a = SyncConfig::default();
        let b = SyncConfig::default();
        assert_eq!(a.max_follow_up_requests, DEFAULT_MAX_FOLLOW_UP_REQUESTS);
        assert_ne!(a.device_id, b.device_id);
    }
}
