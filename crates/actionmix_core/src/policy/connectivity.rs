//! Connectivity probes for the check-internet policy.

use crate::session::Shared;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Answers whether the device currently has connectivity.
///
/// The probe is app-level wiring: it survives [`Mixer::clear`](crate::Mixer::clear).
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Returns true if the network is reachable.
    async fn has_connectivity(&self) -> bool;
}

#[async_trait]
impl<P: ConnectivityProbe + ?Sized> ConnectivityProbe for Arc<P> {
    async fn has_connectivity(&self) -> bool {
        (**self).has_connectivity().await
    }
}

/// Default address probed by [`TcpProbe`].
pub const DEFAULT_PROBE_ADDRESS: &str = "1.1.1.1:53";
/// Default connect timeout of [`TcpProbe`].
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Probes connectivity by opening a TCP connection.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    connect_timeout: Duration,
}

impl TcpProbe {
    /// Probes [`DEFAULT_PROBE_ADDRESS`].
    pub fn new() -> Self {
        Self {
            address: DEFAULT_PROBE_ADDRESS.to_string(),
            connect_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Sets the `host:port` to connect to.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Sets the connect timeout.
    pub fn with_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn has_connectivity(&self) -> bool {
        match timeout(self.connect_timeout, TcpStream::connect(self.address.as_str())).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(address = %self.address, error = %e, "connectivity probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(address = %self.address, "connectivity probe timed out");
                false
            }
        }
    }
}

/// A probe with a settable answer.
#[derive(Debug)]
pub struct StaticProbe {
    online: AtomicBool,
}

impl StaticProbe {
    /// Creates a probe answering `online`.
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Changes the answer.
    pub fn set(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn has_connectivity(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// The session's simulated connectivity, if any.
pub(crate) fn forced(shared: &Shared) -> Option<bool> {
    shared.session.lock().forced_connectivity
}

/// Resolves connectivity: the simulator wins, then the installed probe.
pub(crate) async fn check(shared: &Shared) -> bool {
    if let Some(online) = forced(shared) {
        return online;
    }
    let probe = Arc::clone(&*shared.probe.read());
    probe.has_connectivity().await
}
