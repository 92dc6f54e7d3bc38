use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Trait for reporting whether the analysis service can be reached
#[async_trait::async_trait]
pub trait ConnectivityMonitor: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Checks reachability by opening a TCP connection to the API host.
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: String, timeout: Duration) -> Self {
        Self { address, timeout }
    }
}

#[async_trait::async_trait]
impl ConnectivityMonitor for TcpProbe {
    async fn is_online(&self) -> bool {
        match tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(self.address.as_str())).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                log::debug!("📡 Connectivity probe to {} failed: {}", self.address, e);
                false
            }
            Err(_) => {
                log::debug!("📡 Connectivity probe to {} timed out", self.address);
                false
            }
        }
    }
}

/// Fixed, settable connectivity flag
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    #[allow(dead_code)]
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ConnectivityMonitor for StaticConnectivity {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Manual connectivity setting layered over the automatic check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityOverride {
    Auto,
    ForcedOnline,
    ForcedOffline,
}

impl ConnectivityOverride {
    fn as_u8(self) -> u8 {
        match self {
            ConnectivityOverride::Auto => 0,
            ConnectivityOverride::ForcedOnline => 1,
            ConnectivityOverride::ForcedOffline => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectivityOverride::ForcedOnline,
            2 => ConnectivityOverride::ForcedOffline,
            _ => ConnectivityOverride::Auto,
        }
    }
}

/// Wraps another monitor; a forced setting answers without probing.
pub struct OverridableConnectivity {
    inner: Arc<dyn ConnectivityMonitor>,
    mode: AtomicU8,
}

impl OverridableConnectivity {
    pub fn new(inner: Arc<dyn ConnectivityMonitor>) -> Self {
        Self {
            inner,
            mode: AtomicU8::new(ConnectivityOverride::Auto.as_u8()),
        }
    }

    pub fn set_override(&self, mode: ConnectivityOverride) {
        self.mode.store(mode.as_u8(), Ordering::SeqCst);
        match mode {
            ConnectivityOverride::Auto => log::info!("📡 Connectivity back to automatic detection"),
            ConnectivityOverride::ForcedOnline => log::info!("📶 Online mode forced, probe skipped"),
            ConnectivityOverride::ForcedOffline => log::warn!("📴 Offline mode forced"),
        }
    }

    pub fn current_override(&self) -> ConnectivityOverride {
        ConnectivityOverride::from_u8(self.mode.load(Ordering::SeqCst))
    }
}

#[async_trait::async_trait]
impl ConnectivityMonitor for OverridableConnectivity {
    async fn is_online(&self) -> bool {
        match self.current_override() {
            ConnectivityOverride::ForcedOnline => true,
            ConnectivityOverride::ForcedOffline => false,
            ConnectivityOverride::Auto => self.inner.is_online().await,
        }
    }
}
