//! Connectivity oracle: "is the client currently online?"

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Connectivity state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// Online and able to reach the API.
    Online,
    /// Offline (network unreachable or API unavailable).
    Offline,
}

impl ConnectivityState {
    pub fn from_online(online: bool) -> Self {
        if online {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }
}

/// Read-only view of connectivity consumed by the engine.
///
/// The engine never subscribes to transitions; whoever owns the signal decides
/// when to trigger a queue drain.
pub trait Connectivity: Send + Sync + core::fmt::Debug {
    fn is_online(&self) -> bool;

    fn state(&self) -> ConnectivityState {
        ConnectivityState::from_online(self.is_online())
    }
}

/// Shared, manually driven connectivity flag.
///
/// Clones share the same underlying flag.
#[derive(Debug, Clone)]
pub struct ConnectivityFlag {
    online: Arc<AtomicBool>,
}

impl ConnectivityFlag {
    pub fn new(state: ConnectivityState) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(state == ConnectivityState::Online)),
        }
    }

    pub fn online() -> Self {
        Self::new(ConnectivityState::Online)
    }

    pub fn offline() -> Self {
        Self::new(ConnectivityState::Offline)
    }

    /// Mark the client as online.
    pub fn set_online(&self) {
        self.set(ConnectivityState::Online);
    }

    /// Mark the client as offline.
    pub fn set_offline(&self) {
        self.set(ConnectivityState::Offline);
    }

    /// Set the state and return the previous one.
    pub fn set(&self, state: ConnectivityState) -> ConnectivityState {
        let was_online = self
            .online
            .swap(state == ConnectivityState::Online, Ordering::SeqCst);
        ConnectivityState::from_online(was_online)
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::online()
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
