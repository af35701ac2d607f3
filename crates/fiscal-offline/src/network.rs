//! Network monitor collaborator
//!
//! Connectivity is published through a `tokio::sync::watch` channel. A
//! subscription lasts as long as its receiver; dropping it unsubscribes.

use tokio::sync::watch;

/// Source of online/offline status
pub trait NetworkMonitor: Send + Sync {
    /// Current connectivity
    fn is_online(&self) -> bool;

    /// Receiver that observes every status change
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Monitor whose status is set by the application
///
/// Platforms usually announce connectivity changes themselves; this type
/// forwards them into the sync engine. It is also what tests use.
#[derive(Debug, Clone)]
pub struct ManualNetworkMonitor {
    sender: watch::Sender<bool>,
}

impl ManualNetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self { sender }
    }

    /// Publish a status; subscribers are only woken on an actual change
    pub fn set_online(&self, online: bool) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "network status changed");
        }
    }
}

impl Default for ManualNetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor for ManualNetworkMonitor {
    fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}
