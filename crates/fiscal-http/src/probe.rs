//! Reachability monitor that polls a health endpoint
//!
//! Any HTTP response, even an error status, means the API is reachable.
//! Only transport failures (connection errors and timeouts) count as
//! offline.

use fiscal_core::error::ApiError;
use fiscal_offline::NetworkMonitor;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::transport::{HttpRequest, HttpTransport};

/// Default path probed for reachability
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// [`NetworkMonitor`] backed by periodic HTTP probes
pub struct HttpProbeMonitor {
    transport: Arc<dyn HttpTransport>,
    path: String,
    sender: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HttpProbeMonitor {
    /// Create a monitor without a polling task; call [`check`](Self::check)
    /// to update it
    ///
    /// Starts out online so calls are attempted until a probe says
    /// otherwise.
    pub fn new(transport: Arc<dyn HttpTransport>, path: impl Into<String>) -> Arc<Self> {
        let (sender, _) = watch::channel(true);
        Arc::new(Self {
            transport,
            path: path.into(),
            sender,
            task: Mutex::new(None),
        })
    }

    /// Create a monitor that probes every `interval`, starting immediately
    ///
    /// The polling task stops when the monitor is dropped.
    pub fn spawn(
        transport: Arc<dyn HttpTransport>,
        path: impl Into<String>,
        interval: Duration,
    ) -> Arc<Self> {
        let monitor = Self::new(transport, path);
        let weak: Weak<Self> = Arc::downgrade(&monitor);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(monitor) = weak.upgrade() else {
                    break;
                };
                monitor.check().await;
            }
        });
        *monitor.task.lock().unwrap() = Some(handle);
        monitor
    }

    /// Probe once and publish the result
    pub async fn check(&self) -> bool {
        let online = match self.transport.send(HttpRequest::get(&self.path)).await {
            Ok(_) => true,
            Err(ApiError::Network { .. } | ApiError::Timeout { .. }) => false,
            Err(_) => true,
        };

        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, path = %self.path, "reachability changed");
        }
        online
    }
}

impl NetworkMonitor for HttpProbeMonitor {
    fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Drop for HttpProbeMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}
