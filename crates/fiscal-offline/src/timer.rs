//! Schedulable one-shot timer owned by the coordinator
//!
//! Built on `tokio::time`, so tests drive it with a paused clock and
//! `tokio::time::advance` instead of sleeping.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Why a sync pass was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// The retry/debounce timer fired
    Timer,
    /// The periodic processing interval elapsed
    Interval,
    /// The application came to the foreground
    Foreground,
    /// Requested directly by the caller
    Manual,
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    handle: JoinHandle<()>,
}

/// Sends one trigger after a delay; rescheduling replaces the pending one
#[derive(Debug)]
pub struct SyncTimer {
    sender: mpsc::UnboundedSender<SyncTrigger>,
    scheduled: Mutex<Option<Scheduled>>,
}

impl SyncTimer {
    pub fn new(sender: mpsc::UnboundedSender<SyncTrigger>) -> Self {
        Self {
            sender,
            scheduled: Mutex::new(None),
        }
    }

    /// Fire after `delay`, cancelling anything already scheduled
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, delay: Duration) {
        let sender = self.sender.clone();
        let due = Instant::now() + delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(due).await;
            let _ = sender.send(SyncTrigger::Timer);
        });

        let previous = self
            .scheduled
            .lock()
            .unwrap()
            .replace(Scheduled { due, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        tracing::debug!(delay_ms = delay.as_millis() as u64, "sync timer scheduled");
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.scheduled.lock().unwrap().take() {
            previous.handle.abort();
            tracing::debug!("sync timer cancelled");
        }
    }

    /// When the pending trigger fires, if one is pending
    pub fn due(&self) -> Option<Instant> {
        self.scheduled
            .lock()
            .unwrap()
            .as_ref()
            .filter(|s| !s.handle.is_finished())
            .map(|s| s.due)
    }

    pub fn is_scheduled(&self) -> bool {
        self.due().is_some()
    }
}

impl Drop for SyncTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
