//! Cumulative retry metrics with a bounded attempt history

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Maximum number of attempt records kept in memory
pub const MAX_ATTEMPT_HISTORY: usize = 100;

/// One failed attempt that was followed by a retry, or the final failure
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    /// Delay slept after this attempt (zero when no retry followed)
    pub delay: Duration,
    pub error: String,
}

/// Snapshot of the executor's counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryMetrics {
    /// Every attempt started, across all executions
    pub total_attempts: u64,
    /// Executions that succeeded after more than one attempt
    pub successful_retries: u64,
    /// Executions that failed after more than one attempt
    pub failed_retries: u64,
    /// Most recent failed attempts, oldest first
    pub history: Vec<AttemptRecord>,
}

#[derive(Debug, Default)]
pub(crate) struct MetricsState {
    total_attempts: u64,
    successful_retries: u64,
    failed_retries: u64,
    history: VecDeque<AttemptRecord>,
}

impl MetricsState {
    pub(crate) fn record_attempt(&mut self) {
        self.total_attempts += 1;
    }

    pub(crate) fn record_failure(&mut self, attempt: u32, delay: Duration, error: String) {
        if self.history.len() == MAX_ATTEMPT_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(AttemptRecord {
            attempt,
            timestamp: Utc::now(),
            delay,
            error,
        });
    }

    pub(crate) fn record_outcome(&mut self, attempts: u32, succeeded: bool) {
        if attempts <= 1 {
            return;
        }
        if succeeded {
            self.successful_retries += 1;
        } else {
            self.failed_retries += 1;
        }
    }

    pub(crate) fn snapshot(&self) -> RetryMetrics {
        RetryMetrics {
            total_attempts: self.total_attempts,
            successful_retries: self.successful_retries,
            failed_retries: self.failed_retries,
            history: self.history.iter().cloned().collect(),
        }
    }
}
