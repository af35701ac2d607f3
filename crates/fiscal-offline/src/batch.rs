//! Per-pass progress tracking

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Operations selected for one sync pass and how they fared
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub id: String,
    pub operation_ids: Vec<String>,
    pub completed: usize,
    pub failed: usize,
    pub conflicts: usize,
    /// Failed this pass but scheduled for a later one
    pub retried: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall time spent processing, measured on the runtime clock
    pub duration: Duration,
}

impl Batch {
    pub fn new(operation_ids: Vec<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation_ids,
            completed: 0,
            failed: 0,
            conflicts: 0,
            retried: 0,
            started_at,
            finished_at: None,
            duration: Duration::ZERO,
        }
    }

    pub fn total(&self) -> usize {
        self.operation_ids.len()
    }

    /// Operations with an outcome this pass
    pub fn processed(&self) -> usize {
        self.completed + self.failed + self.conflicts + self.retried
    }

    /// Fraction processed, 1.0 for an empty batch
    pub fn progress(&self) -> f64 {
        if self.total() == 0 {
            1.0
        } else {
            self.processed() as f64 / self.total() as f64
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub(crate) fn finish(&mut self, at: DateTime<Utc>, duration: Duration) {
        self.finished_at = Some(at);
        self.duration = duration;
    }
}
