//! Batch job tracking
//!
//! A submitted batch gets a [`BatchJob`] carrying a cancellation token. The
//! orchestrator polls the token at phase boundaries; any other holder of the job
//! id can flip it through the [`JobRegistry`] while the batch is in flight.
use crate::classify::LogEntry;
use crate::error::{Result, SieveError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A submitted batch
#[derive(Debug)]
pub struct BatchJob {
    /// Unique job identifier
    pub id: Uuid,

    /// Entries in submission order
    pub entries: Vec<LogEntry>,

    /// When the job was submitted
    pub created_at: DateTime<Utc>,

    token: CancellationToken,
}

impl BatchJob {
    pub fn new(entries: Vec<LogEntry>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entries,
            created_at: Utc::now(),
            token: CancellationToken::new(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token handed to the classification pipeline
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Snapshot of an active job
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub entries: usize,
    pub created_at: DateTime<Utc>,
    pub cancelled: bool,
}

/// Registry of in-flight batch jobs
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<Uuid, Arc<BatchJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job for `entries`
    pub fn create(&self, entries: Vec<LogEntry>) -> Arc<BatchJob> {
        let job = Arc::new(BatchJob::new(entries));
        self.jobs.lock().insert(job.id, Arc::clone(&job));
        tracing::debug!(job_id = %job.id, entries = job.entries.len(), "Created batch job");
        job
    }

    pub fn get(&self, id: &Uuid) -> Result<Arc<BatchJob>> {
        self.jobs
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| SieveError::JobNotFound { id: id.to_string() })
    }

    /// Request cancellation. Returns false for unknown or already finished jobs.
    pub fn cancel(&self, id: &Uuid) -> bool {
        match self.jobs.lock().get(id) {
            Some(job) if !job.is_cancelled() => {
                job.cancel();
                tracing::info!(job_id = %id, "Batch job cancelled");
                true
            }
            Some(_) => false,
            None => {
                tracing::debug!(job_id = %id, "Cancel requested for unknown job");
                false
            }
        }
    }

    pub fn is_cancelled(&self, id: &Uuid) -> bool {
        self.jobs
            .lock()
            .get(id)
            .is_some_and(|job| job.is_cancelled())
    }

    /// Forget a finished job
    pub fn cleanup(&self, id: &Uuid) -> Option<Arc<BatchJob>> {
        let removed = self.jobs.lock().remove(id);
        if removed.is_some() {
            tracing::debug!(job_id = %id, "Cleaned up batch job");
        }
        removed
    }

    pub fn active_jobs(&self) -> Vec<JobSummary> {
        let mut jobs: Vec<_> = self
            .jobs
            .lock()
            .values()
            .map(|job| JobSummary {
                id: job.id,
                entries: job.entries.len(),
                created_at: job.created_at,
                cancelled: job.is_cancelled(),
            })
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }
}
