//! In-memory job store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{JobRecord, JobStatus, JobTable, Lease, NewJob, RetryPolicy};
use crate::app::status::QueueCounts;
use crate::domain::{FolioError, JobFailure, JobId};
use crate::ports::{Clock, IdGenerator, JobStore, SystemClock, UlidGenerator};

/// Default dedup window for idempotency keys.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// In-memory job store. Claims are serialized by the table lock.
pub struct InMemoryJobStore {
    table: Mutex<JobTable>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryJobStore {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self::with_clock(retry_policy, DEFAULT_DEDUP_WINDOW, Arc::new(SystemClock))
    }

    pub fn with_clock(retry_policy: RetryPolicy, dedup_window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Mutex::new(JobTable::new(retry_policy, dedup_window)),
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobId, FolioError> {
        let job_type = job.job_type.clone();
        let (id, created) = self
            .table
            .lock()
            .await
            .enqueue(self.ids.generate_job_id(), job, self.clock.now());
        if created {
            tracing::debug!(job_id = %id, %job_type, "job enqueued");
        } else {
            tracing::debug!(job_id = %id, %job_type, "duplicate enqueue resolved to existing job");
        }
        Ok(id)
    }

    async fn claim_next(&self) -> Result<Option<JobRecord>, FolioError> {
        Ok(self.table.lock().await.claim_next(self.clock.now()))
    }

    async fn complete(&self, lease: Lease, result: serde_json::Value) -> Result<bool, FolioError> {
        Ok(self.table.lock().await.complete(lease, result, self.clock.now()))
    }

    async fn fail(&self, lease: Lease, failure: JobFailure) -> Result<Option<JobStatus>, FolioError> {
        Ok(self.table.lock().await.fail(lease, failure, self.clock.now()))
    }

    async fn reschedule(
        &self,
        lease: Lease,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<bool, FolioError> {
        Ok(self
            .table
            .lock()
            .await
            .reschedule(lease, payload, delay, self.clock.now()))
    }

    async fn heartbeat(&self, lease: Lease) -> Result<bool, FolioError> {
        Ok(self.table.lock().await.heartbeat(lease, self.clock.now()))
    }

    async fn reap_stale(&self, threshold: Duration) -> Result<Vec<JobId>, FolioError> {
        Ok(self.table.lock().await.reap_stale(threshold, self.clock.now()))
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, FolioError> {
        Ok(self.table.lock().await.get(id).cloned())
    }

    async fn requeue_dead_letter(&self, id: JobId) -> Result<bool, FolioError> {
        self.table
            .lock()
            .await
            .requeue_dead_letter(id, self.clock.now())
            .ok_or(FolioError::JobNotFound(id))
    }

    async fn counts(&self) -> Result<QueueCounts, FolioError> {
        Ok(self.table.lock().await.counts())
    }
}
