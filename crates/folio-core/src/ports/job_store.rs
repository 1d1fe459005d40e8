//! JobStore port - ジョブの永続化と状態遷移
//!
//! # 実装
//! - **InMemoryJobStore**: テスト・単一プロセス用
//! - **FileJobStore**: JSON スナップショット + ファイルロック。
//!   複数プロセスで共有でき、プロセス再起動をまたいで残る
//!
//! どちらも `queue::JobTable` の遷移規則を共有する。

use std::time::Duration;

use async_trait::async_trait;

use crate::app::status::QueueCounts;
use crate::domain::{FolioError, JobFailure, JobId};
use crate::queue::{JobRecord, JobStatus, Lease, NewJob};

/// Persistence + optimistic status transitions for jobs.
///
/// `complete`, `fail`, `reschedule` and `heartbeat` only apply while the
/// given lease still holds the job: the job is claimed (`running`/`stale`)
/// and has not been claimed again since. Otherwise they are no-ops and
/// report so, which makes repeated or late delivery of a result harmless.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job. A live idempotency key resolves to the existing id.
    async fn enqueue(&self, job: NewJob) -> Result<JobId, FolioError>;

    /// Atomically move one due job to `running` and return it. The record's
    /// `lease()` identifies this claim.
    async fn claim_next(&self) -> Result<Option<JobRecord>, FolioError>;

    async fn complete(&self, lease: Lease, result: serde_json::Value) -> Result<bool, FolioError>;

    /// Returns the resulting status, or `None` if the lease no longer holds
    /// the job.
    async fn fail(&self, lease: Lease, failure: JobFailure) -> Result<Option<JobStatus>, FolioError>;

    /// Put a claimed job back in the queue with a new payload after `delay`.
    /// Does not count as a retry.
    async fn reschedule(
        &self,
        lease: Lease,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<bool, FolioError>;

    async fn heartbeat(&self, lease: Lease) -> Result<bool, FolioError>;

    /// Reclassify running jobs with an expired heartbeat as `stale`.
    async fn reap_stale(&self, threshold: Duration) -> Result<Vec<JobId>, FolioError>;

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, FolioError>;

    /// Manual reset of a dead-lettered job. Returns false if the job is not
    /// dead-lettered.
    async fn requeue_dead_letter(&self, id: JobId) -> Result<bool, FolioError>;

    async fn counts(&self) -> Result<QueueCounts, FolioError>;
}
