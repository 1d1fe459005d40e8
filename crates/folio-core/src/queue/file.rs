//! File-backed job store.
//!
//! The table lives in one JSON file. Every operation takes an OS lock on a
//! sibling `.lock` file, reads the current snapshot, applies one table
//! transition and, if anything changed, writes the snapshot back (temp file,
//! then rename) before releasing the lock. Several handles, in one process
//! or many, can share the same file.
//!
//! Nothing is cached between operations: a change becomes visible only
//! once its write has succeeded.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fs2::FileExt;

use super::memory::DEFAULT_DEDUP_WINDOW;
use super::{JobRecord, JobStatus, JobTable, Lease, NewJob, RetryPolicy, TableSnapshot};
use crate::app::status::QueueCounts;
use crate::domain::{FolioError, JobFailure, JobId};
use crate::ports::{Clock, IdGenerator, JobStore, SystemClock, UlidGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

pub struct FileJobStore {
    path: PathBuf,
    lock_path: PathBuf,
    retry_policy: RetryPolicy,
    dedup_window: Duration,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl FileJobStore {
    /// Open (or create) the store at `path`.
    pub async fn open(path: impl AsRef<Path>, retry_policy: RetryPolicy) -> Result<Self, FolioError> {
        Self::open_with(path, retry_policy, DEFAULT_DEDUP_WINDOW, Arc::new(SystemClock)).await
    }

    /// Open with an explicit dedup window and clock. The file is read once
    /// here so a corrupt snapshot fails at open.
    pub async fn open_with(
        path: impl AsRef<Path>,
        retry_policy: RetryPolicy,
        dedup_window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, FolioError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let store = Self {
            lock_path: sibling(&path, ".lock"),
            path,
            retry_policy,
            dedup_window,
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        };

        let jobs = store.read(|table| table.counts().total()).await?;
        tracing::debug!(path = %store.path.display(), jobs, "job store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `op` to the current table under the exclusive lock. `op`
    /// returns its output and whether the table changed; a changed table is
    /// written back before the lock is released.
    async fn transact<R, F>(&self, op: F) -> Result<R, FolioError>
    where
        F: FnOnce(&mut JobTable) -> (R, bool) + Send + 'static,
        R: Send + 'static,
    {
        self.locked(LockMode::Exclusive, move |path, mut table| {
            let (out, changed) = op(&mut table);
            if changed {
                write_json_atomic_blocking(path, &table.snapshot())?;
            }
            Ok(out)
        })
        .await
    }

    /// Read-only access under the shared lock.
    async fn read<R, F>(&self, op: F) -> Result<R, FolioError>
    where
        F: FnOnce(&JobTable) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.locked(LockMode::Shared, move |_, table| Ok(op(&table)))
            .await
    }

    async fn locked<R, F>(&self, mode: LockMode, op: F) -> Result<R, FolioError>
    where
        F: FnOnce(&Path, JobTable) -> Result<R, FolioError> + Send + 'static,
        R: Send + 'static,
    {
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();
        let retry_policy = self.retry_policy.clone();
        let dedup_window = self.dedup_window;

        tokio::task::spawn_blocking(move || {
            let lock = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            match mode {
                LockMode::Shared => FileExt::lock_shared(&lock)?,
                LockMode::Exclusive => FileExt::lock_exclusive(&lock)?,
            }
            let result = read_snapshot(&path)
                .map(|snapshot| JobTable::from_snapshot(snapshot, retry_policy, dedup_window))
                .and_then(|table| op(&path, table));
            unlock(&lock);
            result
        })
        .await
        .map_err(|e| FolioError::Io(std::io::Error::other(format!("job store task: {e}"))))?
    }
}

fn read_snapshot(path: &Path) -> Result<TableSnapshot, FolioError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TableSnapshot::default()),
        Err(e) => Err(e.into()),
    }
}

fn unlock(lock: &File) {
    // closing the file releases the lock too
    if let Err(e) = FileExt::unlock(lock) {
        tracing::debug!(error = %e, "job store unlock failed");
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Serialize `value` to `path` via a sibling temp file and a rename.
pub(crate) async fn write_json_atomic<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), FolioError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = sibling(path, ".tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn write_json_atomic_blocking<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), FolioError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = sibling(path, ".tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobId, FolioError> {
        let job_type = job.job_type.clone();
        let candidate = self.ids.generate_job_id();
        let now = self.clock.now();
        let (id, created) = self
            .transact(move |table| {
                let (id, created) = table.enqueue(candidate, job, now);
                ((id, created), created)
            })
            .await?;
        if created {
            tracing::debug!(job_id = %id, %job_type, "job enqueued");
        } else {
            tracing::debug!(job_id = %id, %job_type, "duplicate enqueue resolved to existing job");
        }
        Ok(id)
    }

    async fn claim_next(&self) -> Result<Option<JobRecord>, FolioError> {
        let now = self.clock.now();
        self.transact(move |table| {
            let claimed = table.claim_next(now);
            let changed = claimed.is_some();
            (claimed, changed)
        })
        .await
    }

    async fn complete(&self, lease: Lease, result: serde_json::Value) -> Result<bool, FolioError> {
        let now = self.clock.now();
        self.transact(move |table| {
            let applied = table.complete(lease, result, now);
            (applied, applied)
        })
        .await
    }

    async fn fail(&self, lease: Lease, failure: JobFailure) -> Result<Option<JobStatus>, FolioError> {
        let now = self.clock.now();
        self.transact(move |table| {
            let status = table.fail(lease, failure, now);
            let changed = status.is_some();
            (status, changed)
        })
        .await
    }

    async fn reschedule(
        &self,
        lease: Lease,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<bool, FolioError> {
        let now = self.clock.now();
        self.transact(move |table| {
            let applied = table.reschedule(lease, payload, delay, now);
            (applied, applied)
        })
        .await
    }

    async fn heartbeat(&self, lease: Lease) -> Result<bool, FolioError> {
        let now = self.clock.now();
        self.transact(move |table| {
            let applied = table.heartbeat(lease, now);
            (applied, applied)
        })
        .await
    }

    async fn reap_stale(&self, threshold: Duration) -> Result<Vec<JobId>, FolioError> {
        let now = self.clock.now();
        self.transact(move |table| {
            let reaped = table.reap_stale(threshold, now);
            let changed = !reaped.is_empty();
            (reaped, changed)
        })
        .await
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, FolioError> {
        self.read(move |table| table.get(id).cloned()).await
    }

    async fn requeue_dead_letter(&self, id: JobId) -> Result<bool, FolioError> {
        let now = self.clock.now();
        self.transact(move |table| {
            let applied = table.requeue_dead_letter(id, now);
            (applied, applied == Some(true))
        })
        .await?
        .ok_or(FolioError::JobNotFound(id))
    }

    async fn counts(&self) -> Result<QueueCounts, FolioError> {
        self.read(|table| table.counts()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn jobs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        let id = {
            let store = FileJobStore::open(&path, RetryPolicy::default()).await.unwrap();
            let id = store
                .enqueue(NewJob::new("demo", serde_json::json!({"n": 7})).with_idempotency_key("k"))
                .await
                .unwrap();
            store.claim_next().await.unwrap();
            id
        };

        let store = FileJobStore::open(&path, RetryPolicy::default()).await.unwrap();
        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Running);
        assert_eq!(record.payload["n"], 7);

        let again = store
            .enqueue(NewJob::new("demo", serde_json::json!({})).with_idempotency_key("k"))
            .await
            .unwrap();
        assert_eq!(again, id);
    }

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path().join("nested/jobs.json"), RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(store.counts().await.unwrap().total(), 0);

        store
            .enqueue(NewJob::new("demo", serde_json::json!({})))
            .await
            .unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, b"not json").unwrap();

        let result = FileJobStore::open(&path, RetryPolicy::default()).await;
        assert!(matches!(result, Err(FolioError::Json(_))));
    }

    #[tokio::test]
    async fn handles_on_one_file_see_each_others_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let a = FileJobStore::open(&path, RetryPolicy::default()).await.unwrap();
        let b = FileJobStore::open(&path, RetryPolicy::default()).await.unwrap();

        let from_b = b
            .enqueue(NewJob::new("demo", serde_json::json!({"from": "b"})))
            .await
            .unwrap();
        let claimed = a.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, from_b);

        let from_a = a
            .enqueue(NewJob::new("demo", serde_json::json!({"from": "a"})))
            .await
            .unwrap();
        assert!(b.complete(claimed.lease(), serde_json::json!("done by b")).await.unwrap());

        let reopened = FileJobStore::open(&path, RetryPolicy::default()).await.unwrap();
        assert_eq!(reopened.get(from_b).await.unwrap().unwrap().status, JobStatus::Done);
        assert_eq!(reopened.get(from_a).await.unwrap().unwrap().status, JobStatus::Queued);
        assert_eq!(reopened.counts().await.unwrap().total(), 2);
    }

    #[tokio::test]
    async fn idempotency_keys_hold_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let a = FileJobStore::open(&path, RetryPolicy::default()).await.unwrap();
        let b = FileJobStore::open(&path, RetryPolicy::default()).await.unwrap();

        let job = NewJob::new("demo", serde_json::json!({})).with_idempotency_key("chapter:1");
        let first = a.enqueue(job.clone()).await.unwrap();
        let second = b.enqueue(job).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(a.counts().await.unwrap().total(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exactly_one_claim_wins_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let seed = FileJobStore::open(&path, RetryPolicy::default()).await.unwrap();
        seed.enqueue(NewJob::new("demo", serde_json::json!({})))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = FileJobStore::open(&path, RetryPolicy::default()).await.unwrap();
            handles.push(tokio::spawn(async move { store.claim_next().await.unwrap() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(seed.counts().await.unwrap().running, 1);
    }

    #[tokio::test]
    async fn failed_write_leaves_the_file_as_it_was() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let store = FileJobStore::open(&path, RetryPolicy::default()).await.unwrap();
        let id = store
            .enqueue(NewJob::new("demo", serde_json::json!({})))
            .await
            .unwrap();

        // A directory where the temp file goes makes the next write fail.
        let tmp = dir.path().join("jobs.json.tmp");
        std::fs::create_dir(&tmp).unwrap();
        assert!(matches!(store.claim_next().await, Err(FolioError::Io(_))));
        assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Queued);

        std::fs::remove_dir(&tmp).unwrap();
        assert_eq!(store.claim_next().await.unwrap().map(|r| r.id), Some(id));
    }
}
