//! Job table: the transition rules shared by every job store.
//!
//! The table is synchronous and takes `now` from the caller. Stores own the
//! locking (and, for the file store, the persistence).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobRecord, JobStatus, Lease, NewJob, RetryPolicy};
use crate::app::status::QueueCounts;
use crate::domain::{JobFailure, JobId};

/// Where an idempotency key points, and since when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyEntry {
    pub key: String,
    pub job_id: JobId,
    pub recorded_at: DateTime<Utc>,
}

/// Serializable form of a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub jobs: Vec<JobRecord>,
    #[serde(default)]
    pub idempotency: Vec<IdempotencyEntry>,
}

#[derive(Debug)]
pub struct JobTable {
    jobs: HashMap<JobId, JobRecord>,
    idempotency: HashMap<String, IdempotencyEntry>,
    retry_policy: RetryPolicy,
    dedup_window: Duration,
}

impl JobTable {
    pub fn new(retry_policy: RetryPolicy, dedup_window: Duration) -> Self {
        Self {
            jobs: HashMap::new(),
            idempotency: HashMap::new(),
            retry_policy,
            dedup_window,
        }
    }

    pub fn from_snapshot(
        snapshot: TableSnapshot,
        retry_policy: RetryPolicy,
        dedup_window: Duration,
    ) -> Self {
        let mut table = Self::new(retry_policy, dedup_window);
        table.jobs = snapshot.jobs.into_iter().map(|r| (r.id, r)).collect();
        table.idempotency = snapshot
            .idempotency
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect();
        table
    }

    /// Records sorted by creation so snapshots are stable.
    pub fn snapshot(&self) -> TableSnapshot {
        let mut jobs: Vec<JobRecord> = self.jobs.values().cloned().collect();
        jobs.sort_by_key(|r| (r.created_at, r.id));
        let mut idempotency: Vec<IdempotencyEntry> = self.idempotency.values().cloned().collect();
        idempotency.sort_by(|a, b| a.key.cmp(&b.key));
        TableSnapshot { jobs, idempotency }
    }

    /// Insert a job, or return the job its idempotency key already points to.
    ///
    /// Returns the id and whether a new record was created.
    pub fn enqueue(&mut self, id: JobId, job: NewJob, now: DateTime<Utc>) -> (JobId, bool) {
        if let Some(key) = &job.idempotency_key
            && let Some(entry) = self.idempotency.get(key)
            && self.jobs.contains_key(&entry.job_id)
            && now.signed_duration_since(entry.recorded_at) < to_chrono(self.dedup_window)
        {
            return (entry.job_id, false);
        }

        if let Some(key) = &job.idempotency_key {
            self.idempotency.insert(
                key.clone(),
                IdempotencyEntry {
                    key: key.clone(),
                    job_id: id,
                    recorded_at: now,
                },
            );
        }
        let record = JobRecord::new(id, job, self.retry_policy.max_retries, now);
        self.jobs.insert(id, record);
        (id, true)
    }

    /// Claim the due job with the earliest `run_at`, then earliest creation.
    pub fn claim_next(&mut self, now: DateTime<Utc>) -> Option<JobRecord> {
        let id = self
            .jobs
            .values()
            .filter(|r| r.is_claimable(now))
            .min_by_key(|r| (r.run_at, r.created_at, r.id))
            .map(|r| r.id)?;
        let record = self.jobs.get_mut(&id)?;
        record.start_attempt(now);
        Some(record.clone())
    }

    pub fn complete(&mut self, lease: Lease, result: serde_json::Value, now: DateTime<Utc>) -> bool {
        match self.claimed_mut(lease) {
            Some(record) => {
                record.mark_done(result, now);
                true
            }
            None => false,
        }
    }

    /// Apply a failure. Returns the status the job ended up in, or `None`
    /// when `lease` no longer holds the job.
    pub fn fail(&mut self, lease: Lease, failure: JobFailure, now: DateTime<Utc>) -> Option<JobStatus> {
        let policy = self.retry_policy.clone();
        let record = self.claimed_mut(lease)?;

        if !failure.kind.is_retryable() {
            record.mark_failed(failure, now);
        } else if record.retry_count < record.max_retries {
            let delay = policy.next_delay(record.retry_count + 1);
            record.schedule_retry(failure, after(now, delay));
        } else {
            record.mark_dead_letter(failure, now);
        }
        Some(record.status)
    }

    pub fn reschedule(
        &mut self,
        lease: Lease,
        payload: serde_json::Value,
        delay: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        match self.claimed_mut(lease) {
            Some(record) => {
                record.reschedule(payload, after(now, delay));
                true
            }
            None => false,
        }
    }

    pub fn heartbeat(&mut self, lease: Lease, now: DateTime<Utc>) -> bool {
        match self.jobs.get_mut(&lease.job_id) {
            Some(record) if record.status == JobStatus::Running && record.is_held_by(lease) => {
                record.touch_heartbeat(now);
                true
            }
            _ => false,
        }
    }

    /// Mark running jobs whose heartbeat is older than `threshold` as stale.
    pub fn reap_stale(&mut self, threshold: Duration, now: DateTime<Utc>) -> Vec<JobId> {
        let cutoff = to_chrono(threshold);
        let mut reaped: Vec<JobId> = self
            .jobs
            .values_mut()
            .filter(|r| r.status == JobStatus::Running)
            .filter(|r| {
                let last = r.heartbeat_at.or(r.started_at).unwrap_or(r.created_at);
                now.signed_duration_since(last) > cutoff
            })
            .map(|r| {
                r.mark_stale();
                r.id
            })
            .collect();
        reaped.sort();
        reaped
    }

    pub fn get(&self, id: JobId) -> Option<&JobRecord> {
        self.jobs.get(&id)
    }

    /// Manual reset of a dead-lettered job. `None` if the job does not exist.
    pub fn requeue_dead_letter(&mut self, id: JobId, now: DateTime<Utc>) -> Option<bool> {
        let record = self.jobs.get_mut(&id)?;
        if record.status != JobStatus::DeadLetter {
            return Some(false);
        }
        record.reset_dead_letter(now);
        Some(true)
    }

    pub fn counts(&self) -> QueueCounts {
        self.jobs.values().map(|r| r.status).collect()
    }

    fn claimed_mut(&mut self, lease: Lease) -> Option<&mut JobRecord> {
        self.jobs.get_mut(&lease.job_id).filter(|r| r.is_held_by(lease))
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(d.as_millis().min(i64::MAX as u128) as i64)
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now.checked_add_signed(to_chrono(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
