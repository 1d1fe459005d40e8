//! Job record: the persisted unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobStatus;
use crate::domain::{ErrorKind, JobFailure, JobId};

/// A request to create a job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub job_type: String,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    /// Overrides the store's default retry budget.
    pub max_retries: Option<u32>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            idempotency_key: None,
            max_retries: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Proof of one claim.
///
/// Write-backs carry the lease they were claimed under. Once the job has
/// been claimed again, a lease from an earlier attempt no longer applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lease {
    pub job_id: JobId,
    pub attempt: u32,
}

/// Metadata + payload for a job.
///
/// This is the single source of truth for job state. All transitions go
/// through the methods below; the store decides when each one applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: String,
    pub status: JobStatus,

    /// Opaque to the store. Orchestrators keep their progress here.
    pub payload: serde_json::Value,

    pub result: Option<serde_json::Value>,
    pub error: Option<JobFailure>,

    pub retry_count: u32,
    pub max_retries: u32,

    /// Claims so far. Bumped on every claim, never reset.
    #[serde(default)]
    pub attempt: u32,
    /// Manual dead-letter resets so far.
    #[serde(default)]
    pub reset_count: u32,

    /// Earliest time the job may be claimed (backoff, yield delay).
    pub run_at: DateTime<Utc>,

    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub idempotency_key: Option<String>,
}

impl JobRecord {
    pub fn new(id: JobId, job: NewJob, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            job_type: job.job_type,
            status: JobStatus::Queued,
            payload: job.payload,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: job.max_retries.unwrap_or(max_retries),
            attempt: 0,
            reset_count: 0,
            run_at: now,
            heartbeat_at: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            idempotency_key: job.idempotency_key,
        }
    }

    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Queued => self.run_at <= now,
            JobStatus::Stale => true,
            _ => false,
        }
    }

    pub fn lease(&self) -> Lease {
        Lease {
            job_id: self.id,
            attempt: self.attempt,
        }
    }

    /// Whether `lease` belongs to the claim currently holding the job.
    pub fn is_held_by(&self, lease: Lease) -> bool {
        self.status.is_claimed() && self.id == lease.job_id && self.attempt == lease.attempt
    }

    /// Queued/Stale -> Running under a new lease.
    pub fn start_attempt(&mut self, now: DateTime<Utc>) {
        self.attempt += 1;
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.heartbeat_at = Some(now);
    }

    pub fn touch_heartbeat(&mut self, now: DateTime<Utc>) {
        self.heartbeat_at = Some(now);
    }

    pub fn mark_stale(&mut self) {
        self.status = JobStatus::Stale;
    }

    pub fn mark_done(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.status = JobStatus::Done;
        self.result = Some(result);
        self.completed_at = Some(now);
        self.heartbeat_at = None;
    }

    /// Back to the queue with a new payload. Not a retry.
    pub fn reschedule(&mut self, payload: serde_json::Value, run_at: DateTime<Utc>) {
        self.status = JobStatus::Queued;
        self.payload = payload;
        self.run_at = run_at;
        self.heartbeat_at = None;
    }

    /// Retryable failure with budget left.
    pub fn schedule_retry(&mut self, mut failure: JobFailure, run_at: DateTime<Utc>) {
        if let Some(payload) = failure.restart_payload.take() {
            self.payload = payload;
        }
        self.status = JobStatus::Queued;
        self.retry_count += 1;
        self.run_at = run_at;
        self.heartbeat_at = None;
        self.error = Some(failure);
    }

    /// Non-retryable failure.
    pub fn mark_failed(&mut self, mut failure: JobFailure, now: DateTime<Utc>) {
        failure.restart_payload = None;
        self.status = JobStatus::Failed;
        self.completed_at = Some(now);
        self.heartbeat_at = None;
        self.error = Some(failure);
    }

    /// Retry budget spent. The recorded kind becomes `Exhausted`; the
    /// message keeps the last cause. A restart payload is applied so a
    /// manual reset starts from it.
    pub fn mark_dead_letter(&mut self, mut failure: JobFailure, now: DateTime<Utc>) {
        if let Some(payload) = failure.restart_payload.take() {
            self.payload = payload;
        }
        self.status = JobStatus::DeadLetter;
        self.completed_at = Some(now);
        self.heartbeat_at = None;
        self.error = Some(JobFailure::new(
            ErrorKind::Exhausted,
            format!(
                "retry budget spent after {} retries; last error: {failure}",
                self.retry_count
            ),
        ));
    }

    /// DeadLetter -> Queued with a fresh budget.
    pub fn reset_dead_letter(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Queued;
        self.retry_count = 0;
        self.reset_count += 1;
        self.run_at = now;
        self.completed_at = None;
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.id,
            job_type: self.job_type.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            retry_count: self.retry_count,
        }
    }
}

/// What `getJob` exposes to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub job_type: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn record() -> JobRecord {
        JobRecord::new(
            JobId::from_ulid(Ulid::new()),
            NewJob::new("t", serde_json::json!({"step": 1})),
            3,
            Utc::now(),
        )
    }

    #[test]
    fn new_record_is_queued_and_due() {
        let r = record();
        assert_eq!(r.status, JobStatus::Queued);
        assert_eq!(r.max_retries, 3);
        assert!(r.is_claimable(r.created_at));
    }

    #[test]
    fn explicit_budget_overrides_default() {
        let r = JobRecord::new(
            JobId::from_ulid(Ulid::new()),
            NewJob::new("t", serde_json::json!(null)).with_max_retries(0),
            3,
            Utc::now(),
        );
        assert_eq!(r.max_retries, 0);
    }

    #[test]
    fn retry_swaps_in_restart_payload() {
        let mut r = record();
        r.start_attempt(Utc::now());
        let failure = JobFailure::transient("child died")
            .with_restart_payload(serde_json::json!({"step": 0}));

        r.schedule_retry(failure, Utc::now());

        assert_eq!(r.status, JobStatus::Queued);
        assert_eq!(r.retry_count, 1);
        assert_eq!(r.payload, serde_json::json!({"step": 0}));
        assert_eq!(r.error.as_ref().unwrap().restart_payload, None);
    }

    #[test]
    fn each_claim_gets_a_new_lease() {
        let mut r = record();
        r.start_attempt(Utc::now());
        let first = r.lease();
        assert!(r.is_held_by(first));

        r.mark_stale();
        r.start_attempt(Utc::now());
        assert!(!r.is_held_by(first));
        assert!(r.is_held_by(r.lease()));
        assert_eq!(r.attempt, 2);
    }

    #[test]
    fn dead_letter_applies_restart_payload_and_reset_counts() {
        let mut r = record();
        r.start_attempt(Utc::now());
        let failure = JobFailure::transient("child dead-lettered")
            .with_restart_payload(serde_json::json!({"step": 0}));

        r.mark_dead_letter(failure, Utc::now());
        assert_eq!(r.payload, serde_json::json!({"step": 0}));

        r.reset_dead_letter(Utc::now());
        assert_eq!(r.status, JobStatus::Queued);
        assert_eq!(r.reset_count, 1);
        assert_eq!(r.retry_count, 0);
    }

    #[test]
    fn dead_letter_records_exhausted_with_cause() {
        let mut r = record();
        r.retry_count = 3;
        r.mark_dead_letter(JobFailure::invalid_output("empty paragraph"), Utc::now());

        let err = r.error.unwrap();
        assert_eq!(err.kind, ErrorKind::Exhausted);
        assert!(err.message.contains("empty paragraph"));
        assert!(err.message.contains("3 retries"));
    }

    #[test]
    fn view_serializes_snake_case_status() {
        let mut r = record();
        r.mark_done(serde_json::json!({"ok": true}), Utc::now());
        let json = serde_json::to_value(r.view()).unwrap();
        assert_eq!(json["status"], "done");
        assert_eq!(json["result"]["ok"], true);
        assert!(json.get("error").is_none());
    }
}
