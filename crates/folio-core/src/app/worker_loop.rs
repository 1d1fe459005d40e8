//! WorkerLoop - ジョブ実行ループ
//!
//! # フロー（1 pump）
//! 1. Reaper で heartbeat 切れの running を stale に
//! 2. JobStore::claim_next() で 1 件 claim
//! 3. TypedRegistry から handler を引いて実行（別 task + heartbeat）
//! 4. Outcome に応じて complete / reschedule / fail
//!
//! handler の panic も失敗として記録されるので、ループ自体は落ちない。

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::reaper::Reaper;
use crate::domain::{ErrorKind, FolioError, JobFailure, JobId, Outcome};
use crate::ports::JobStore;
use crate::queue::{JobRecord, JobStatus, Lease};
use crate::typed::{DynHandler, JobContext, TypedRegistry};

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    /// Sleep between pumps when nothing is due.
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub liveness_threshold: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(15),
            liveness_threshold: Duration::from_secs(120),
        }
    }
}

/// What one pump did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Nothing was due.
    Idle,
    Completed(JobId),
    Yielded(JobId),
    Failed { id: JobId, kind: ErrorKind },
}

#[derive(Clone)]
pub struct Worker {
    name: String,
    jobs: Arc<dyn JobStore>,
    registry: Arc<TypedRegistry>,
    reaper: Reaper,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(jobs: Arc<dyn JobStore>, registry: Arc<TypedRegistry>, settings: WorkerSettings) -> Self {
        Self {
            name: "worker-0".to_string(),
            reaper: Reaper::new(jobs.clone(), settings.liveness_threshold),
            jobs,
            registry,
            settings,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Claim and execute at most one due job.
    pub async fn pump(&self) -> Result<PumpOutcome, FolioError> {
        self.reaper.reap().await?;

        let Some(job) = self.jobs.claim_next().await? else {
            return Ok(PumpOutcome::Idle);
        };
        let span = tracing::info_span!(
            "job",
            worker = %self.name,
            job_id = %job.id,
            job_type = %job.job_type,
            retry_count = job.retry_count,
        );
        self.execute(job).instrument(span).await
    }

    /// Pump until nothing is due, at most `max_pumps` times. Returns the
    /// number of jobs handled.
    pub async fn drain(&self, max_pumps: usize) -> Result<usize, FolioError> {
        let mut handled = 0;
        while handled < max_pumps {
            if self.pump().await? == PumpOutcome::Idle {
                break;
            }
            handled += 1;
        }
        Ok(handled)
    }

    /// Pump until shutdown is requested or the sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker = %self.name, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.pump().await {
                Ok(outcome) => outcome == PumpOutcome::Idle,
                Err(e) => {
                    tracing::error!(worker = %self.name, error = %e, "pump failed");
                    true
                }
            };
            if !idle {
                continue;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
        tracing::info!(worker = %self.name, "worker stopped");
    }

    async fn execute(&self, job: JobRecord) -> Result<PumpOutcome, FolioError> {
        let id = job.id;
        let lease = job.lease();
        tracing::debug!(attempt = lease.attempt, "job claimed");

        let Some(handler) = self.registry.get(&job.job_type) else {
            let failure =
                JobFailure::configuration(format!("no handler registered for job type '{}'", job.job_type));
            return self.report_failure(lease, failure).await;
        };

        let ctx = JobContext::for_job(&job);
        match self.run_handler(handler, job.payload, ctx, lease).await {
            Ok(Outcome::Done(result)) => {
                if self.jobs.complete(lease, result).await? {
                    tracing::info!("job done");
                } else {
                    tracing::warn!("job no longer claimed, result discarded");
                }
                Ok(PumpOutcome::Completed(id))
            }
            Ok(Outcome::Yield { payload, delay }) => {
                if self.jobs.reschedule(lease, payload, delay).await? {
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "job yielded");
                } else {
                    tracing::warn!("job no longer claimed, yield discarded");
                }
                Ok(PumpOutcome::Yielded(id))
            }
            Err(failure) => self.report_failure(lease, failure).await,
        }
    }

    /// Run the handler in its own task, heartbeating the job while it runs.
    async fn run_handler(
        &self,
        handler: Arc<dyn DynHandler>,
        payload: serde_json::Value,
        ctx: JobContext,
        lease: Lease,
    ) -> Result<Outcome, JobFailure> {
        let mut handle: JoinHandle<Result<Outcome, JobFailure>> =
            tokio::spawn(async move { handler.handle_dyn(payload, ctx).await }.in_current_span());

        let period = self.settings.heartbeat_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                joined = &mut handle => {
                    return match joined {
                        Ok(result) => result,
                        Err(e) if e.is_panic() => Err(JobFailure::transient(format!(
                            "handler panicked: {}",
                            panic_message(e.into_panic())
                        ))),
                        Err(e) => Err(JobFailure::transient(format!("handler task aborted: {e}"))),
                    };
                }
                _ = ticker.tick() => {
                    match self.jobs.heartbeat(lease).await {
                        Ok(true) => {}
                        Ok(false) => tracing::warn!("heartbeat not applied, job is no longer running"),
                        Err(e) => tracing::warn!(error = %e, "heartbeat failed"),
                    }
                }
            }
        }
    }

    async fn report_failure(&self, lease: Lease, failure: JobFailure) -> Result<PumpOutcome, FolioError> {
        let id = lease.job_id;
        let kind = failure.kind;
        let message = failure.message.clone();
        match self.jobs.fail(lease, failure).await? {
            Some(JobStatus::Queued) => {
                tracing::warn!(error_kind = %kind, error = %message, "job failed, retry scheduled")
            }
            Some(JobStatus::DeadLetter) => {
                tracing::error!(error_kind = %kind, error = %message, "retry budget spent, job dead-lettered")
            }
            Some(status) => {
                tracing::error!(error_kind = %kind, error = %message, %status, "job failed")
            }
            None => tracing::warn!(error = %message, "job no longer claimed, failure discarded"),
        }
        Ok(PumpOutcome::Failed { id, kind })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Worker group handle.
/// - `shutdown_tx` を drop するとワーカー全体が止まる
/// - `join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` copies of `worker`, all sharing its store and registry.
    pub fn spawn(n: usize, worker: Worker) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..n)
            .map(|i| {
                let w = worker.clone().named(format!("worker-{i}"));
                let rx = shutdown_rx.clone();
                tokio::spawn(async move { w.run(rx).await })
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    /// Stop taking new jobs. In-flight handlers are not cancelled.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryJobStore, NewJob, RetryPolicy};
    use crate::typed::{Handler, Task};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Drill {
        mode: String,
        #[serde(default)]
        steps: u32,
    }

    impl Task for Drill {
        const TYPE: &'static str = "test.drill.v1";
    }

    struct DrillHandler;

    #[async_trait]
    impl Handler<Drill> for DrillHandler {
        async fn handle(&self, task: Drill, _ctx: JobContext) -> Result<Outcome<Drill>, JobFailure> {
            match task.mode.as_str() {
                "ok" => Ok(Outcome::done(json!({"ok": true}))),
                "yield" if task.steps > 0 => Ok(Outcome::yield_after(
                    Drill {
                        mode: "yield".into(),
                        steps: task.steps - 1,
                    },
                    Duration::ZERO,
                )),
                "yield" => Ok(Outcome::done(json!("finished"))),
                "flaky" => Err(JobFailure::transient("connection reset")),
                "broken" => Err(JobFailure::structural("bad numbering")),
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(120)).await;
                    Ok(Outcome::done(json!(null)))
                }
                _ => panic!("boom"),
            }
        }
    }

    fn worker(store: Arc<InMemoryJobStore>, settings: WorkerSettings) -> Worker {
        let mut registry = TypedRegistry::new();
        registry.register::<Drill, _>(DrillHandler).unwrap();
        Worker::new(store, Arc::new(registry), settings)
    }

    async fn enqueue(store: &InMemoryJobStore, mode: &str, steps: u32) -> JobId {
        store
            .enqueue(NewJob::new(Drill::TYPE, json!({"mode": mode, "steps": steps})))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn idle_when_nothing_is_due() {
        let store = Arc::new(InMemoryJobStore::new(RetryPolicy::default()));
        let w = worker(store, WorkerSettings::default());
        assert_eq!(w.pump().await.unwrap(), PumpOutcome::Idle);
    }

    #[tokio::test]
    async fn completes_job_with_handler_result() {
        let store = Arc::new(InMemoryJobStore::new(RetryPolicy::default()));
        let id = enqueue(&store, "ok", 0).await;
        let w = worker(store.clone(), WorkerSettings::default());

        assert_eq!(w.pump().await.unwrap(), PumpOutcome::Completed(id));
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.result, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn yield_requeues_same_job_with_new_payload() {
        let store = Arc::new(InMemoryJobStore::new(RetryPolicy::default()));
        let id = enqueue(&store, "yield", 2).await;
        let w = worker(store.clone(), WorkerSettings::default());

        assert_eq!(w.pump().await.unwrap(), PumpOutcome::Yielded(id));
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.payload["steps"], 1);
        assert_eq!(job.retry_count, 0);

        assert_eq!(w.drain(10).await.unwrap(), 2);
        assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_dead_lettered() {
        let store = Arc::new(InMemoryJobStore::new(RetryPolicy::immediate(1)));
        let id = enqueue(&store, "flaky", 0).await;
        let w = worker(store.clone(), WorkerSettings::default());

        w.pump().await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Queued);
        w.pump().await.unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::DeadLetter);
        assert_eq!(job.error.unwrap().kind, ErrorKind::Exhausted);
    }

    #[tokio::test]
    async fn structural_failure_is_terminal() {
        let store = Arc::new(InMemoryJobStore::new(RetryPolicy::immediate(3)));
        let id = enqueue(&store, "broken", 0).await;
        let w = worker(store.clone(), WorkerSettings::default());

        assert_eq!(
            w.pump().await.unwrap(),
            PumpOutcome::Failed {
                id,
                kind: ErrorKind::StructuralViolation
            }
        );
        assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn panic_becomes_transient_failure() {
        let store = Arc::new(InMemoryJobStore::new(RetryPolicy::immediate(0)));
        let id = enqueue(&store, "panic", 0).await;
        let w = worker(store.clone(), WorkerSettings::default());

        let outcome = w.pump().await.unwrap();
        assert_eq!(
            outcome,
            PumpOutcome::Failed {
                id,
                kind: ErrorKind::TransientInfra
            }
        );
        let error = store.get(id).await.unwrap().unwrap().error.unwrap();
        assert!(error.message.contains("boom"));
    }

    #[tokio::test]
    async fn unknown_job_type_fails_as_configuration() {
        let store = Arc::new(InMemoryJobStore::new(RetryPolicy::immediate(3)));
        let id = store
            .enqueue(NewJob::new("nobody.handles.this", json!({})))
            .await
            .unwrap();
        let w = worker(store.clone(), WorkerSettings::default());

        w.pump().await.unwrap();
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().kind, ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn heartbeats_while_handler_runs() {
        let store = Arc::new(InMemoryJobStore::new(RetryPolicy::default()));
        let id = enqueue(&store, "slow", 0).await;
        let settings = WorkerSettings {
            heartbeat_interval: Duration::from_millis(20),
            ..WorkerSettings::default()
        };
        let w = worker(store.clone(), settings);

        let pumping = tokio::spawn(async move { w.pump().await });
        tokio::time::sleep(Duration::from_millis(70)).await;
        let running = store.get(id).await.unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.heartbeat_at.unwrap() > running.started_at.unwrap());

        pumping.await.unwrap().unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn group_drains_queue_and_stops() {
        let store = Arc::new(InMemoryJobStore::new(RetryPolicy::default()));
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(enqueue(&store, "ok", 0).await);
        }
        let settings = WorkerSettings {
            poll_interval: Duration::from_millis(5),
            ..WorkerSettings::default()
        };
        let group = WorkerGroup::spawn(3, worker(store.clone(), settings));

        for _ in 0..200 {
            if store.counts().await.unwrap().done == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        group.shutdown_and_join().await;

        for id in ids {
            assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Done);
        }
    }
}
