//! Handler trait - Task を実行する Handler の定義
//!
//! - ジェネリック trait (`Handler<T>`)
//! - Object-safe trait (`DynHandler`)
//! - Type erasure (`TypedHandler<T, H>` → `DynHandler`)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::Task;
use crate::domain::{JobFailure, JobId, Outcome};
use crate::queue::JobRecord;

/// Who is running: the job being handled, its retry number and how often it
/// was reset out of dead letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobContext {
    pub job_id: JobId,
    pub retry_count: u32,
    pub reset_count: u32,
}

impl JobContext {
    /// First run of a fresh job.
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            retry_count: 0,
            reset_count: 0,
        }
    }

    pub fn for_job(job: &JobRecord) -> Self {
        Self {
            job_id: job.id,
            retry_count: job.retry_count,
            reset_count: job.reset_count,
        }
    }
}

/// Handler は Task を実行して Outcome を返す
///
/// `Outcome::Yield` に載せた `T` が次回呼び出しのペイロードになる。
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T, ctx: JobContext) -> Result<Outcome<T>, JobFailure>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// `HashMap<String, Arc<dyn DynHandler>>` に格納するための層。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        payload: serde_json::Value,
        ctx: JobContext,
    ) -> Result<Outcome, JobFailure>;

    fn task_type(&self) -> &'static str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(
        &self,
        payload: serde_json::Value,
        ctx: JobContext,
    ) -> Result<Outcome, JobFailure> {
        let task: T = serde_json::from_value(payload)
            .map_err(|e| JobFailure::configuration(format!("{}: payload decode: {e}", T::TYPE)))?;
        self.handler
            .handle(task, ctx)
            .await?
            .try_map_payload(|next| {
                serde_json::to_value(next).map_err(|e| {
                    JobFailure::configuration(format!("{}: payload encode: {e}", T::TYPE))
                })
            })
    }

    fn task_type(&self) -> &'static str {
        T::TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::time::Duration;
    use ulid::Ulid;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct CountDown {
        remaining: u32,
    }

    impl Task for CountDown {
        const TYPE: &'static str = "test.countdown.v1";
    }

    struct CountDownHandler;

    #[async_trait]
    impl Handler<CountDown> for CountDownHandler {
        async fn handle(&self, task: CountDown, _ctx: JobContext) -> Result<Outcome<CountDown>, JobFailure> {
            if task.remaining == 0 {
                return Ok(Outcome::done(json!("liftoff")));
            }
            Ok(Outcome::yield_after(
                CountDown {
                    remaining: task.remaining - 1,
                },
                Duration::from_millis(10),
            ))
        }
    }

    fn ctx() -> JobContext {
        JobContext::new(JobId::from_ulid(Ulid::new()))
    }

    #[tokio::test]
    async fn yield_payload_is_erased_to_json() {
        let handler = TypedHandler::<CountDown, _>::new(CountDownHandler);
        let outcome = handler.handle_dyn(json!({"remaining": 2}), ctx()).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Yield {
                payload: json!({"remaining": 1}),
                delay: Duration::from_millis(10),
            }
        );
    }

    #[tokio::test]
    async fn undecodable_payload_is_configuration_failure() {
        let handler = TypedHandler::<CountDown, _>::new(CountDownHandler);
        let err = handler.handle_dyn(json!({"nope": true}), ctx()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.message.starts_with("test.countdown.v1"));
    }
}
