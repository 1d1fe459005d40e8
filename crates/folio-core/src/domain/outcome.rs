//! Outcome model: what a handler invocation asks the worker to do next.
//!
//! Failures are not an outcome; they travel as `Err(JobFailure)`.

use std::time::Duration;

/// Result of one successful handler invocation.
///
/// `P` is the payload type. Typed handlers return `Outcome<T>`, the dynamic
/// layer erases it to `Outcome<serde_json::Value>`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<P = serde_json::Value> {
    /// The job is finished; `result` is stored on the record.
    Done(serde_json::Value),

    /// Work is outstanding. The job goes back to the queue with `payload`
    /// as its new state and becomes due again after `delay`.
    Yield { payload: P, delay: Duration },
}

impl<P> Outcome<P> {
    pub fn done(result: serde_json::Value) -> Self {
        Outcome::Done(result)
    }

    pub fn yield_after(payload: P, delay: Duration) -> Self {
        Outcome::Yield { payload, delay }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    /// Converts the payload type, used when erasing `Outcome<T>`.
    pub fn try_map_payload<Q, E>(self, f: impl FnOnce(P) -> Result<Q, E>) -> Result<Outcome<Q>, E> {
        Ok(match self {
            Outcome::Done(result) => Outcome::Done(result),
            Outcome::Yield { payload, delay } => Outcome::Yield {
                payload: f(payload)?,
                delay,
            },
        })
    }
}
