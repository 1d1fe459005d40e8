//! Job status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Job status.
///
/// State transitions:
/// - Queued -> Running -> Done
/// - Queued -> Running -> Queued (yield, or retryable failure with budget left)
/// - Queued -> Running -> Failed (non-retryable failure)
/// - Queued -> Running -> DeadLetter (retry budget spent)
/// - Running -> Stale (heartbeat expired) -> Running (reclaimed)
/// - DeadLetter -> Queued (manual reset only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
    DeadLetter,
    Stale,
}

impl JobStatus {
    /// Is this a terminal state (no further automatic transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::DeadLetter)
    }

    /// Is a worker currently (or until recently) holding this job?
    pub fn is_claimed(self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Stale)
    }

    /// Failed and dead-lettered jobs both count as failure for callers.
    pub fn is_failure(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::DeadLetter)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::DeadLetter => "dead_letter",
            JobStatus::Stale => "stale",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::queued(JobStatus::Queued, false)]
    #[case::running(JobStatus::Running, false)]
    #[case::stale(JobStatus::Stale, false)]
    #[case::done(JobStatus::Done, true)]
    #[case::failed(JobStatus::Failed, true)]
    #[case::dead_letter(JobStatus::DeadLetter, true)]
    fn terminal_states(#[case] status: JobStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[test]
    fn display_matches_serde_name() {
        for status in [JobStatus::DeadLetter, JobStatus::Stale, JobStatus::Done] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }
}
