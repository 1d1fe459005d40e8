//! Status - キュー状態の集計

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::queue::JobStatus;

/// Jobs per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    pub dead_letter: usize,
    pub stale: usize,
}

impl QueueCounts {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Queued => self.queued += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Done => self.done += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::DeadLetter => self.dead_letter += 1,
            JobStatus::Stale => self.stale += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.running + self.done + self.failed + self.dead_letter + self.stale
    }

    /// Work that a future pump may still pick up.
    pub fn outstanding(&self) -> usize {
        self.queued + self.running + self.stale
    }
}

impl FromIterator<JobStatus> for QueueCounts {
    fn from_iter<I: IntoIterator<Item = JobStatus>>(iter: I) -> Self {
        let mut counts = QueueCounts::default();
        for status in iter {
            counts.record(status);
        }
        counts
    }
}

impl fmt::Display for QueueCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queued={} running={} stale={} done={} failed={} dead_letter={}",
            self.queued, self.running, self.stale, self.done, self.failed, self.dead_letter
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_from_statuses() {
        let counts: QueueCounts = [
            JobStatus::Queued,
            JobStatus::Queued,
            JobStatus::Done,
            JobStatus::Stale,
            JobStatus::DeadLetter,
        ]
        .into_iter()
        .collect();

        assert_eq!(counts.queued, 2);
        assert_eq!(counts.total(), 5);
        assert_eq!(counts.outstanding(), 3);
        assert_eq!(
            counts.to_string(),
            "queued=2 running=0 stale=1 done=1 failed=0 dead_letter=1"
        );
    }
}
