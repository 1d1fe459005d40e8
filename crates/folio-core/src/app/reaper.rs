//! Reaper - heartbeat 切れの回収
//!
//! running のまま heartbeat が `liveness_threshold` を超えて途絶えたジョブを
//! stale にする。stale は再 claim 可能（クラッシュ復旧）。

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{FolioError, JobId};
use crate::ports::JobStore;

#[derive(Clone)]
pub struct Reaper {
    jobs: Arc<dyn JobStore>,
    liveness_threshold: Duration,
}

impl Reaper {
    pub fn new(jobs: Arc<dyn JobStore>, liveness_threshold: Duration) -> Self {
        Self {
            jobs,
            liveness_threshold,
        }
    }

    pub async fn reap(&self) -> Result<Vec<JobId>, FolioError> {
        let reaped = self.jobs.reap_stale(self.liveness_threshold).await?;
        for id in &reaped {
            tracing::warn!(
                job_id = %id,
                threshold_secs = self.liveness_threshold.as_secs(),
                "heartbeat expired, job marked stale"
            );
        }
        Ok(reaped)
    }
}
