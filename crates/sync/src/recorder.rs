//! Persists the lifecycle of one sync run: pending at job start,
//! checkpointed diffs mid-run, and a single terminal success/failure that
//! also flips the wizard's user-visible status.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use onboardly_core::domain::sync::{Diff, SyncRun, SyncRunId, SyncRunStatus};
use onboardly_core::domain::wizard::{SyncStatus, WizardId};
use onboardly_db::repositories::{RepositoryError, SyncRunRepository, WizardRepository};

pub struct RunRecorder {
    runs: Arc<dyn SyncRunRepository>,
    wizards: Arc<dyn WizardRepository>,
}

impl RunRecorder {
    pub fn new(runs: Arc<dyn SyncRunRepository>, wizards: Arc<dyn WizardRepository>) -> Self {
        Self { runs, wizards }
    }

    /// Insert the pending run row. A failure here is fatal to the sync:
    /// no CRM call may happen without its audit row.
    pub async fn start(&self, wizard_id: &WizardId) -> Result<SyncRunId, RepositoryError> {
        let run = SyncRun {
            id: SyncRunId(format!("SRUN-{}", Uuid::new_v4().simple())),
            wizard_id: wizard_id.clone(),
            status: SyncRunStatus::Pending,
            diff: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.runs.insert(run.clone()).await?;
        Ok(run.id)
    }

    /// Best-effort mid-run diff persistence; a failed checkpoint never
    /// aborts the batch.
    pub async fn checkpoint(&self, run_id: &SyncRunId, diff: &Diff) {
        if let Err(error) = self.runs.update_diff(run_id, diff).await {
            warn!(run_id = %run_id, error = %error, "sync diff checkpoint failed");
        }
    }

    pub async fn finish_success(
        &self,
        run_id: &SyncRunId,
        wizard_id: &WizardId,
        diff: &Diff,
    ) -> Result<(), RepositoryError> {
        self.runs.finish(run_id, SyncRunStatus::Success, Some(diff), None, Utc::now()).await?;
        self.wizards.set_sync_status(wizard_id, SyncStatus::Synced).await?;
        Ok(())
    }

    pub async fn finish_failure(
        &self,
        run_id: &SyncRunId,
        wizard_id: &WizardId,
        error: &str,
    ) -> Result<(), RepositoryError> {
        self.runs.finish(run_id, SyncRunStatus::Failed, None, Some(error), Utc::now()).await?;
        self.wizards.set_sync_status(wizard_id, SyncStatus::Error).await?;
        Ok(())
    }
}
