//! The per-wizard synchronization workflow: resolve a usable credential,
//! project the template and answers into operations, execute them against
//! the CRM inside one backoff-wrapped batch, and record the outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use onboardly_core::config::CrmConfig;
use onboardly_core::domain::sync::{Diff, SyncRunId};
use onboardly_core::domain::wizard::{Wizard, WizardId};
use onboardly_core::payload::build_sync_payload;
use onboardly_core::retry::run_with_backoff;
use onboardly_crm::executor::{ExecutorError, ProgressSink, SyncExecutor};
use onboardly_crm::storage::FileStore;
use onboardly_crm::{CrmApiError, CrmClient};
use onboardly_db::repositories::{
    ConnectionRepository, RepositoryError, SyncRunRepository, WizardRepository,
};

use crate::recorder::RunRecorder;
use crate::resolver::{resolve_credential, Resolution};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("wizard `{0}` not found")]
    WizardNotFound(WizardId),
    #[error("no saved connection for owner `{owner_id}` location `{location_id}`")]
    MissingConnection { owner_id: String, location_id: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Api(#[from] CrmApiError),
    #[error(transparent)]
    Execute(#[from] ExecutorError),
}

/// What the queue drives. Broken out as a trait so queue behavior is
/// testable without a database or a CRM.
#[async_trait]
pub trait WizardSyncHandler: Send + Sync {
    async fn sync_wizard(&self, wizard_id: &WizardId) -> Result<(), EngineError>;
}

pub struct SyncEngine {
    connections: Arc<dyn ConnectionRepository>,
    wizards: Arc<dyn WizardRepository>,
    recorder: RunRecorder,
    files: Arc<dyn FileStore>,
    crm_config: CrmConfig,
    http: reqwest::Client,
}

impl SyncEngine {
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        wizards: Arc<dyn WizardRepository>,
        runs: Arc<dyn SyncRunRepository>,
        files: Arc<dyn FileStore>,
        crm_config: CrmConfig,
    ) -> Self {
        let recorder = RunRecorder::new(runs, Arc::clone(&wizards));
        Self { connections, wizards, recorder, files, crm_config, http: reqwest::Client::new() }
    }

    /// Run the full workflow for one wizard. The pending run row is
    /// written before anything touches the network; whatever happens
    /// afterwards is finalized onto that row exactly once. Failures are
    /// re-raised after recording so the queue's catch-and-log wrapper
    /// sees them too.
    pub async fn sync_wizard(&self, wizard_id: &WizardId) -> Result<(), EngineError> {
        let wizard = self
            .wizards
            .find_by_id(wizard_id)
            .await?
            .ok_or_else(|| EngineError::WizardNotFound(wizard_id.clone()))?;

        let run_id = self.recorder.start(wizard_id).await?;
        info!(wizard_id = %wizard_id, run_id = %run_id, "sync run started");

        match self.run_sync(&wizard, &run_id).await {
            Ok(diff) => {
                self.recorder.finish_success(&run_id, wizard_id, &diff).await?;
                info!(wizard_id = %wizard_id, run_id = %run_id, "sync run succeeded");
                Ok(())
            }
            Err(error) => {
                if let Err(record_error) =
                    self.recorder.finish_failure(&run_id, wizard_id, &error.to_string()).await
                {
                    warn!(run_id = %run_id, error = %record_error, "failed to record sync failure");
                }
                Err(error)
            }
        }
    }

    async fn run_sync(&self, wizard: &Wizard, run_id: &SyncRunId) -> Result<Diff, EngineError> {
        let resolution = resolve_credential(
            self.connections.as_ref(),
            &self.http,
            &self.crm_config,
            &wizard.owner_id,
            &wizard.location_id,
        )
        .await?;
        if let Resolution::RefreshSkipped { reason, .. } = &resolution {
            warn!(wizard_id = %wizard.id, %reason, "sync continues with unrefreshed token");
        }

        let client = CrmClient::build(resolution.credential(), &self.crm_config)?;
        let payload = build_sync_payload(&wizard.template, &wizard.responses);
        info!(
            wizard_id = %wizard.id,
            fields = payload.custom_fields.len(),
            values = payload.custom_values.len(),
            trigger_links = payload.trigger_links.len(),
            tags = payload.tags.len(),
            media = payload.media.len(),
            "sync payload built"
        );

        let executor =
            SyncExecutor::new(client, Arc::clone(&self.files), wizard.location_id.clone());
        let progress = RecorderProgress { recorder: &self.recorder, run_id };

        let diff = run_with_backoff(
            |attempt| {
                let executor = &executor;
                let payload = &payload;
                let progress = &progress;
                let wizard_id = &wizard.id;
                async move {
                    if attempt > 0 {
                        info!(wizard_id = %wizard_id, attempt, "retrying sync batch");
                    }
                    executor.execute(payload, progress).await
                }
            },
            self.crm_config.sync_max_attempts,
            Duration::from_millis(self.crm_config.sync_base_delay_ms),
        )
        .await?;

        Ok(diff)
    }
}

#[async_trait]
impl WizardSyncHandler for SyncEngine {
    async fn sync_wizard(&self, wizard_id: &WizardId) -> Result<(), EngineError> {
        SyncEngine::sync_wizard(self, wizard_id).await
    }
}

struct RecorderProgress<'a> {
    recorder: &'a RunRecorder,
    run_id: &'a SyncRunId,
}

#[async_trait]
impl ProgressSink for RecorderProgress<'_> {
    async fn category_completed(&self, diff: &Diff) {
        self.recorder.checkpoint(self.run_id, diff).await;
    }
}
