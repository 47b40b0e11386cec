use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use onboardly_core::domain::connection::{ConnectionId, SavedConnection};
use onboardly_core::domain::sync::{Diff, SyncRun, SyncRunId, SyncRunStatus};
use onboardly_core::domain::wizard::{SyncStatus, Wizard, WizardId};

pub mod connection;
pub mod sync_run;
pub mod wizard;

pub use connection::SqlConnectionRepository;
pub use sync_run::SqlSyncRunRepository;
pub use wizard::SqlWizardRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn find_for_location(
        &self,
        owner_id: &str,
        location_id: &str,
    ) -> Result<Option<SavedConnection>, RepositoryError>;

    async fn save(&self, connection: SavedConnection) -> Result<(), RepositoryError>;

    async fn update_token(
        &self,
        id: &ConnectionId,
        token: &str,
        used_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn touch_last_used(
        &self,
        id: &ConnectionId,
        used_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait WizardRepository: Send + Sync {
    async fn find_by_id(&self, id: &WizardId) -> Result<Option<Wizard>, RepositoryError>;

    async fn save(&self, wizard: Wizard) -> Result<(), RepositoryError>;

    async fn set_sync_status(
        &self,
        id: &WizardId,
        status: SyncStatus,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait SyncRunRepository: Send + Sync {
    async fn insert(&self, run: SyncRun) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &SyncRunId) -> Result<Option<SyncRun>, RepositoryError>;

    /// Mid-run diff checkpoint; only touches pending runs.
    async fn update_diff(&self, id: &SyncRunId, diff: &Diff) -> Result<(), RepositoryError>;

    /// Finalize a pending run. Finalization happens exactly once; a second
    /// call surfaces `RepositoryError::Conflict`.
    async fn finish(
        &self,
        id: &SyncRunId,
        status: SyncRunStatus,
        diff: Option<&Diff>,
        error: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn list_for_wizard(
        &self,
        wizard_id: &WizardId,
        limit: i64,
    ) -> Result<Vec<SyncRun>, RepositoryError>;
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}
