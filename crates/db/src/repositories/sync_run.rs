use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use onboardly_core::domain::sync::{Diff, SyncRun, SyncRunId, SyncRunStatus};
use onboardly_core::domain::wizard::WizardId;

use super::{parse_optional_timestamp, parse_timestamp, RepositoryError, SyncRunRepository};
use crate::DbPool;

pub struct SqlSyncRunRepository {
    pool: DbPool,
}

impl SqlSyncRunRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SyncRunRepository for SqlSyncRunRepository {
    async fn insert(&self, run: SyncRun) -> Result<(), RepositoryError> {
        let diff_json = encode_diff(run.diff.as_ref())?;

        sqlx::query(
            "INSERT INTO sync_run (id, wizard_id, status, diff_json, error, started_at, finished_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.id.0)
        .bind(&run.wizard_id.0)
        .bind(run.status.as_str())
        .bind(diff_json)
        .bind(run.error.as_deref())
        .bind(run.started_at.to_rfc3339())
        .bind(run.finished_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &SyncRunId) -> Result<Option<SyncRun>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, wizard_id, status, diff_json, error, started_at, finished_at
             FROM sync_run
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(run_from_row).transpose()
    }

    async fn update_diff(&self, id: &SyncRunId, diff: &Diff) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE sync_run SET diff_json = ? WHERE id = ? AND status = 'pending'")
            .bind(encode_diff(Some(diff))?)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finish(
        &self,
        id: &SyncRunId,
        status: SyncRunStatus,
        diff: Option<&Diff>,
        error: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE sync_run
             SET status = ?, diff_json = COALESCE(?, diff_json), error = ?, finished_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(encode_diff(diff)?)
        .bind(error)
        .bind(finished_at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "sync run `{id}` is missing or already finalized"
            )));
        }
        Ok(())
    }

    async fn list_for_wizard(
        &self,
        wizard_id: &WizardId,
        limit: i64,
    ) -> Result<Vec<SyncRun>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, wizard_id, status, diff_json, error, started_at, finished_at
             FROM sync_run
             WHERE wizard_id = ?
             ORDER BY started_at DESC, id DESC
             LIMIT ?",
        )
        .bind(&wizard_id.0)
        .bind(limit.clamp(1, 200))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(run_from_row).collect()
    }
}

fn encode_diff(diff: Option<&Diff>) -> Result<Option<String>, RepositoryError> {
    diff.map(|diff| {
        serde_json::to_string(diff)
            .map_err(|error| RepositoryError::Decode(format!("diff serialization failed: {error}")))
    })
    .transpose()
}

fn run_from_row(row: SqliteRow) -> Result<SyncRun, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = SyncRunStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown sync run status `{status_raw}`"))
    })?;

    let diff = row
        .try_get::<Option<String>, _>("diff_json")?
        .map(|raw| {
            serde_json::from_str::<Diff>(&raw)
                .map_err(|error| RepositoryError::Decode(format!("invalid diff column: {error}")))
        })
        .transpose()?;

    Ok(SyncRun {
        id: SyncRunId(row.try_get("id")?),
        wizard_id: WizardId(row.try_get("wizard_id")?),
        status,
        diff,
        error: row.try_get("error")?,
        started_at: parse_timestamp("started_at", row.try_get("started_at")?)?,
        finished_at: parse_optional_timestamp("finished_at", row.try_get("finished_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;

    use onboardly_core::domain::sync::{Diff, DiffEntry, SyncRun, SyncRunId, SyncRunStatus};
    use onboardly_core::domain::wizard::{
        ResponseSet, SyncStatus, Wizard, WizardId, WizardTemplate,
    };

    use super::SqlSyncRunRepository;
    use crate::migrations;
    use crate::repositories::{SqlWizardRepository, SyncRunRepository, WizardRepository};
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    async fn insert_wizard(pool: &DbPool, id: &str) -> WizardId {
        let wizard = Wizard {
            id: WizardId(id.to_string()),
            owner_id: "user-1".to_string(),
            location_id: "loc-1".to_string(),
            name: "Onboarding".to_string(),
            template: WizardTemplate::default(),
            responses: ResponseSet::default(),
            sync_status: SyncStatus::Pending,
        };
        SqlWizardRepository::new(pool.clone()).save(wizard.clone()).await.expect("insert wizard");
        wizard.id
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn pending_run(wizard_id: &WizardId, run_id: &str, started_at: DateTime<Utc>) -> SyncRun {
        SyncRun {
            id: SyncRunId(run_id.to_string()),
            wizard_id: wizard_id.clone(),
            status: SyncRunStatus::Pending,
            diff: None,
            error: None,
            started_at,
            finished_at: None,
        }
    }

    fn sample_diff() -> Diff {
        Diff {
            values: vec![DiffEntry::succeeded("b1", json!({"name": "n"}), json!({"id": "cv-1"}))],
            ..Diff::default()
        }
    }

    #[tokio::test]
    async fn insert_finish_and_find_round_trip() {
        let pool = setup_pool().await;
        let wizard_id = insert_wizard(&pool, "WIZ-001").await;
        let repo = SqlSyncRunRepository::new(pool.clone());

        let started_at = parse_ts("2026-03-01T12:00:00Z");
        let run = pending_run(&wizard_id, "SRUN-001", started_at);
        repo.insert(run.clone()).await.expect("insert run");

        let diff = sample_diff();
        let finished_at = started_at + Duration::seconds(30);
        repo.finish(&run.id, SyncRunStatus::Success, Some(&diff), None, finished_at)
            .await
            .expect("finish run");

        let found = repo.find_by_id(&run.id).await.expect("find run").expect("run exists");
        assert_eq!(found.status, SyncRunStatus::Success);
        assert_eq!(found.diff, Some(diff));
        assert_eq!(found.finished_at, Some(finished_at));
        assert_eq!(found.error, None);

        pool.close().await;
    }

    #[tokio::test]
    async fn finish_is_single_shot() {
        let pool = setup_pool().await;
        let wizard_id = insert_wizard(&pool, "WIZ-002").await;
        let repo = SqlSyncRunRepository::new(pool.clone());

        let run = pending_run(&wizard_id, "SRUN-002", Utc::now());
        repo.insert(run.clone()).await.expect("insert run");

        repo.finish(&run.id, SyncRunStatus::Failed, None, Some("boom"), Utc::now())
            .await
            .expect("first finish");

        let second =
            repo.finish(&run.id, SyncRunStatus::Success, None, None, Utc::now()).await;
        assert!(second.is_err(), "finalization must happen exactly once");

        let found = repo.find_by_id(&run.id).await.expect("find run").expect("run exists");
        assert_eq!(found.status, SyncRunStatus::Failed);
        assert_eq!(found.error.as_deref(), Some("boom"));

        pool.close().await;
    }

    #[tokio::test]
    async fn checkpointed_diff_survives_a_failure_finish() {
        let pool = setup_pool().await;
        let wizard_id = insert_wizard(&pool, "WIZ-003").await;
        let repo = SqlSyncRunRepository::new(pool.clone());

        let run = pending_run(&wizard_id, "SRUN-003", Utc::now());
        repo.insert(run.clone()).await.expect("insert run");

        let partial = sample_diff();
        repo.update_diff(&run.id, &partial).await.expect("checkpoint diff");

        // Finishing failed without a final diff keeps the checkpoint.
        repo.finish(&run.id, SyncRunStatus::Failed, None, Some("aborted"), Utc::now())
            .await
            .expect("finish run");

        let found = repo.find_by_id(&run.id).await.expect("find run").expect("run exists");
        assert_eq!(found.diff, Some(partial));

        pool.close().await;
    }

    #[tokio::test]
    async fn listing_returns_most_recent_runs_first() {
        let pool = setup_pool().await;
        let wizard_id = insert_wizard(&pool, "WIZ-004").await;
        let repo = SqlSyncRunRepository::new(pool.clone());

        let base = parse_ts("2026-03-01T12:00:00Z");
        for (index, run_id) in ["SRUN-a", "SRUN-b", "SRUN-c"].iter().enumerate() {
            let run = pending_run(&wizard_id, run_id, base + Duration::minutes(index as i64));
            repo.insert(run).await.expect("insert run");
        }

        let runs = repo.list_for_wizard(&wizard_id, 2).await.expect("list runs");
        let ids: Vec<&str> = runs.iter().map(|run| run.id.0.as_str()).collect();
        assert_eq!(ids, vec!["SRUN-c", "SRUN-b"]);

        pool.close().await;
    }
}
