use std::collections::HashMap;

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use onboardly_core::domain::wizard::{
    Answer, ResponseSet, SyncStatus, Wizard, WizardId, WizardTemplate,
};

use super::{RepositoryError, WizardRepository};
use crate::DbPool;

pub struct SqlWizardRepository {
    pool: DbPool,
}

impl SqlWizardRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WizardRepository for SqlWizardRepository {
    async fn find_by_id(&self, id: &WizardId) -> Result<Option<Wizard>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, owner_id, location_id, name, template_json, sync_status
             FROM wizard
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let template_raw: String = row.try_get("template_json")?;
        let template: WizardTemplate = serde_json::from_str(&template_raw).map_err(|error| {
            RepositoryError::Decode(format!("invalid template for wizard `{id}`: {error}"))
        })?;

        let status_raw: String = row.try_get("sync_status")?;
        let sync_status = SyncStatus::parse(&status_raw).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown wizard sync status `{status_raw}`"))
        })?;

        let responses = self.load_responses(id).await?;

        Ok(Some(Wizard {
            id: id.clone(),
            owner_id: row.try_get("owner_id")?,
            location_id: row.try_get("location_id")?,
            name: row.try_get("name")?,
            template,
            responses,
            sync_status,
        }))
    }

    async fn save(&self, wizard: Wizard) -> Result<(), RepositoryError> {
        let template_json = serde_json::to_string(&wizard.template).map_err(|error| {
            RepositoryError::Decode(format!("template for wizard `{}`: {error}", wizard.id))
        })?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO wizard (
                id, owner_id, location_id, name, template_json, sync_status, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                location_id = excluded.location_id,
                name = excluded.name,
                template_json = excluded.template_json,
                sync_status = excluded.sync_status,
                updated_at = excluded.updated_at",
        )
        .bind(&wizard.id.0)
        .bind(&wizard.owner_id)
        .bind(&wizard.location_id)
        .bind(&wizard.name)
        .bind(&template_json)
        .bind(wizard.sync_status.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        // Page responses are replaced wholesale: a re-submitted wizard
        // carries its complete answer set.
        sqlx::query("DELETE FROM wizard_page_response WHERE wizard_id = ?")
            .bind(&wizard.id.0)
            .execute(&self.pool)
            .await?;

        for (page_id, answers) in &wizard.responses.pages {
            let answers_json = serde_json::to_string(answers).map_err(|error| {
                RepositoryError::Decode(format!(
                    "answers for wizard `{}` page `{page_id}`: {error}",
                    wizard.id
                ))
            })?;

            sqlx::query(
                "INSERT INTO wizard_page_response (id, wizard_id, page_id, answers_json, submitted_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(format!("WRESP-{}", Uuid::new_v4().simple()))
            .bind(&wizard.id.0)
            .bind(page_id)
            .bind(&answers_json)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn set_sync_status(
        &self,
        id: &WizardId,
        status: SyncStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE wizard SET sync_status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!("wizard `{id}` not found")));
        }
        Ok(())
    }
}

impl SqlWizardRepository {
    async fn load_responses(&self, id: &WizardId) -> Result<ResponseSet, RepositoryError> {
        let rows = sqlx::query(
            "SELECT page_id, answers_json
             FROM wizard_page_response
             WHERE wizard_id = ?",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut pages = HashMap::new();
        for row in rows {
            let page_id: String = row.try_get("page_id")?;
            let answers_raw: String = row.try_get("answers_json")?;
            let answers: HashMap<String, Answer> =
                serde_json::from_str(&answers_raw).map_err(|error| {
                    RepositoryError::Decode(format!(
                        "invalid answers for wizard `{id}` page `{page_id}`: {error}"
                    ))
                })?;
            pages.insert(page_id, answers);
        }

        Ok(ResponseSet { pages })
    }
}

#[cfg(test)]
mod tests {
    use onboardly_core::domain::wizard::{
        Answer, Block, BlockKind, BlockMode, Page, ResponseSet, SyncStatus, Wizard, WizardId,
        WizardTemplate,
    };

    use super::SqlWizardRepository;
    use crate::migrations;
    use crate::repositories::WizardRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn sample_wizard() -> Wizard {
        let template = WizardTemplate {
            pages: vec![Page {
                id: "p1".to_string(),
                title: "Business basics".to_string(),
                blocks: vec![Block {
                    id: "b1".to_string(),
                    kind: BlockKind::Tag,
                    mode: BlockMode::Create,
                    reference_id: None,
                    new_entity: Default::default(),
                }],
            }],
        };

        let mut responses = ResponseSet::default();
        responses.insert("p1", "b1", Answer::text("vip, launch"));

        Wizard {
            id: WizardId("WIZ-001".to_string()),
            owner_id: "user-1".to_string(),
            location_id: "loc-1".to_string(),
            name: "Acme onboarding".to_string(),
            template,
            responses,
            sync_status: SyncStatus::Pending,
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trips_template_and_answers() {
        let pool = setup_pool().await;
        let repo = SqlWizardRepository::new(pool.clone());
        let wizard = sample_wizard();

        repo.save(wizard.clone()).await.expect("save wizard");

        let found =
            repo.find_by_id(&wizard.id).await.expect("find wizard").expect("wizard exists");
        assert_eq!(found, wizard);

        pool.close().await;
    }

    #[tokio::test]
    async fn resubmission_replaces_page_responses() {
        let pool = setup_pool().await;
        let repo = SqlWizardRepository::new(pool.clone());
        let mut wizard = sample_wizard();
        repo.save(wizard.clone()).await.expect("save wizard");

        wizard.responses = ResponseSet::default();
        wizard.responses.insert("p1", "b1", Answer::text("returning"));
        repo.save(wizard.clone()).await.expect("resave wizard");

        let found =
            repo.find_by_id(&wizard.id).await.expect("find wizard").expect("wizard exists");
        assert_eq!(
            found.responses.answer("p1", "b1").and_then(|answer| answer.trimmed_text()),
            Some("returning".to_string())
        );

        pool.close().await;
    }

    #[tokio::test]
    async fn set_sync_status_updates_the_user_visible_state() {
        let pool = setup_pool().await;
        let repo = SqlWizardRepository::new(pool.clone());
        let wizard = sample_wizard();
        repo.save(wizard.clone()).await.expect("save wizard");

        repo.set_sync_status(&wizard.id, SyncStatus::Synced).await.expect("set status");

        let found =
            repo.find_by_id(&wizard.id).await.expect("find wizard").expect("wizard exists");
        assert_eq!(found.sync_status, SyncStatus::Synced);

        let missing = repo
            .set_sync_status(&WizardId("WIZ-missing".to_string()), SyncStatus::Error)
            .await;
        assert!(missing.is_err());

        pool.close().await;
    }
}
