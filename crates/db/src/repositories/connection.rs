use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use onboardly_core::domain::connection::{ConnectionId, SavedConnection};

use super::{parse_optional_timestamp, parse_timestamp, ConnectionRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConnectionRepository {
    pool: DbPool,
}

impl SqlConnectionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConnectionRepository for SqlConnectionRepository {
    async fn find_for_location(
        &self,
        owner_id: &str,
        location_id: &str,
    ) -> Result<Option<SavedConnection>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, owner_id, location_id, token, last_used_at, created_at, updated_at
             FROM saved_connection
             WHERE owner_id = ? AND location_id = ?",
        )
        .bind(owner_id)
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(connection_from_row).transpose()
    }

    async fn save(&self, connection: SavedConnection) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO saved_connection (
                id, owner_id, location_id, token, last_used_at, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(owner_id, location_id) DO UPDATE SET
                token = excluded.token,
                last_used_at = excluded.last_used_at,
                updated_at = excluded.updated_at",
        )
        .bind(&connection.id.0)
        .bind(&connection.owner_id)
        .bind(&connection.location_id)
        .bind(&connection.token)
        .bind(connection.last_used_at.map(|value| value.to_rfc3339()))
        .bind(connection.created_at.to_rfc3339())
        .bind(connection.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_token(
        &self,
        id: &ConnectionId,
        token: &str,
        used_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE saved_connection
             SET token = ?, last_used_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(token)
        .bind(used_at.to_rfc3339())
        .bind(used_at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!("saved connection `{id}` not found")));
        }
        Ok(())
    }

    async fn touch_last_used(
        &self,
        id: &ConnectionId,
        used_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE saved_connection SET last_used_at = ? WHERE id = ?")
            .bind(used_at.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn connection_from_row(row: SqliteRow) -> Result<SavedConnection, RepositoryError> {
    Ok(SavedConnection {
        id: ConnectionId(row.try_get("id")?),
        owner_id: row.try_get("owner_id")?,
        location_id: row.try_get("location_id")?,
        token: row.try_get("token")?,
        last_used_at: parse_optional_timestamp("last_used_at", row.try_get("last_used_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
