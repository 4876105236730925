// SQLite implementation of the LoaStore trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::core::errors::{BotError, BotResult};
use crate::core::loa::{LoaRequest, LoaStatus, LoaStore, NewLoaRequest};
use crate::infra::database::{decode_time, encode_time};

const COLUMNS: &str = "id, guild_id, discord_id, reason, starts_at, ends_at, status, reviewed_by";

#[derive(Clone)]
pub struct SqliteLoaStore {
    pool: SqlitePool,
}

impl SqliteLoaStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> BotResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS loa_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                discord_id INTEGER NOT NULL,
                reason TEXT NOT NULL,
                starts_at TEXT NOT NULL,
                ends_at TEXT NOT NULL,
                status TEXT NOT NULL,
                reviewed_by INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(BotError::database)?;

        // At most one open request per member per guild
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_loa_one_open
            ON loa_requests(guild_id, discord_id)
            WHERE status IN ('pending', 'approved')
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(BotError::database)?;

        Ok(())
    }
}

fn map_request(row: &SqliteRow) -> BotResult<LoaRequest> {
    Ok(LoaRequest {
        id: row.get("id"),
        guild_id: row.get::<i64, _>("guild_id") as u64,
        discord_id: row.get::<i64, _>("discord_id") as u64,
        reason: row.get("reason"),
        starts_at: decode_time(&row.get::<String, _>("starts_at"))?,
        ends_at: decode_time(&row.get::<String, _>("ends_at"))?,
        status: row.get::<String, _>("status").parse()?,
        reviewed_by: row.get::<Option<i64>, _>("reviewed_by").map(|id| id as u64),
    })
}

#[async_trait]
impl LoaStore for SqliteLoaStore {
    async fn insert(&self, request: NewLoaRequest) -> BotResult<LoaRequest> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO loa_requests (guild_id, discord_id, reason, starts_at, ends_at, status)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(request.guild_id as i64)
        .bind(request.discord_id as i64)
        .bind(&request.reason)
        .bind(encode_time(&request.starts_at))
        .bind(encode_time(&request.ends_at))
        .bind(LoaStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BotError::database(e).with_context("discord_id", request.discord_id))?;

        map_request(&row)
    }

    async fn get(&self, id: i64) -> BotResult<Option<LoaRequest>> {
        let row = sqlx::query(&format!("SELECT {} FROM loa_requests WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(BotError::database)?;
        row.as_ref().map(map_request).transpose()
    }

    async fn find_open(&self, guild_id: u64, discord_id: u64) -> BotResult<Option<LoaRequest>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM loa_requests
            WHERE guild_id = ? AND discord_id = ? AND status IN ('pending', 'approved')
            "#,
            COLUMNS
        ))
        .bind(guild_id as i64)
        .bind(discord_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(BotError::database)?;
        row.as_ref().map(map_request).transpose()
    }

    async fn list_open(&self, guild_id: u64) -> BotResult<Vec<LoaRequest>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM loa_requests
            WHERE guild_id = ? AND status IN ('pending', 'approved')
            ORDER BY starts_at, id
            "#,
            COLUMNS
        ))
        .bind(guild_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(BotError::database)?;
        rows.iter().map(map_request).collect()
    }

    async fn list_due(&self, now: DateTime<Utc>) -> BotResult<Vec<LoaRequest>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM loa_requests
            WHERE status = 'approved' AND ends_at <= ?
            ORDER BY ends_at, id
            "#,
            COLUMNS
        ))
        .bind(encode_time(&now))
        .fetch_all(&self.pool)
        .await
        .map_err(BotError::database)?;
        rows.iter().map(map_request).collect()
    }

    async fn set_status(
        &self,
        id: i64,
        status: LoaStatus,
        reviewed_by: Option<u64>,
    ) -> BotResult<()> {
        sqlx::query(
            r#"
            UPDATE loa_requests
            SET status = ?, reviewed_by = COALESCE(?, reviewed_by)
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(reviewed_by.map(|id| id as i64))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(BotError::database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loa::LoaService;
    use crate::infra::database::memory_pool;
    use chrono::Duration;

    async fn service() -> LoaService<SqliteLoaStore> {
        let store = SqliteLoaStore::new(memory_pool().await);
        store.migrate().await.unwrap();
        LoaService::new(store)
    }

    #[tokio::test]
    async fn test_request_approve_expire() {
        let service = service().await;
        let now = Utc::now();

        let request = service.request(1, 10, "2d", "Exams", now).await.unwrap();
        assert_eq!(request.status, LoaStatus::Pending);
        assert_eq!(request.ends_at - request.starts_at, Duration::days(2));

        let approved = service.approve(1, request.id, 20).await.unwrap();
        assert_eq!(approved.status, LoaStatus::Approved);
        assert_eq!(approved.reviewed_by, Some(20));

        assert!(service.expire_due(now + Duration::days(1)).await.unwrap().is_empty());
        let expired = service.expire_due(now + Duration::days(3)).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, LoaStatus::Expired);
        assert!(service.list_open(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_open_request_per_guild() {
        let service = service().await;
        let now = Utc::now();
        service.request(1, 10, "1w", "Vacation", now).await.unwrap();

        let err = service.request(1, 10, "1w", "Again", now).await.unwrap_err();
        assert_eq!(err.code, "LOA_ALREADY_OPEN");

        // Another guild is independent
        service.request(2, 10, "1w", "Vacation", now).await.unwrap();

        service.cancel(1, 10).await.unwrap();
        service.request(1, 10, "3 days", "Shorter", now).await.unwrap();
    }
}
