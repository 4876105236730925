// SQLite implementations of AccountStore and LocationStore

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::core::errors::{BotError, BotResult};
use crate::core::vrchat::{AccountStore, FriendLocation, LocationStore, VrchatAccount};
use crate::infra::database::{decode_opt_time, decode_time, encode_time};

const ACCOUNT_COLUMNS: &str =
    "discord_id, vrchat_user_id, display_name, verified, verification_code, verified_at";

/// Accounts, consent and locations share one pool.
#[derive(Clone)]
pub struct SqliteVrchatStore {
    pool: SqlitePool,
}

impl SqliteVrchatStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> BotResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS vrchat_accounts (
                discord_id INTEGER PRIMARY KEY,
                vrchat_user_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                verified INTEGER NOT NULL DEFAULT 0,
                verification_code TEXT,
                verified_at TEXT
            )
            "#,
            // A VRChat account can be pending for several people but verified for one
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_vrchat_accounts_verified
            ON vrchat_accounts(vrchat_user_id) WHERE verified = 1
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS friend_location_consent (
                discord_id INTEGER PRIMARY KEY,
                consented INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS friend_locations (
                vrchat_user_id TEXT PRIMARY KEY,
                location TEXT NOT NULL,
                world_id TEXT,
                instance_id TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(BotError::database)?;
        }
        Ok(())
    }

    async fn fetch_account(&self, sql: &str, value: &str) -> BotResult<Option<VrchatAccount>> {
        let row = sqlx::query(sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(BotError::database)?;
        row.as_ref().map(map_account).transpose()
    }
}

fn map_account(row: &SqliteRow) -> BotResult<VrchatAccount> {
    Ok(VrchatAccount {
        discord_id: row.get::<i64, _>("discord_id") as u64,
        vrchat_user_id: row.get("vrchat_user_id"),
        display_name: row.get("display_name"),
        verified: row.get::<i64, _>("verified") != 0,
        verification_code: row.get("verification_code"),
        verified_at: decode_opt_time(row.get("verified_at"))?,
    })
}

#[async_trait]
impl AccountStore for SqliteVrchatStore {
    async fn get_account(&self, discord_id: u64) -> BotResult<Option<VrchatAccount>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM vrchat_accounts WHERE discord_id = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(discord_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(BotError::database)?;
        row.as_ref().map(map_account).transpose()
    }

    async fn find_verified_by_vrchat_id(
        &self,
        vrchat_user_id: &str,
    ) -> BotResult<Option<VrchatAccount>> {
        self.fetch_account(
            &format!(
                "SELECT {} FROM vrchat_accounts WHERE vrchat_user_id = ? AND verified = 1",
                ACCOUNT_COLUMNS
            ),
            vrchat_user_id,
        )
        .await
    }

    async fn upsert_account(&self, account: &VrchatAccount) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT INTO vrchat_accounts
                (discord_id, vrchat_user_id, display_name, verified, verification_code, verified_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (discord_id) DO UPDATE SET
                vrchat_user_id = excluded.vrchat_user_id,
                display_name = excluded.display_name,
                verified = excluded.verified,
                verification_code = excluded.verification_code,
                verified_at = excluded.verified_at
            "#,
        )
        .bind(account.discord_id as i64)
        .bind(&account.vrchat_user_id)
        .bind(&account.display_name)
        .bind(account.verified as i64)
        .bind(&account.verification_code)
        .bind(account.verified_at.as_ref().map(encode_time))
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => BotError::validation(
                "ACCOUNT_LINKED",
                "That VRChat account is already linked to another Discord user.",
            ),
            other => BotError::database(other).with_context("discord_id", account.discord_id),
        })?;
        Ok(())
    }

    async fn delete_account(&self, discord_id: u64) -> BotResult<bool> {
        let result = sqlx::query("DELETE FROM vrchat_accounts WHERE discord_id = ?")
            .bind(discord_id as i64)
            .execute(&self.pool)
            .await
            .map_err(BotError::database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_verified(&self) -> BotResult<Vec<VrchatAccount>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM vrchat_accounts WHERE verified = 1 ORDER BY discord_id",
            ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(BotError::database)?;
        rows.iter().map(map_account).collect()
    }
}

#[async_trait]
impl LocationStore for SqliteVrchatStore {
    async fn get_consent(&self, discord_id: u64) -> BotResult<bool> {
        let consented: Option<i64> =
            sqlx::query_scalar("SELECT consented FROM friend_location_consent WHERE discord_id = ?")
                .bind(discord_id as i64)
                .fetch_optional(&self.pool)
                .await
                .map_err(BotError::database)?;
        Ok(consented.unwrap_or(0) != 0)
    }

    async fn set_consent(
        &self,
        discord_id: u64,
        consented: bool,
        now: DateTime<Utc>,
    ) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT INTO friend_location_consent (discord_id, consented, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (discord_id) DO UPDATE SET
                consented = excluded.consented,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(discord_id as i64)
        .bind(consented as i64)
        .bind(encode_time(&now))
        .execute(&self.pool)
        .await
        .map_err(BotError::database)?;
        Ok(())
    }

    async fn get_location(&self, vrchat_user_id: &str) -> BotResult<Option<FriendLocation>> {
        let row = sqlx::query(
            r#"
            SELECT vrchat_user_id, location, world_id, instance_id, updated_at
            FROM friend_locations
            WHERE vrchat_user_id = ?
            "#,
        )
        .bind(vrchat_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(BotError::database)?;

        match row {
            Some(row) => Ok(Some(FriendLocation {
                vrchat_user_id: row.get("vrchat_user_id"),
                location: row.get("location"),
                world_id: row.get("world_id"),
                instance_id: row.get("instance_id"),
                updated_at: decode_time(&row.get::<String, _>("updated_at"))?,
            })),
            None => Ok(None),
        }
    }

    async fn upsert_location(&self, location: &FriendLocation) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT INTO friend_locations (vrchat_user_id, location, world_id, instance_id, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (vrchat_user_id) DO UPDATE SET
                location = excluded.location,
                world_id = excluded.world_id,
                instance_id = excluded.instance_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&location.vrchat_user_id)
        .bind(&location.location)
        .bind(&location.world_id)
        .bind(&location.instance_id)
        .bind(encode_time(&location.updated_at))
        .execute(&self.pool)
        .await
        .map_err(BotError::database)?;
        Ok(())
    }

    async fn delete_location(&self, vrchat_user_id: &str) -> BotResult<()> {
        sqlx::query("DELETE FROM friend_locations WHERE vrchat_user_id = ?")
            .bind(vrchat_user_id)
            .execute(&self.pool)
            .await
            .map_err(BotError::database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vrchat::{FriendLocationService, LocationUpdate, PipelineEvent};
    use crate::infra::database::memory_pool;

    async fn store() -> SqliteVrchatStore {
        let store = SqliteVrchatStore::new(memory_pool().await);
        store.migrate().await.unwrap();
        store
    }

    fn account(discord_id: u64, vrchat: &str, verified: bool) -> VrchatAccount {
        VrchatAccount {
            discord_id,
            vrchat_user_id: vrchat.into(),
            display_name: "Agent".into(),
            verified,
            verification_code: (!verified).then(|| "SHIELD-ABC123".to_string()),
            verified_at: verified.then(Utc::now),
        }
    }

    #[tokio::test]
    async fn test_verified_account_is_unique() {
        let store = store().await;
        store.upsert_account(&account(1, "usr_a", true)).await.unwrap();
        // Pending claims on the same account are fine
        store.upsert_account(&account(2, "usr_a", false)).await.unwrap();

        let err = store.upsert_account(&account(2, "usr_a", true)).await.unwrap_err();
        assert_eq!(err.code, "ACCOUNT_LINKED");

        let owner = store.find_verified_by_vrchat_id("usr_a").await.unwrap().unwrap();
        assert_eq!(owner.discord_id, 1);
        assert_eq!(store.list_verified().await.unwrap().len(), 1);

        assert!(store.delete_account(2).await.unwrap());
        assert!(!store.delete_account(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_location_pipeline_through_sqlite() {
        let store = store().await;
        store.upsert_account(&account(1, "usr_a", true)).await.unwrap();
        let service = FriendLocationService::new(store.clone(), store.clone());

        service.set_consent(1, true).await.unwrap();
        let event = PipelineEvent::FriendOnline {
            user_id: "usr_a".into(),
            location: "wrld_x:42~friends(usr_a)".into(),
        };
        assert!(matches!(
            service.apply(&event, Utc::now()).await.unwrap(),
            LocationUpdate::Stored(_)
        ));

        let location = service.location_of(1).await.unwrap();
        assert_eq!(location.world_id.as_deref(), Some("wrld_x"));
        assert_eq!(location.instance_id.as_deref(), Some("42"));

        service.set_consent(1, false).await.unwrap();
        assert!(store.get_location("usr_a").await.unwrap().is_none());
    }
}
