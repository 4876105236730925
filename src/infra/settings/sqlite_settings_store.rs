// SQLite implementation of the GuildSettingsStore trait

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::core::errors::{BotError, BotResult};
use crate::core::settings::{GroupRoleMapping, GuildSettings, GuildSettingsStore};

#[derive(Clone)]
pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> BotResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS guild_settings (
                guild_id INTEGER PRIMARY KEY,
                vrchat_group_id TEXT,
                loa_role_id INTEGER,
                loa_channel_id INTEGER,
                verified_role_id INTEGER,
                whitelist_role_ids TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(BotError::database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS group_role_mappings (
                guild_id INTEGER NOT NULL,
                discord_role_id INTEGER NOT NULL,
                vrchat_role_id TEXT NOT NULL,
                PRIMARY KEY (guild_id, discord_role_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(BotError::database)?;

        Ok(())
    }
}

fn opt_id(row: &SqliteRow, column: &str) -> Option<u64> {
    row.get::<Option<i64>, _>(column).map(|id| id as u64)
}

fn map_settings(row: &SqliteRow) -> BotResult<GuildSettings> {
    let roles: String = row.get("whitelist_role_ids");
    // Stored as strings; JSON numbers would lose precision in other readers
    let roles: Vec<String> = serde_json::from_str(&roles).map_err(BotError::database)?;
    let whitelist_role_ids = roles
        .iter()
        .map(|r| r.parse::<u64>().map_err(BotError::database))
        .collect::<BotResult<Vec<u64>>>()?;

    Ok(GuildSettings {
        guild_id: row.get::<i64, _>("guild_id") as u64,
        vrchat_group_id: row.get("vrchat_group_id"),
        loa_role_id: opt_id(row, "loa_role_id"),
        loa_channel_id: opt_id(row, "loa_channel_id"),
        verified_role_id: opt_id(row, "verified_role_id"),
        whitelist_role_ids,
    })
}

#[async_trait]
impl GuildSettingsStore for SqliteSettingsStore {
    async fn get_settings(&self, guild_id: u64) -> BotResult<GuildSettings> {
        let row = sqlx::query("SELECT * FROM guild_settings WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(BotError::database)?;

        match row {
            Some(row) => map_settings(&row),
            None => Ok(GuildSettings::empty(guild_id)),
        }
    }

    async fn save_settings(&self, settings: &GuildSettings) -> BotResult<()> {
        let roles: Vec<String> = settings
            .whitelist_role_ids
            .iter()
            .map(u64::to_string)
            .collect();
        let roles = serde_json::to_string(&roles).map_err(BotError::database)?;

        sqlx::query(
            r#"
            INSERT INTO guild_settings
                (guild_id, vrchat_group_id, loa_role_id, loa_channel_id, verified_role_id, whitelist_role_ids)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (guild_id) DO UPDATE SET
                vrchat_group_id = excluded.vrchat_group_id,
                loa_role_id = excluded.loa_role_id,
                loa_channel_id = excluded.loa_channel_id,
                verified_role_id = excluded.verified_role_id,
                whitelist_role_ids = excluded.whitelist_role_ids
            "#,
        )
        .bind(settings.guild_id as i64)
        .bind(&settings.vrchat_group_id)
        .bind(settings.loa_role_id.map(|id| id as i64))
        .bind(settings.loa_channel_id.map(|id| id as i64))
        .bind(settings.verified_role_id.map(|id| id as i64))
        .bind(roles)
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::database(e).with_context("guild_id", settings.guild_id))?;

        Ok(())
    }

    async fn list_configured_guilds(&self) -> BotResult<Vec<GuildSettings>> {
        let rows = sqlx::query("SELECT * FROM guild_settings ORDER BY guild_id")
            .fetch_all(&self.pool)
            .await
            .map_err(BotError::database)?;
        rows.iter().map(map_settings).collect()
    }

    async fn get_role_mappings(&self, guild_id: u64) -> BotResult<Vec<GroupRoleMapping>> {
        let rows = sqlx::query(
            r#"
            SELECT discord_role_id, vrchat_role_id
            FROM group_role_mappings
            WHERE guild_id = ?
            ORDER BY discord_role_id
            "#,
        )
        .bind(guild_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(BotError::database)?;

        Ok(rows
            .iter()
            .map(|row| GroupRoleMapping {
                discord_role_id: row.get::<i64, _>("discord_role_id") as u64,
                vrchat_role_id: row.get("vrchat_role_id"),
            })
            .collect())
    }

    async fn upsert_role_mapping(
        &self,
        guild_id: u64,
        mapping: &GroupRoleMapping,
    ) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT INTO group_role_mappings (guild_id, discord_role_id, vrchat_role_id)
            VALUES (?, ?, ?)
            ON CONFLICT (guild_id, discord_role_id) DO UPDATE SET
                vrchat_role_id = excluded.vrchat_role_id
            "#,
        )
        .bind(guild_id as i64)
        .bind(mapping.discord_role_id as i64)
        .bind(&mapping.vrchat_role_id)
        .execute(&self.pool)
        .await
        .map_err(BotError::database)?;
        Ok(())
    }

    async fn delete_role_mapping(&self, guild_id: u64, discord_role_id: u64) -> BotResult<bool> {
        let result = sqlx::query(
            "DELETE FROM group_role_mappings WHERE guild_id = ? AND discord_role_id = ?",
        )
        .bind(guild_id as i64)
        .bind(discord_role_id as i64)
        .execute(&self.pool)
        .await
        .map_err(BotError::database)?;
        Ok(result.rows_affected() > 0)
    }
}
