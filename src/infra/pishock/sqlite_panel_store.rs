// SQLite implementation of the PanelStore trait

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::core::errors::{BotError, BotResult};
use crate::core::pishock::{PanelState, PanelStore};
use crate::infra::database::{decode_opt_time, encode_time};

#[derive(Clone)]
pub struct SqlitePanelStore {
    pool: SqlitePool,
}

impl SqlitePanelStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> BotResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pishock_panels (
                guild_id INTEGER PRIMARY KEY,
                channel_id INTEGER NOT NULL,
                message_id INTEGER,
                share_code TEXT NOT NULL,
                intensity INTEGER NOT NULL CHECK (intensity BETWEEN 1 AND 100),
                duration INTEGER NOT NULL CHECK (duration BETWEEN 1 AND 15),
                enabled INTEGER NOT NULL DEFAULT 1,
                cooldown_secs INTEGER NOT NULL DEFAULT 30,
                last_operated_by INTEGER,
                last_operated_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(BotError::database)?;
        Ok(())
    }
}

#[async_trait]
impl PanelStore for SqlitePanelStore {
    async fn get_panel(&self, guild_id: u64) -> BotResult<Option<PanelState>> {
        let row = sqlx::query("SELECT * FROM pishock_panels WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(BotError::database)?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(PanelState {
            guild_id: row.get::<i64, _>("guild_id") as u64,
            channel_id: row.get::<i64, _>("channel_id") as u64,
            message_id: row.get::<Option<i64>, _>("message_id").map(|id| id as u64),
            share_code: row.get("share_code"),
            intensity: row.get::<i64, _>("intensity") as u8,
            duration: row.get::<i64, _>("duration") as u8,
            enabled: row.get::<i64, _>("enabled") != 0,
            cooldown_secs: row.get::<i64, _>("cooldown_secs") as u32,
            last_operated_by: row
                .get::<Option<i64>, _>("last_operated_by")
                .map(|id| id as u64),
            last_operated_at: decode_opt_time(row.get("last_operated_at"))?,
        }))
    }

    async fn save_panel(&self, panel: &PanelState) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pishock_panels (
                guild_id, channel_id, message_id, share_code, intensity, duration,
                enabled, cooldown_secs, last_operated_by, last_operated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (guild_id) DO UPDATE SET
                channel_id = excluded.channel_id,
                message_id = excluded.message_id,
                share_code = excluded.share_code,
                intensity = excluded.intensity,
                duration = excluded.duration,
                enabled = excluded.enabled,
                cooldown_secs = excluded.cooldown_secs,
                last_operated_by = excluded.last_operated_by,
                last_operated_at = excluded.last_operated_at
            "#,
        )
        .bind(panel.guild_id as i64)
        .bind(panel.channel_id as i64)
        .bind(panel.message_id.map(|id| id as i64))
        .bind(&panel.share_code)
        .bind(panel.intensity as i64)
        .bind(panel.duration as i64)
        .bind(panel.enabled as i64)
        .bind(panel.cooldown_secs as i64)
        .bind(panel.last_operated_by.map(|id| id as i64))
        .bind(panel.last_operated_at.as_ref().map(encode_time))
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::database(e).with_context("guild_id", panel.guild_id))?;
        Ok(())
    }
}
