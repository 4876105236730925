// SQLite implementation of the AttendanceStore trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::BTreeMap;

use crate::core::attendance::{
    AttendanceEvent, AttendanceStore, EventSummary, MemberStatus, MemberSummary, Membership,
    SquadMember, SquadSummary, User,
};
use crate::core::errors::{BotError, BotResult};
use crate::infra::database::{decode_time, encode_time};

#[derive(Clone)]
pub struct SqliteAttendanceStore {
    pool: SqlitePool,
}

impl SqliteAttendanceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> BotResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                discord_id INTEGER NOT NULL UNIQUE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS attendance_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                host_id INTEGER REFERENCES users(id),
                cohost_id INTEGER REFERENCES users(id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS squads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id INTEGER NOT NULL REFERENCES attendance_events(id) ON DELETE CASCADE,
                name TEXT NOT NULL CHECK (length(name) > 0),
                UNIQUE (event_id, name)
            )
            "#,
            // event_id is repeated here so "one squad per user per event" is a constraint
            r#"
            CREATE TABLE IF NOT EXISTS squad_members (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                squad_id INTEGER NOT NULL REFERENCES squads(id) ON DELETE CASCADE,
                event_id INTEGER NOT NULL REFERENCES attendance_events(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL REFERENCES users(id),
                status TEXT NOT NULL DEFAULT 'active',
                is_lead INTEGER NOT NULL DEFAULT 0,
                split_from TEXT,
                UNIQUE (squad_id, user_id),
                UNIQUE (event_id, user_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS attendance_staff (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id INTEGER NOT NULL REFERENCES attendance_events(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL REFERENCES users(id),
                UNIQUE (event_id, user_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS active_events (
                user_id INTEGER PRIMARY KEY REFERENCES users(id),
                event_id INTEGER NOT NULL REFERENCES attendance_events(id) ON DELETE CASCADE
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_attendance_events_date
            ON attendance_events(date DESC)
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
}

fn map_event(row: &SqliteRow) -> BotResult<AttendanceEvent> {
    Ok(AttendanceEvent {
        id: row.get("id"),
        date: decode_time(&row.get::<String, _>("date"))?,
        host_id: row.get("host_id"),
        cohost_id: row.get("cohost_id"),
    })
}

fn map_member(row: &SqliteRow) -> BotResult<SquadMember> {
    Ok(SquadMember {
        id: row.get("id"),
        squad_id: row.get("squad_id"),
        user_id: row.get("user_id"),
        status: row.get::<String, _>("status").parse()?,
        is_lead: row.get::<i64, _>("is_lead") != 0,
        split_from: row.get("split_from"),
    })
}

/// Find-or-create the squad, then insert the member. Runs on whatever
/// connection it is given so callers can wrap it in a transaction.
async fn insert_member_on(
    conn: &mut SqliteConnection,
    event_id: i64,
    user_id: i64,
    squad_name: &str,
    status: MemberStatus,
    split_from: Option<&str>,
) -> BotResult<SquadMember> {
    sqlx::query(
        r#"
        INSERT INTO squads (event_id, name) VALUES (?, ?)
        ON CONFLICT (event_id, name) DO NOTHING
        "#,
    )
    .bind(event_id)
    .bind(squad_name)
    .execute(&mut *conn)
    .await
    .map_err(BotError::database)?;

    let squad_id: i64 = sqlx::query_scalar("SELECT id FROM squads WHERE event_id = ? AND name = ?")
        .bind(event_id)
        .bind(squad_name)
        .fetch_one(&mut *conn)
        .await
        .map_err(BotError::database)?;

    let row = sqlx::query(
        r#"
        INSERT INTO squad_members (squad_id, event_id, user_id, status, is_lead, split_from)
        VALUES (?, ?, ?, ?, 0, ?)
        RETURNING id, squad_id, user_id, status, is_lead, split_from
        "#,
    )
    .bind(squad_id)
    .bind(event_id)
    .bind(user_id)
    .bind(status.as_str())
    .bind(split_from)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        BotError::database(e)
            .with_context("event_id", event_id)
            .with_context("squad", squad_name)
    })?;

    map_member(&row)
}

async fn delete_memberships_on(
    conn: &mut SqliteConnection,
    event_id: i64,
    user_id: i64,
) -> BotResult<u64> {
    let result = sqlx::query("DELETE FROM squad_members WHERE event_id = ? AND user_id = ?")
        .bind(event_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await
        .map_err(BotError::database)?;

    // Squads nobody is left in are noise in the summary
    sqlx::query(
        r#"
        DELETE FROM squads
        WHERE event_id = ?
          AND NOT EXISTS (SELECT 1 FROM squad_members m WHERE m.squad_id = squads.id)
        "#,
    )
    .bind(event_id)
    .execute(&mut *conn)
    .await
    .map_err(BotError::database)?;

    Ok(result.rows_affected())
}

#[async_trait]
impl AttendanceStore for SqliteAttendanceStore {
    async fn upsert_user(&self, discord_id: u64) -> BotResult<User> {
        // The no-op update makes RETURNING yield the existing row on conflict
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO users (discord_id) VALUES (?)
            ON CONFLICT (discord_id) DO UPDATE SET discord_id = excluded.discord_id
            RETURNING id
            "#,
        )
        .bind(discord_id as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(BotError::database)?;

        Ok(User { id, discord_id })
    }

    async fn insert_event(
        &self,
        date: DateTime<Utc>,
        host_id: Option<i64>,
        cohost_id: Option<i64>,
    ) -> BotResult<AttendanceEvent> {
        let row = sqlx::query(
            r#"
            INSERT INTO attendance_events (date, host_id, cohost_id)
            VALUES (?, ?, ?)
            RETURNING id, date, host_id, cohost_id
            "#,
        )
        .bind(encode_time(&date))
        .bind(host_id)
        .bind(cohost_id)
        .fetch_one(&self.pool)
        .await
        .map_err(BotError::database)?;

        map_event(&row)
    }

    async fn get_event(&self, event_id: i64) -> BotResult<Option<AttendanceEvent>> {
        let row = sqlx::query("SELECT id, date, host_id, cohost_id FROM attendance_events WHERE id = ?")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(BotError::database)?;

        row.as_ref().map(map_event).transpose()
    }

    async fn list_recent_events(&self, limit: usize) -> BotResult<Vec<AttendanceEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, date, host_id, cohost_id
            FROM attendance_events
            ORDER BY date DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(BotError::database)?;

        rows.iter().map(map_event).collect()
    }

    async fn delete_event(&self, event_id: i64) -> BotResult<bool> {
        let result = sqlx::query("DELETE FROM attendance_events WHERE id = ?")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(BotError::database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_cohost(&self, event_id: i64, cohost_id: Option<i64>) -> BotResult<()> {
        sqlx::query("UPDATE attendance_events SET cohost_id = ? WHERE id = ?")
            .bind(cohost_id)
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(BotError::database)?;
        Ok(())
    }

    async fn find_membership(
        &self,
        event_id: i64,
        user_id: i64,
    ) -> BotResult<Option<Membership>> {
        let row = sqlx::query(
            r#"
            SELECT m.id, m.squad_id, m.user_id, m.status, m.is_lead, m.split_from, s.name
            FROM squad_members m
            JOIN squads s ON s.id = m.squad_id
            WHERE m.event_id = ? AND m.user_id = ?
            "#,
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(BotError::database)?;

        match row {
            Some(row) => Ok(Some(Membership {
                squad_name: row.get("name"),
                member: map_member(&row)?,
            })),
            None => Ok(None),
        }
    }

    async fn insert_member(
        &self,
        event_id: i64,
        user_id: i64,
        squad_name: &str,
    ) -> BotResult<SquadMember> {
        let mut tx = self.pool.begin().await.map_err(BotError::database)?;
        let member = insert_member_on(
            &mut *tx,
            event_id,
            user_id,
            squad_name,
            MemberStatus::Active,
            None,
        )
        .await?;
        tx.commit().await.map_err(BotError::database)?;
        Ok(member)
    }

    async fn replace_membership(
        &self,
        event_id: i64,
        user_id: i64,
        squad_name: &str,
        status: MemberStatus,
        split_from: Option<String>,
    ) -> BotResult<SquadMember> {
        // Dropping `tx` on an early return rolls back the delete
        let mut tx = self.pool.begin().await.map_err(BotError::database)?;
        delete_memberships_on(&mut *tx, event_id, user_id).await?;
        let member = insert_member_on(
            &mut *tx,
            event_id,
            user_id,
            squad_name,
            status,
            split_from.as_deref(),
        )
        .await?;
        tx.commit().await.map_err(BotError::database)?;
        Ok(member)
    }

    async fn remove_memberships(&self, event_id: i64, user_id: i64) -> BotResult<u64> {
        let mut tx = self.pool.begin().await.map_err(BotError::database)?;
        let removed = delete_memberships_on(&mut *tx, event_id, user_id).await?;
        tx.commit().await.map_err(BotError::database)?;
        Ok(removed)
    }

    async fn update_member_state(
        &self,
        member_id: i64,
        status: MemberStatus,
        is_lead: bool,
    ) -> BotResult<()> {
        sqlx::query("UPDATE squad_members SET status = ?, is_lead = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(is_lead as i64)
            .bind(member_id)
            .execute(&self.pool)
            .await
            .map_err(BotError::database)?;
        Ok(())
    }

    async fn add_staff(&self, event_id: i64, user_id: i64) -> BotResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO attendance_staff (event_id, user_id) VALUES (?, ?)
            ON CONFLICT (event_id, user_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(BotError::database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_staff(&self, event_id: i64, user_id: i64) -> BotResult<bool> {
        let result = sqlx::query("DELETE FROM attendance_staff WHERE event_id = ? AND user_id = ?")
            .bind(event_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(BotError::database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_summary(&self, event_id: i64) -> BotResult<Option<EventSummary>> {
        let row = sqlx::query(
            r#"
            SELECT e.id, e.date, e.host_id, e.cohost_id,
                   h.discord_id AS host_discord, c.discord_id AS cohost_discord
            FROM attendance_events e
            LEFT JOIN users h ON h.id = e.host_id
            LEFT JOIN users c ON c.id = e.cohost_id
            WHERE e.id = ?
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(BotError::database)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let event = map_event(&row)?;
        let host = row.get::<Option<i64>, _>("host_discord").map(|id| id as u64);
        let cohost = row.get::<Option<i64>, _>("cohost_discord").map(|id| id as u64);

        let staff: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT u.discord_id
            FROM attendance_staff s
            JOIN users u ON u.id = s.user_id
            WHERE s.event_id = ?
            ORDER BY s.id
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(BotError::database)?;

        let member_rows = sqlx::query(
            r#"
            SELECT s.name, u.discord_id, m.status, m.is_lead, m.split_from
            FROM squads s
            JOIN squad_members m ON m.squad_id = s.id
            JOIN users u ON u.id = m.user_id
            WHERE s.event_id = ?
            ORDER BY s.id, m.is_lead DESC, m.id
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(BotError::database)?;

        // BTreeMap keyed by first-seen position keeps squads in creation order
        let mut order: Vec<String> = Vec::new();
        let mut squads: BTreeMap<usize, SquadSummary> = BTreeMap::new();
        for row in &member_rows {
            let name: String = row.get("name");
            let idx = match order.iter().position(|n| *n == name) {
                Some(idx) => idx,
                None => {
                    order.push(name.clone());
                    order.len() - 1
                }
            };
            let member = MemberSummary {
                discord_id: row.get::<i64, _>("discord_id") as u64,
                status: row.get::<String, _>("status").parse()?,
                is_lead: row.get::<i64, _>("is_lead") != 0,
                split_from: row.get("split_from"),
            };
            squads
                .entry(idx)
                .or_insert_with(|| SquadSummary {
                    name,
                    members: Vec::new(),
                })
                .members
                .push(member);
        }

        Ok(Some(EventSummary {
            event,
            host,
            cohost,
            staff: staff.into_iter().map(|id| id as u64).collect(),
            squads: squads.into_values().collect(),
        }))
    }

    async fn set_active_event(&self, user_id: i64, event_id: i64) -> BotResult<()> {
        sqlx::query(
            r#"
            INSERT INTO active_events (user_id, event_id) VALUES (?, ?)
            ON CONFLICT (user_id) DO UPDATE SET event_id = excluded.event_id
            "#,
        )
        .bind(user_id)
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(BotError::database)?;
        Ok(())
    }

    async fn get_active_event(&self, user_id: i64) -> BotResult<Option<i64>> {
        sqlx::query_scalar("SELECT event_id FROM active_events WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(BotError::database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::attendance::AttendanceService;
    use crate::infra::database::memory_pool;
    use chrono::TimeZone;

    async fn store() -> SqliteAttendanceStore {
        let store = SqliteAttendanceStore::new(memory_pool().await);
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_event_round_trips_date() {
        let service = AttendanceService::new(store().await);
        let date = Utc.with_ymd_and_hms(2024, 11, 2, 19, 0, 0).unwrap()
            + chrono::Duration::milliseconds(250);

        let event = service.create_event(date, Some(1), None).await.unwrap();
        assert_eq!(event.date, date);
        assert_eq!(service.get_event(event.id).await.unwrap().date, date);
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let store = store().await;
        let service = AttendanceService::new(store.clone());
        let event = service.create_event(Utc::now(), None, None).await.unwrap();

        let first = service.add_user_to_squad(event.id, 7, "111").await.unwrap();
        let second = service.add_user_to_squad(event.id, 7, "111").await.unwrap();
        assert_eq!(first.id, second.id);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM squad_members")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        // The constraint holds even when the service check is bypassed
        let user = store.upsert_user(7).await.unwrap();
        assert!(store.insert_member(event.id, user.id, "222").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_move_keeps_original_squad() {
        let store = store().await;
        let service = AttendanceService::new(store.clone());
        let event = service.create_event(Utc::now(), None, None).await.unwrap();
        service.add_user_to_squad(event.id, 7, "111").await.unwrap();
        service.mark_late(event.id, 7).await.unwrap();

        // An empty squad name violates the CHECK after the delete already ran
        let user = store.upsert_user(7).await.unwrap();
        let result = store
            .replace_membership(event.id, user.id, "", MemberStatus::Late, None)
            .await;
        assert!(result.is_err());

        let membership = store.find_membership(event.id, user.id).await.unwrap().unwrap();
        assert_eq!(membership.squad_name, "111");
        assert_eq!(membership.member.status, MemberStatus::Late);
    }

    #[tokio::test]
    async fn test_move_split_and_summary() {
        let store = store().await;
        let service = AttendanceService::new(store.clone());
        let event = service.create_event(Utc::now(), Some(1), Some(2)).await.unwrap();

        service.add_user_to_squad(event.id, 10, "alpha").await.unwrap();
        service.add_user_to_squad(event.id, 11, "alpha").await.unwrap();
        service.mark_lead(event.id, 10, true).await.unwrap();
        service.split_user(event.id, 11, "bravo").await.unwrap();
        service.move_user_to_squad(event.id, 10, "charlie").await.unwrap();
        service.add_staff(event.id, 3).await.unwrap();
        assert!(!service.add_staff(event.id, 3).await.unwrap());

        let summary = service.get_event_summary(event.id).await.unwrap();
        assert_eq!(summary.host, Some(1));
        assert_eq!(summary.cohost, Some(2));
        assert_eq!(summary.staff, vec![3]);
        let names: Vec<_> = summary.squads.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["bravo", "charlie"]);
        assert_eq!(summary.squads[0].members[0].split_from.as_deref(), Some("alpha"));
        // Moving drops the lead marker
        assert!(!summary.squads[1].members[0].is_lead);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = store().await;
        let service = AttendanceService::new(store.clone());
        let event = service.create_event(Utc::now(), None, None).await.unwrap();
        service.add_user_to_squad(event.id, 7, "111").await.unwrap();
        service.add_staff(event.id, 8).await.unwrap();
        service.select_event(8, event.id).await.unwrap();

        service.delete_event(event.id).await.unwrap();
        for table in ["squads", "squad_members", "attendance_staff", "active_events"] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&store.pool)
                .await
                .unwrap();
            assert_eq!(count, 0, "{}", table);
        }
        assert!(service.delete_event(event.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_active_event_selection() {
        let service = AttendanceService::new(store().await);
        let first = service.create_event(Utc::now(), None, None).await.unwrap();
        let second = service.create_event(Utc::now(), None, None).await.unwrap();

        assert_eq!(service.active_event(5).await.unwrap(), None);
        service.select_event(5, first.id).await.unwrap();
        service.select_event(5, second.id).await.unwrap();
        assert_eq!(service.require_active_event(5).await.unwrap(), second.id);

        let recent = service.list_recent_events(1).await.unwrap();
        assert_eq!(recent.len(), 1);
    }
}
