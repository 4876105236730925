// Attendance system core - events, squads, staff and member state.
//
// The service owns the rules (who may become lead, what "late" means for
// someone who left); the store owns atomicity. Anything that touches more than
// one row in a way that must not half-happen is a single store call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::attendance_models::{
    AttendanceEvent, EventSummary, MemberStatus, Membership, SquadMember, User,
};
use crate::core::errors::{BotError, BotResult};

// ============================================================================
// STORAGE TRAIT
// ============================================================================

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Find or create the user row for a Discord id in one statement.
    async fn upsert_user(&self, discord_id: u64) -> BotResult<User>;

    async fn insert_event(
        &self,
        date: DateTime<Utc>,
        host_id: Option<i64>,
        cohost_id: Option<i64>,
    ) -> BotResult<AttendanceEvent>;

    async fn get_event(&self, event_id: i64) -> BotResult<Option<AttendanceEvent>>;

    /// Most recent events first.
    async fn list_recent_events(&self, limit: usize) -> BotResult<Vec<AttendanceEvent>>;

    /// Delete an event and everything hanging off it. Returns false if it did not exist.
    async fn delete_event(&self, event_id: i64) -> BotResult<bool>;

    async fn set_cohost(&self, event_id: i64, cohost_id: Option<i64>) -> BotResult<()>;

    async fn find_membership(&self, event_id: i64, user_id: i64)
        -> BotResult<Option<Membership>>;

    /// Find-or-create the squad and insert the member. Must fail rather than
    /// create a second row for the same (squad, user).
    async fn insert_member(
        &self,
        event_id: i64,
        user_id: i64,
        squad_name: &str,
    ) -> BotResult<SquadMember>;

    /// Delete every membership of the user in the event and insert one into
    /// `squad_name`, atomically. The new row carries `status` and `split_from`.
    async fn replace_membership(
        &self,
        event_id: i64,
        user_id: i64,
        squad_name: &str,
        status: MemberStatus,
        split_from: Option<String>,
    ) -> BotResult<SquadMember>;

    /// Returns the number of rows removed.
    async fn remove_memberships(&self, event_id: i64, user_id: i64) -> BotResult<u64>;

    async fn update_member_state(
        &self,
        member_id: i64,
        status: MemberStatus,
        is_lead: bool,
    ) -> BotResult<()>;

    /// Returns false if the user already was staff.
    async fn add_staff(&self, event_id: i64, user_id: i64) -> BotResult<bool>;

    /// Returns false if the user was not staff.
    async fn remove_staff(&self, event_id: i64, user_id: i64) -> BotResult<bool>;

    async fn load_summary(&self, event_id: i64) -> BotResult<Option<EventSummary>>;

    async fn set_active_event(&self, user_id: i64, event_id: i64) -> BotResult<()>;

    async fn get_active_event(&self, user_id: i64) -> BotResult<Option<i64>>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// Result of `/attendance status` style updates so the caller can say what changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberUpdate {
    pub squad_name: String,
    pub status: MemberStatus,
    pub is_lead: bool,
}

pub struct AttendanceService<S: AttendanceStore> {
    store: S,
}

impl<S: AttendanceStore> AttendanceService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn create_event(
        &self,
        date: DateTime<Utc>,
        host: Option<u64>,
        cohost: Option<u64>,
    ) -> BotResult<AttendanceEvent> {
        let host_id = match host {
            Some(discord_id) => Some(self.store.upsert_user(discord_id).await?.id),
            None => None,
        };
        let cohost_id = match cohost {
            Some(discord_id) => Some(self.store.upsert_user(discord_id).await?.id),
            None => None,
        };

        let event = self.store.insert_event(date, host_id, cohost_id).await?;
        tracing::info!(event_id = event.id, date = %event.date, "Attendance event created");
        Ok(event)
    }

    pub async fn get_event(&self, event_id: i64) -> BotResult<AttendanceEvent> {
        self.store
            .get_event(event_id)
            .await?
            .ok_or_else(|| event_not_found(event_id))
    }

    pub async fn list_recent_events(&self, limit: usize) -> BotResult<Vec<AttendanceEvent>> {
        self.store.list_recent_events(limit).await
    }

    pub async fn delete_event(&self, event_id: i64) -> BotResult<()> {
        if !self.store.delete_event(event_id).await? {
            return Err(event_not_found(event_id));
        }
        tracing::info!(event_id, "Attendance event deleted");
        Ok(())
    }

    /// Remember which event a staff member is working on.
    pub async fn select_event(&self, discord_id: u64, event_id: i64) -> BotResult<AttendanceEvent> {
        let event = self.get_event(event_id).await?;
        let user = self.store.upsert_user(discord_id).await?;
        self.store.set_active_event(user.id, event.id).await?;
        Ok(event)
    }

    pub async fn active_event(&self, discord_id: u64) -> BotResult<Option<i64>> {
        let user = self.store.upsert_user(discord_id).await?;
        self.store.get_active_event(user.id).await
    }

    /// Like `active_event` but errors with a hint when nothing is selected.
    pub async fn require_active_event(&self, discord_id: u64) -> BotResult<i64> {
        self.active_event(discord_id).await?.ok_or_else(|| {
            BotError::validation(
                "NO_ACTIVE_EVENT",
                "No event selected. Use `/attendance select` first.",
            )
        })
    }

    /// Put a user into a squad.
    ///
    /// Adding someone to the squad they are already in returns the existing row.
    /// Adding someone who sits in a different squad is refused; use
    /// `move_user_to_squad` for that.
    pub async fn add_user_to_squad(
        &self,
        event_id: i64,
        discord_id: u64,
        squad_name: &str,
    ) -> BotResult<SquadMember> {
        let squad_name = validate_squad_name(squad_name)?;
        self.get_event(event_id).await?;
        let user = self.store.upsert_user(discord_id).await?;

        if let Some(existing) = self.store.find_membership(event_id, user.id).await? {
            if existing.squad_name == squad_name {
                return Ok(existing.member);
            }
            return Err(BotError::validation(
                "ALREADY_IN_SQUAD",
                format!(
                    "<@{}> is already in squad <#{}>. Move them instead.",
                    discord_id, existing.squad_name
                ),
            ));
        }

        self.store.insert_member(event_id, user.id, squad_name).await
    }

    /// Move a user into another squad. Keeps their status, drops the lead marker.
    pub async fn move_user_to_squad(
        &self,
        event_id: i64,
        discord_id: u64,
        squad_name: &str,
    ) -> BotResult<SquadMember> {
        let squad_name = validate_squad_name(squad_name)?;
        self.get_event(event_id).await?;
        let user = self.store.upsert_user(discord_id).await?;

        let status = self
            .store
            .find_membership(event_id, user.id)
            .await?
            .map(|m| m.member.status)
            .unwrap_or(MemberStatus::Active);

        let member = self
            .store
            .replace_membership(event_id, user.id, squad_name, status, None)
            .await?;
        tracing::info!(event_id, discord_id, squad = squad_name, "Member moved");
        Ok(member)
    }

    /// Split a member off into a new squad, remembering where they came from.
    pub async fn split_user(
        &self,
        event_id: i64,
        discord_id: u64,
        squad_name: &str,
    ) -> BotResult<SquadMember> {
        let squad_name = validate_squad_name(squad_name)?;
        let user = self.store.upsert_user(discord_id).await?;
        let current = self.require_membership(event_id, discord_id, user.id).await?;

        if current.squad_name == squad_name {
            return Err(BotError::validation(
                "SAME_SQUAD",
                "That member is already in this squad.",
            ));
        }

        self.store
            .replace_membership(
                event_id,
                user.id,
                squad_name,
                current.member.status,
                Some(current.squad_name),
            )
            .await
    }

    pub async fn remove_user_from_event(&self, event_id: i64, discord_id: u64) -> BotResult<()> {
        let user = self.store.upsert_user(discord_id).await?;
        if self.store.remove_memberships(event_id, user.id).await? == 0 {
            return Err(not_in_event(discord_id));
        }
        Ok(())
    }

    pub async fn mark_lead(
        &self,
        event_id: i64,
        discord_id: u64,
        lead: bool,
    ) -> BotResult<MemberUpdate> {
        self.update_member(event_id, discord_id, |status, _| {
            if lead && status == MemberStatus::Left {
                return Err(member_left(discord_id));
            }
            Ok((status, lead))
        })
        .await
    }

    pub async fn mark_late(&self, event_id: i64, discord_id: u64) -> BotResult<MemberUpdate> {
        self.update_member(event_id, discord_id, |status, is_lead| match status {
            MemberStatus::Left => Err(member_left(discord_id)),
            _ => Ok((MemberStatus::Late, is_lead)),
        })
        .await
    }

    /// Someone who left cannot keep leading a squad.
    pub async fn mark_left(&self, event_id: i64, discord_id: u64) -> BotResult<MemberUpdate> {
        self.update_member(event_id, discord_id, |_, _| Ok((MemberStatus::Left, false)))
            .await
    }

    pub async fn unleft(&self, event_id: i64, discord_id: u64) -> BotResult<MemberUpdate> {
        self.update_member(event_id, discord_id, |status, is_lead| match status {
            MemberStatus::Left => Ok((MemberStatus::Active, is_lead)),
            _ => Err(BotError::validation(
                "NOT_LEFT",
                format!("<@{}> is not marked as left.", discord_id),
            )),
        })
        .await
    }

    /// Returns false if they were already staff.
    pub async fn add_staff(&self, event_id: i64, discord_id: u64) -> BotResult<bool> {
        self.get_event(event_id).await?;
        let user = self.store.upsert_user(discord_id).await?;
        self.store.add_staff(event_id, user.id).await
    }

    pub async fn remove_staff(&self, event_id: i64, discord_id: u64) -> BotResult<bool> {
        let user = self.store.upsert_user(discord_id).await?;
        self.store.remove_staff(event_id, user.id).await
    }

    pub async fn set_cohost(&self, event_id: i64, cohost: Option<u64>) -> BotResult<()> {
        self.get_event(event_id).await?;
        let cohost_id = match cohost {
            Some(discord_id) => Some(self.store.upsert_user(discord_id).await?.id),
            None => None,
        };
        self.store.set_cohost(event_id, cohost_id).await
    }

    /// Clear the co-host, but only if it is this user.
    pub async fn remove_cohost(&self, event_id: i64, discord_id: u64) -> BotResult<()> {
        let event = self.get_event(event_id).await?;
        let user = self.store.upsert_user(discord_id).await?;
        if event.cohost_id != Some(user.id) {
            return Err(BotError::validation(
                "NOT_COHOST",
                format!("<@{}> is not the co-host of event #{}.", discord_id, event_id),
            ));
        }
        self.store.set_cohost(event_id, None).await
    }

    pub async fn get_event_summary(&self, event_id: i64) -> BotResult<EventSummary> {
        self.store
            .load_summary(event_id)
            .await?
            .ok_or_else(|| event_not_found(event_id))
    }

    async fn require_membership(
        &self,
        event_id: i64,
        discord_id: u64,
        user_id: i64,
    ) -> BotResult<Membership> {
        self.store
            .find_membership(event_id, user_id)
            .await?
            .ok_or_else(|| not_in_event(discord_id))
    }

    /// Load the member, let `rule` compute the new (status, lead) pair, persist it.
    async fn update_member<F>(
        &self,
        event_id: i64,
        discord_id: u64,
        rule: F,
    ) -> BotResult<MemberUpdate>
    where
        F: FnOnce(MemberStatus, bool) -> BotResult<(MemberStatus, bool)> + Send,
    {
        let user = self.store.upsert_user(discord_id).await?;
        let membership = self.require_membership(event_id, discord_id, user.id).await?;
        let member = membership.member;

        let (status, is_lead) = rule(member.status, member.is_lead)?;
        if status != member.status || is_lead != member.is_lead {
            self.store
                .update_member_state(member.id, status, is_lead)
                .await?;
        }

        Ok(MemberUpdate {
            squad_name: membership.squad_name,
            status,
            is_lead,
        })
    }
}

fn validate_squad_name(name: &str) -> BotResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BotError::validation(
            "INVALID_SQUAD",
            "Squad name cannot be empty.",
        ));
    }
    Ok(name)
}

fn event_not_found(event_id: i64) -> BotError {
    BotError::not_found(
        "EVENT_NOT_FOUND",
        format!("Attendance event #{} does not exist.", event_id),
    )
    .with_context("event_id", event_id)
}

fn not_in_event(discord_id: u64) -> BotError {
    BotError::validation(
        "NOT_IN_EVENT",
        format!("<@{}> is not in any squad for this event.", discord_id),
    )
}

fn member_left(discord_id: u64) -> BotError {
    BotError::validation(
        "MEMBER_LEFT",
        format!("<@{}> is marked as left. Use `unleft` first.", discord_id),
    )
}

// ============================================================================
// TESTS
// ============================================================================
