// Leave-of-absence workflow.
//
// A member asks for time off with a duration and reason, staff approve or deny,
// and approved requests expire on their own once the end date passes. Platform
// agnostic - the Discord layer grants and removes roles based on what this
// service returns.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::errors::{BotError, BotResult};

const MIN_LOA_HOURS: i64 = 1;
const MAX_LOA_DAYS: i64 = 180;
const MAX_REASON_LEN: usize = 500;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoaStatus {
    Pending,
    Approved,
    Denied,
    Cancelled,
    Expired,
}

impl LoaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoaStatus::Pending => "pending",
            LoaStatus::Approved => "approved",
            LoaStatus::Denied => "denied",
            LoaStatus::Cancelled => "cancelled",
            LoaStatus::Expired => "expired",
        }
    }

    /// Pending and approved requests block a new one.
    pub fn is_open(&self) -> bool {
        matches!(self, LoaStatus::Pending | LoaStatus::Approved)
    }
}

impl fmt::Display for LoaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoaStatus {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LoaStatus::Pending),
            "approved" => Ok(LoaStatus::Approved),
            "denied" => Ok(LoaStatus::Denied),
            "cancelled" => Ok(LoaStatus::Cancelled),
            "expired" => Ok(LoaStatus::Expired),
            other => Err(BotError::database(format!("unknown LOA status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaRequest {
    pub id: i64,
    pub guild_id: u64,
    pub discord_id: u64,
    pub reason: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: LoaStatus,
    pub reviewed_by: Option<u64>,
}

/// Fields for a request that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewLoaRequest {
    pub guild_id: u64,
    pub discord_id: u64,
    pub reason: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

#[async_trait]
pub trait LoaStore: Send + Sync {
    async fn insert(&self, request: NewLoaRequest) -> BotResult<LoaRequest>;

    async fn get(&self, id: i64) -> BotResult<Option<LoaRequest>>;

    /// The user's pending or approved request in a guild, if any.
    async fn find_open(&self, guild_id: u64, discord_id: u64) -> BotResult<Option<LoaRequest>>;

    async fn list_open(&self, guild_id: u64) -> BotResult<Vec<LoaRequest>>;

    /// Approved requests (any guild) whose end is at or before `now`.
    async fn list_due(&self, now: DateTime<Utc>) -> BotResult<Vec<LoaRequest>>;

    async fn set_status(
        &self,
        id: i64,
        status: LoaStatus,
        reviewed_by: Option<u64>,
    ) -> BotResult<()>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct LoaService<S: LoaStore> {
    store: S,
}

impl<S: LoaStore> LoaService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// File a new request. `time` is a human duration such as `2w` or `3 days`.
    pub async fn request(
        &self,
        guild_id: u64,
        discord_id: u64,
        time: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> BotResult<LoaRequest> {
        let duration = parse_loa_duration(time).ok_or_else(|| {
            BotError::validation(
                "INVALID_DURATION",
                "Invalid time format. Use formats like `12h`, `3d`, `2w` or `3 days`.",
            )
        })?;

        if duration < Duration::hours(MIN_LOA_HOURS) {
            return Err(BotError::validation(
                "DURATION_TOO_SHORT",
                "A leave of absence must be at least 1 hour long.",
            ));
        }
        if duration > Duration::days(MAX_LOA_DAYS) {
            return Err(BotError::validation(
                "DURATION_TOO_LONG",
                format!("A leave of absence cannot be longer than {} days.", MAX_LOA_DAYS),
            ));
        }

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BotError::validation("EMPTY_REASON", "Please give a reason."));
        }
        if reason.chars().count() > MAX_REASON_LEN {
            return Err(BotError::validation(
                "REASON_TOO_LONG",
                format!("The reason must be at most {} characters.", MAX_REASON_LEN),
            ));
        }

        if let Some(open) = self.store.find_open(guild_id, discord_id).await? {
            return Err(BotError::validation(
                "LOA_ALREADY_OPEN",
                format!(
                    "You already have a {} leave of absence (#{}). Cancel it first.",
                    open.status, open.id
                ),
            ));
        }

        let request = self
            .store
            .insert(NewLoaRequest {
                guild_id,
                discord_id,
                reason: reason.to_string(),
                starts_at: now,
                ends_at: now + duration,
            })
            .await?;

        tracing::info!(
            loa_id = request.id,
            guild_id,
            discord_id,
            ends_at = %request.ends_at,
            "LOA requested"
        );
        Ok(request)
    }

    pub async fn approve(&self, guild_id: u64, id: i64, reviewer: u64) -> BotResult<LoaRequest> {
        self.review(guild_id, id, reviewer, LoaStatus::Approved).await
    }

    pub async fn deny(&self, guild_id: u64, id: i64, reviewer: u64) -> BotResult<LoaRequest> {
        self.review(guild_id, id, reviewer, LoaStatus::Denied).await
    }

    /// Withdraw the caller's own open request.
    pub async fn cancel(&self, guild_id: u64, discord_id: u64) -> BotResult<LoaRequest> {
        let mut request = self
            .store
            .find_open(guild_id, discord_id)
            .await?
            .ok_or_else(|| {
                BotError::not_found("NO_OPEN_LOA", "You have no open leave of absence.")
            })?;

        self.store
            .set_status(request.id, LoaStatus::Cancelled, None)
            .await?;
        request.status = LoaStatus::Cancelled;
        Ok(request)
    }

    pub async fn list_open(&self, guild_id: u64) -> BotResult<Vec<LoaRequest>> {
        self.store.list_open(guild_id).await
    }

    /// Mark approved requests that have run out as expired and hand them back
    /// so the caller can remove roles and announce it.
    ///
    /// A request whose status update fails stays approved and is left out of
    /// the result, so the next sweep picks it up again.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> BotResult<Vec<LoaRequest>> {
        let due = self.store.list_due(now).await?;
        let mut expired = Vec::with_capacity(due.len());

        for mut request in due {
            if let Err(e) = self
                .store
                .set_status(request.id, LoaStatus::Expired, request.reviewed_by)
                .await
            {
                tracing::warn!(loa_id = request.id, error = %e, "Failed to expire LOA");
                continue;
            }
            request.status = LoaStatus::Expired;
            expired.push(request);
        }

        Ok(expired)
    }

    async fn review(
        &self,
        guild_id: u64,
        id: i64,
        reviewer: u64,
        outcome: LoaStatus,
    ) -> BotResult<LoaRequest> {
        let mut request = self
            .store
            .get(id)
            .await?
            .filter(|r| r.guild_id == guild_id)
            .ok_or_else(|| {
                BotError::not_found("LOA_NOT_FOUND", format!("LOA #{} does not exist.", id))
            })?;

        if request.status != LoaStatus::Pending {
            return Err(BotError::validation(
                "LOA_NOT_PENDING",
                format!("LOA #{} is already {}.", id, request.status),
            ));
        }
        if request.discord_id == reviewer {
            return Err(BotError::permission(
                "SELF_REVIEW",
                "You cannot review your own leave of absence.",
            ));
        }

        self.store.set_status(id, outcome, Some(reviewer)).await?;
        request.status = outcome;
        request.reviewed_by = Some(reviewer);

        tracing::info!(loa_id = id, reviewer, status = %outcome, "LOA reviewed");
        Ok(request)
    }
}

// ============================================================================
// DURATION PARSING
// ============================================================================

/// Parse a duration string like "3 days", "2w", "12h" into a Duration.
pub fn parse_loa_duration(input: &str) -> Option<Duration> {
    let input = input.trim().to_lowercase();
    if input.is_empty() {
        return None;
    }

    // Try to parse formats like "30m", "2h", "1d", "2w"
    if let Some(duration) = parse_compact_format(&input) {
        return Some(duration);
    }

    // Try to parse formats like "2 hours", "3 days", "1 week"
    parse_verbose_format(&input)
}

fn parse_compact_format(input: &str) -> Option<Duration> {
    let unit = input.chars().last()?;
    let num: i64 = input[..input.len() - unit.len_utf8()].trim().parse().ok()?;
    unit_duration(&unit.to_string(), num)
}

fn parse_verbose_format(input: &str) -> Option<Duration> {
    let mut parts = input.split_whitespace();
    let num: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    unit_duration(unit, num)
}

fn unit_duration(unit: &str, num: i64) -> Option<Duration> {
    if num <= 0 {
        return None;
    }
    match unit {
        "m" | "min" | "mins" | "minute" | "minutes" => Duration::try_minutes(num),
        "h" | "hr" | "hrs" | "hour" | "hours" => Duration::try_hours(num),
        "d" | "day" | "days" => Duration::try_days(num),
        "w" | "week" | "weeks" => Duration::try_weeks(num),
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryLoaStore {
        requests: Mutex<Vec<LoaRequest>>,
        broken_ids: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl LoaStore for InMemoryLoaStore {
        async fn insert(&self, request: NewLoaRequest) -> BotResult<LoaRequest> {
            let mut requests = self.requests.lock().unwrap();
            let stored = LoaRequest {
                id: requests.len() as i64 + 1,
                guild_id: request.guild_id,
                discord_id: request.discord_id,
                reason: request.reason,
                starts_at: request.starts_at,
                ends_at: request.ends_at,
                status: LoaStatus::Pending,
                reviewed_by: None,
            };
            requests.push(stored.clone());
            Ok(stored)
        }

        async fn get(&self, id: i64) -> BotResult<Option<LoaRequest>> {
            let requests = self.requests.lock().unwrap();
            Ok(requests.iter().find(|r| r.id == id).cloned())
        }

        async fn find_open(
            &self,
            guild_id: u64,
            discord_id: u64,
        ) -> BotResult<Option<LoaRequest>> {
            let requests = self.requests.lock().unwrap();
            Ok(requests
                .iter()
                .find(|r| r.guild_id == guild_id && r.discord_id == discord_id && r.status.is_open())
                .cloned())
        }

        async fn list_open(&self, guild_id: u64) -> BotResult<Vec<LoaRequest>> {
            let requests = self.requests.lock().unwrap();
            Ok(requests
                .iter()
                .filter(|r| r.guild_id == guild_id && r.status.is_open())
                .cloned()
                .collect())
        }

        async fn list_due(&self, now: DateTime<Utc>) -> BotResult<Vec<LoaRequest>> {
            let requests = self.requests.lock().unwrap();
            Ok(requests
                .iter()
                .filter(|r| r.status == LoaStatus::Approved && r.ends_at <= now)
                .cloned()
                .collect())
        }

        async fn set_status(
            &self,
            id: i64,
            status: LoaStatus,
            reviewed_by: Option<u64>,
        ) -> BotResult<()> {
            if self.broken_ids.lock().unwrap().contains(&id) {
                return Err(BotError::database("disk I/O error"));
            }
            let mut requests = self.requests.lock().unwrap();
            if let Some(r) = requests.iter_mut().find(|r| r.id == id) {
                r.status = status;
                r.reviewed_by = reviewed_by;
            }
            Ok(())
        }
    }

    #[test]
    fn test_parse_loa_duration() {
        assert_eq!(parse_loa_duration("2w"), Some(Duration::weeks(2)));
        assert_eq!(parse_loa_duration("12h"), Some(Duration::hours(12)));
        assert_eq!(parse_loa_duration("3 days"), Some(Duration::days(3)));
        assert_eq!(parse_loa_duration(" 1 Week "), Some(Duration::weeks(1)));
        assert_eq!(parse_loa_duration("0d"), None);
        assert_eq!(parse_loa_duration("soon"), None);
        assert_eq!(parse_loa_duration("3 fortnights"), None);
        assert_eq!(parse_loa_duration("99999999999999w"), None);
        assert_eq!(parse_loa_duration("9223372036854775807 minutes"), None);
    }

    #[tokio::test]
    async fn test_oversized_duration_is_rejected() {
        let service = LoaService::new(InMemoryLoaStore::default());
        let err = service
            .request(1, 2, "99999999999999w", "forever", Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code, "INVALID_DURATION");
    }

    #[tokio::test]
    async fn test_expire_due_keeps_going_after_failed_update() {
        let service = LoaService::new(InMemoryLoaStore::default());
        let now = Utc::now();
        let first = service.request(1, 2, "1d", "trip", now).await.unwrap();
        let second = service.request(1, 3, "1d", "exams", now).await.unwrap();
        let third = service.request(1, 4, "1d", "move", now).await.unwrap();
        for id in [first.id, second.id, third.id] {
            service.approve(1, id, 9).await.unwrap();
        }
        service.store.broken_ids.lock().unwrap().push(second.id);

        let later = now + Duration::days(2);
        let expired = service.expire_due(later).await.unwrap();
        let ids: Vec<i64> = expired.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first.id, third.id]);

        service.store.broken_ids.lock().unwrap().clear();
        let retried = service.expire_due(later).await.unwrap();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].id, second.id);
    }

    #[tokio::test]
    async fn test_request_validation() {
        let service = LoaService::new(InMemoryLoaStore::default());
        let now = Utc::now();

        let err = service.request(1, 2, "30m", "trip", now).await.unwrap_err();
        assert_eq!(err.code, "DURATION_TOO_SHORT");
        let err = service.request(1, 2, "200d", "trip", now).await.unwrap_err();
        assert_eq!(err.code, "DURATION_TOO_LONG");
        let err = service.request(1, 2, "2d", "   ", now).await.unwrap_err();
        assert_eq!(err.code, "EMPTY_REASON");
        let long = "x".repeat(501);
        let err = service.request(1, 2, "2d", &long, now).await.unwrap_err();
        assert_eq!(err.code, "REASON_TOO_LONG");

        let loa = service.request(1, 2, "2d", "trip", now).await.unwrap();
        assert_eq!(loa.ends_at - loa.starts_at, Duration::days(2));
        assert_eq!(loa.status, LoaStatus::Pending);

        let err = service.request(1, 2, "1w", "again", now).await.unwrap_err();
        assert_eq!(err.code, "LOA_ALREADY_OPEN");
    }

    #[tokio::test]
    async fn test_review_flow_and_expiry() {
        let service = LoaService::new(InMemoryLoaStore::default());
        let now = Utc::now();
        let loa = service.request(1, 2, "1d", "exams", now).await.unwrap();

        let err = service.approve(1, loa.id, 2).await.unwrap_err();
        assert_eq!(err.code, "SELF_REVIEW");
        assert!(service.approve(99, loa.id, 3).await.unwrap_err().is_not_found());

        let approved = service.approve(1, loa.id, 3).await.unwrap();
        assert_eq!(approved.status, LoaStatus::Approved);
        assert_eq!(approved.reviewed_by, Some(3));

        let err = service.deny(1, loa.id, 3).await.unwrap_err();
        assert_eq!(err.code, "LOA_NOT_PENDING");

        assert!(service.expire_due(now).await.unwrap().is_empty());
        let expired = service
            .expire_due(now + Duration::days(2))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, LoaStatus::Expired);
        assert!(service.list_open(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_frees_slot() {
        let service = LoaService::new(InMemoryLoaStore::default());
        let now = Utc::now();

        assert!(service.cancel(1, 2).await.unwrap_err().is_not_found());
        service.request(1, 2, "1d", "busy", now).await.unwrap();
        let cancelled = service.cancel(1, 2).await.unwrap();
        assert_eq!(cancelled.status, LoaStatus::Cancelled);
        assert!(service.request(1, 2, "1d", "busy again", now).await.is_ok());
    }
}
