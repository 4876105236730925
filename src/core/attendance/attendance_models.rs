// Attendance domain models - events, squads and the people in them.
//
// Pure data, no Discord types. Squad names are Discord channel ids rendered as
// strings because that is what hosts pick squads by.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::errors::{BotError, BotResult};

/// A Discord user as known to the attendance tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub discord_id: u64,
}

/// An event row. `host_id` and `cohost_id` point at `users.id`, not Discord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceEvent {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub host_id: Option<i64>,
    pub cohost_id: Option<i64>,
}

/// Where a member is in the event. Lead and split are tracked separately
/// because they can apply in any of these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    Active,
    Late,
    Left,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "active",
            MemberStatus::Late => "late",
            MemberStatus::Left => "left",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberStatus {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MemberStatus::Active),
            "late" => Ok(MemberStatus::Late),
            "left" => Ok(MemberStatus::Left),
            other => Err(BotError::database(format!("unknown member status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquadMember {
    pub id: i64,
    pub squad_id: i64,
    pub user_id: i64,
    pub status: MemberStatus,
    pub is_lead: bool,
    /// Squad the member was split away from, if any.
    pub split_from: Option<String>,
}

impl SquadMember {
    pub fn is_split(&self) -> bool {
        self.split_from.is_some()
    }
}

/// A member row together with the squad it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub squad_name: String,
    pub member: SquadMember,
}

// ============================================================================
// SUMMARY (read model)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    #[serde(with = "discord_id_string")]
    pub discord_id: u64,
    pub status: MemberStatus,
    pub is_lead: bool,
    pub split_from: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SquadSummary {
    pub name: String,
    pub members: Vec<MemberSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    #[serde(serialize_with = "serialize_event_header")]
    pub event: AttendanceEvent,
    #[serde(with = "opt_discord_id_string")]
    pub host: Option<u64>,
    #[serde(with = "opt_discord_id_string")]
    pub cohost: Option<u64>,
    #[serde(serialize_with = "serialize_id_list")]
    pub staff: Vec<u64>,
    pub squads: Vec<SquadSummary>,
}

impl EventSummary {
    pub fn attendee_count(&self) -> usize {
        self.squads
            .iter()
            .flat_map(|s| s.members.iter())
            .filter(|m| m.status != MemberStatus::Left)
            .count()
    }
}

// Discord ids overflow JavaScript numbers, so the HTTP API speaks strings.
mod discord_id_string {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(id: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&id.to_string())
    }
}

mod opt_discord_id_string {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(id: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => s.serialize_str(&id.to_string()),
            None => s.serialize_none(),
        }
    }
}

// Only the public half of the row. Host and co-host go out as Discord ids.
fn serialize_event_header<S: serde::Serializer>(
    event: &AttendanceEvent,
    s: S,
) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Header<'a> {
        id: i64,
        date: &'a DateTime<Utc>,
    }
    Header {
        id: event.id,
        date: &event.date,
    }
    .serialize(s)
}

fn serialize_id_list<S: serde::Serializer>(ids: &[u64], s: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;
    let mut seq = s.serialize_seq(Some(ids.len()))?;
    for id in ids {
        seq.serialize_element(&id.to_string())?;
    }
    seq.end()
}

// ============================================================================
// DATE PARSING
// ============================================================================

/// Parse the date a host typed into `/attendance create`.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM` or a bare `YYYY-MM-DD` (midnight). The
/// naive forms are read in `timezone` (an IANA name) and default to UTC.
pub fn parse_event_date(input: &str, timezone: Option<&str>) -> BotResult<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    let tz: Tz = match timezone {
        Some(name) => name.trim().parse().map_err(|_| {
            BotError::validation("INVALID_TIMEZONE", format!("Unknown timezone `{}`", name))
        })?,
        None => chrono_tz::UTC,
    };

    let naive = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| {
            BotError::validation(
                "INVALID_DATE",
                format!(
                    "Could not read `{}` as a date. Use `YYYY-MM-DD` or `YYYY-MM-DD HH:MM`.",
                    input
                ),
            )
        })?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            BotError::validation("INVALID_DATE", "That time does not exist in this timezone")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_event_date_formats() {
        let d = parse_event_date("2026-10-15", None).unwrap();
        assert_eq!(d.to_rfc3339(), "2026-10-15T00:00:00+00:00");

        let d = parse_event_date("2026-10-15 20:30", Some("America/New_York")).unwrap();
        assert_eq!(d.hour(), 0);
        assert_eq!(d.minute(), 30);

        let d = parse_event_date("2026-10-15T20:30:00+02:00", None).unwrap();
        assert_eq!(d.hour(), 18);
    }

    #[test]
    fn test_parse_event_date_rejects_garbage() {
        let err = parse_event_date("next friday", None).unwrap_err();
        assert_eq!(err.code, "INVALID_DATE");

        let err = parse_event_date("2026-10-15", Some("Mars/Olympus")).unwrap_err();
        assert_eq!(err.code, "INVALID_TIMEZONE");
    }

    #[test]
    fn test_member_status_roundtrip_through_text() {
        for status in [MemberStatus::Active, MemberStatus::Late, MemberStatus::Left] {
            assert_eq!(status.as_str().parse::<MemberStatus>().unwrap(), status);
        }
        assert!("gone".parse::<MemberStatus>().is_err());
    }
}
