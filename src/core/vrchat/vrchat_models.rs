// VRChat domain models and the small parsers around them.
//
// Nothing here talks to VRChat; these are the shapes the core works with after
// the infra client has done the HTTP part.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::core::errors::{BotError, BotResult};

/// The slice of a VRChat user profile the bot cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VrchatUser {
    pub id: String,
    pub display_name: String,
    pub bio: String,
    pub status_description: String,
}

/// A user's membership in a VRChat group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub user_id: String,
    pub role_ids: Vec<String>,
}

/// Link between a Discord user and a VRChat account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VrchatAccount {
    pub discord_id: u64,
    pub vrchat_user_id: String,
    pub display_name: String,
    pub verified: bool,
    /// Present while the link waits for the user to paste it into their bio.
    pub verification_code: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// Accepts a raw `usr_...` id or a vrchat.com profile URL.
pub fn parse_vrchat_user_id(input: &str) -> BotResult<String> {
    let input = input.trim();
    let candidate = match input.find("/user/") {
        Some(idx) => input[idx + "/user/".len()..]
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default(),
        None => input,
    };

    let valid = candidate.starts_with("usr_")
        && candidate.len() > 4
        && candidate[4..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');

    if valid {
        Ok(candidate.to_string())
    } else {
        Err(BotError::validation(
            "INVALID_VRCHAT_ID",
            "Give your VRChat user id (`usr_...`) or your profile link from vrchat.com.",
        ))
    }
}

// ============================================================================
// LOCATIONS
// ============================================================================

/// Who can join an instance, derived from the location tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceAccess {
    Public,
    FriendsPlus,
    Friends,
    InvitePlus,
    Invite,
    Group,
}

impl InstanceAccess {
    pub fn label(&self) -> &'static str {
        match self {
            InstanceAccess::Public => "Public",
            InstanceAccess::FriendsPlus => "Friends+",
            InstanceAccess::Friends => "Friends",
            InstanceAccess::InvitePlus => "Invite+",
            InstanceAccess::Invite => "Invite",
            InstanceAccess::Group => "Group",
        }
    }
}

/// What a location string resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationKind {
    Offline,
    /// The user hides their location ("private" in the API).
    Hidden,
    Traveling,
    Instance {
        world_id: String,
        instance_id: String,
        access: InstanceAccess,
    },
}

/// Parse a VRChat location such as `wrld_abc:12345~hidden(usr_x)~region(eu)`.
pub fn parse_location(location: &str) -> LocationKind {
    match location {
        "" | "offline" => return LocationKind::Offline,
        "private" => return LocationKind::Hidden,
        "traveling" => return LocationKind::Traveling,
        _ => {}
    }

    let Some((world_id, instance)) = location.split_once(':') else {
        return LocationKind::Hidden;
    };
    if !world_id.starts_with("wrld_") {
        return LocationKind::Hidden;
    }

    let mut tags = instance.split('~');
    let instance_id = tags.next().unwrap_or_default().to_string();
    let mut access = InstanceAccess::Public;
    let mut can_request_invite = false;
    for tag in tags {
        if tag.starts_with("hidden(") {
            access = InstanceAccess::FriendsPlus;
        } else if tag.starts_with("friends(") {
            access = InstanceAccess::Friends;
        } else if tag.starts_with("private(") {
            access = InstanceAccess::Invite;
        } else if tag.starts_with("group(") {
            access = InstanceAccess::Group;
        } else if tag == "canRequestInvite" {
            can_request_invite = true;
        }
    }
    if access == InstanceAccess::Invite && can_request_invite {
        access = InstanceAccess::InvitePlus;
    }

    LocationKind::Instance {
        world_id: world_id.to_string(),
        instance_id,
        access,
    }
}

/// Last known location of a tracked friend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendLocation {
    pub vrchat_user_id: String,
    pub location: String,
    pub world_id: Option<String>,
    pub instance_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl FriendLocation {
    pub fn from_raw(vrchat_user_id: &str, location: &str, updated_at: DateTime<Utc>) -> Self {
        let (world_id, instance_id) = match parse_location(location) {
            LocationKind::Instance {
                world_id,
                instance_id,
                ..
            } => (Some(world_id), Some(instance_id)),
            _ => (None, None),
        };
        Self {
            vrchat_user_id: vrchat_user_id.to_string(),
            location: location.to_string(),
            world_id,
            instance_id,
            updated_at,
        }
    }

    pub fn kind(&self) -> LocationKind {
        parse_location(&self.location)
    }
}

// ============================================================================
// PIPELINE EVENTS
// ============================================================================

/// Friend events from the VRChat pipeline websocket that the bot acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    FriendLocation {
        user_id: String,
        location: String,
        traveling_to: Option<String>,
    },
    FriendOnline {
        user_id: String,
        location: String,
    },
    /// Active on the website, not in game.
    FriendActive { user_id: String },
    FriendOffline { user_id: String },
    FriendDelete { user_id: String },
}

impl PipelineEvent {
    pub fn user_id(&self) -> &str {
        match self {
            PipelineEvent::FriendLocation { user_id, .. }
            | PipelineEvent::FriendOnline { user_id, .. }
            | PipelineEvent::FriendActive { user_id }
            | PipelineEvent::FriendOffline { user_id }
            | PipelineEvent::FriendDelete { user_id } => user_id,
        }
    }
}

#[derive(Deserialize)]
struct RawPipelineMessage {
    #[serde(rename = "type")]
    kind: String,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFriendContent {
    user_id: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    traveling_to_location: Option<String>,
}

/// Decode one websocket text frame. The `content` field is itself a JSON string.
///
/// Returns `Ok(None)` for event types the bot ignores.
pub fn parse_pipeline_message(text: &str) -> Result<Option<PipelineEvent>, serde_json::Error> {
    let raw: RawPipelineMessage = serde_json::from_str(text)?;
    let kind = raw.kind.as_str();
    if !kind.starts_with("friend-") {
        return Ok(None);
    }

    let content: RawFriendContent = serde_json::from_str(&raw.content)?;
    let user_id = content.user_id;
    let event = match kind {
        "friend-location" => PipelineEvent::FriendLocation {
            user_id,
            location: content.location.unwrap_or_default(),
            traveling_to: content.traveling_to_location.filter(|l| !l.is_empty()),
        },
        "friend-online" => PipelineEvent::FriendOnline {
            user_id,
            location: content.location.unwrap_or_default(),
        },
        "friend-active" => PipelineEvent::FriendActive { user_id },
        "friend-offline" => PipelineEvent::FriendOffline { user_id },
        "friend-delete" => PipelineEvent::FriendDelete { user_id },
        _ => return Ok(None),
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vrchat_user_id() {
        let id = "usr_c1644b5b-3ca4-45b4-97c6-a2a0de70d469";
        assert_eq!(parse_vrchat_user_id(id).unwrap(), id);
        assert_eq!(
            parse_vrchat_user_id(&format!("https://vrchat.com/home/user/{}", id)).unwrap(),
            id
        );
        assert_eq!(
            parse_vrchat_user_id(&format!("https://vrchat.com/home/user/{}?tab=info", id))
                .unwrap(),
            id
        );
        assert!(parse_vrchat_user_id("usr_").is_err());
        assert!(parse_vrchat_user_id("SomeDisplayName").is_err());
    }

    #[test]
    fn test_parse_location_variants() {
        assert_eq!(parse_location("offline"), LocationKind::Offline);
        assert_eq!(parse_location("private"), LocationKind::Hidden);
        assert_eq!(parse_location("traveling"), LocationKind::Traveling);

        assert_eq!(
            parse_location("wrld_abc:12345~region(eu)"),
            LocationKind::Instance {
                world_id: "wrld_abc".into(),
                instance_id: "12345".into(),
                access: InstanceAccess::Public,
            }
        );
        assert!(matches!(
            parse_location("wrld_abc:1~private(usr_x)~canRequestInvite~region(us)"),
            LocationKind::Instance {
                access: InstanceAccess::InvitePlus,
                ..
            }
        ));
        assert!(matches!(
            parse_location("wrld_abc:1~group(grp_x)~groupAccessType(members)"),
            LocationKind::Instance {
                access: InstanceAccess::Group,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_pipeline_message() {
        let frame = r#"{"type":"friend-location","content":"{\"userId\":\"usr_a\",\"location\":\"traveling\",\"travelingToLocation\":\"wrld_b:7\"}"}"#;
        assert_eq!(
            parse_pipeline_message(frame).unwrap(),
            Some(PipelineEvent::FriendLocation {
                user_id: "usr_a".into(),
                location: "traveling".into(),
                traveling_to: Some("wrld_b:7".into()),
            })
        );

        let frame = r#"{"type":"friend-offline","content":"{\"userId\":\"usr_a\"}"}"#;
        assert_eq!(
            parse_pipeline_message(frame).unwrap(),
            Some(PipelineEvent::FriendOffline {
                user_id: "usr_a".into()
            })
        );

        let frame = r#"{"type":"notification","content":"{}"}"#;
        assert_eq!(parse_pipeline_message(frame).unwrap(), None);
        assert!(parse_pipeline_message("not json").is_err());
    }
}
