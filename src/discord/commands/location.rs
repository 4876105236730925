// Discord commands for opt-in friend location sharing.

use poise::serenity_prelude as serenity;

use crate::core::vrchat::{FriendLocation, LocationKind};
use crate::discord::{Context, Error};

#[poise::command(slash_command, guild_only, subcommands("consent", "where_is"))]
pub async fn location(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Allow or stop sharing your VRChat location with this server.
#[poise::command(slash_command, guild_only, ephemeral)]
pub async fn consent(
    ctx: Context<'_>,
    #[description = "Share your location"] allow: bool,
) -> Result<(), Error> {
    ctx.data()
        .locations
        .set_consent(ctx.author().id.get(), allow)
        .await?;
    let text = if allow {
        "📍 Your VRChat location is now shared. Accept the bot's friend request if you have not yet."
    } else {
        "🙈 Location sharing stopped and your last location was forgotten."
    };
    ctx.say(text).await?;
    Ok(())
}

/// Where a member was last seen in VRChat.
#[poise::command(slash_command, guild_only, rename = "where")]
pub async fn where_is(
    ctx: Context<'_>,
    #[description = "Member"] user: serenity::User,
) -> Result<(), Error> {
    let location = ctx.data().locations.location_of(user.id.get()).await?;
    ctx.say(format!("<@{}> {}", user.id, describe(&location)))
        .await?;
    Ok(())
}

fn describe(location: &FriendLocation) -> String {
    let seen = location.updated_at.timestamp();
    match location.kind() {
        LocationKind::Offline => format!("was last seen going offline <t:{}:R>.", seen),
        LocationKind::Hidden => format!("is in a private world (updated <t:{}:R>).", seen),
        LocationKind::Traveling => format!("is travelling between worlds (updated <t:{}:R>).", seen),
        LocationKind::Instance {
            world_id,
            instance_id,
            access,
        } => format!(
            "is in [{}](https://vrchat.com/home/world/{}) · instance `{}` · {} (updated <t:{}:R>).",
            world_id,
            world_id,
            instance_id,
            access.label(),
            seen
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(location: &str) -> FriendLocation {
        FriendLocation::from_raw(
            "usr_x",
            location,
            Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        )
    }

    #[test]
    fn test_describe_instance_links_world() {
        let text = describe(&at("wrld_abc:123~friends(usr_y)~region(eu)"));
        assert!(text.contains("https://vrchat.com/home/world/wrld_abc"));
        assert!(text.contains("`123`"));
        assert!(text.contains("Friends"));
    }

    #[test]
    fn test_describe_offline_and_private() {
        assert!(describe(&at("offline")).contains("offline"));
        assert!(describe(&at("private")).contains("private world"));
    }
}
