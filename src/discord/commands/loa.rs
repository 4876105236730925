// Discord commands for leaves of absence.

use chrono::Utc;
use poise::serenity_prelude as serenity;

use crate::core::loa::{LoaRequest, LoaStatus};
use crate::discord::{embed, guild_id, Context, Error};

#[poise::command(
    slash_command,
    guild_only,
    subcommands("request", "cancel", "list", "approve", "deny", "setup")
)]
pub async fn loa(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Request a leave of absence.
#[poise::command(slash_command, guild_only)]
pub async fn request(
    ctx: Context<'_>,
    #[description = "How long, e.g. 3d, 2w or 12 hours"] time: String,
    #[description = "Why you will be away"] reason: String,
) -> Result<(), Error> {
    let guild = guild_id(ctx)?;
    let data = ctx.data();
    let request = data
        .loa
        .request(guild, ctx.author().id.get(), &time, &reason, Utc::now())
        .await?;

    ctx.send(
        poise::CreateReply::default()
            .content(format!(
                "📨 LOA #{} submitted until <t:{}:f>. Staff will review it shortly.",
                request.id,
                request.ends_at.timestamp()
            ))
            .ephemeral(true),
    )
    .await?;

    let settings = data.settings.get(guild).await?;
    if let Some(channel) = settings.loa_channel_id {
        let message = serenity::CreateMessage::new().embed(request_embed(&request));
        if let Err(e) = serenity::ChannelId::new(channel)
            .send_message(ctx.http(), message)
            .await
        {
            tracing::warn!(guild_id = guild, error = %e, "Failed to post LOA request");
        }
    }
    Ok(())
}

/// Cancel your own leave of absence.
#[poise::command(slash_command, guild_only)]
pub async fn cancel(ctx: Context<'_>) -> Result<(), Error> {
    let guild = guild_id(ctx)?;
    let data = ctx.data();
    let request = data.loa.cancel(guild, ctx.author().id.get()).await?;

    let settings = data.settings.get(guild).await?;
    if let Some(role) = settings.loa_role_id {
        remove_loa_role(ctx.http(), guild, request.discord_id, role, "LOA cancelled").await;
    }
    ctx.send(
        poise::CreateReply::default()
            .content(format!("✅ LOA #{} cancelled. Welcome back!", request.id))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// List pending and active leaves of absence.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let requests = ctx.data().loa.list_open(guild_id(ctx)?).await?;
    let description = if requests.is_empty() {
        "Nobody is on leave.".to_string()
    } else {
        requests
            .iter()
            .map(|r| {
                format!(
                    "**#{}** <@{}> · {} · until <t:{}:d>\n> {}",
                    r.id,
                    r.discord_id,
                    r.status,
                    r.ends_at.timestamp(),
                    r.reason
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    ctx.send(poise::CreateReply::default().embed(embed("Leaves of absence").description(description)))
        .await?;
    Ok(())
}

/// Approve a pending leave of absence.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn approve(
    ctx: Context<'_>,
    #[description = "LOA id"] id: i64,
) -> Result<(), Error> {
    let guild = guild_id(ctx)?;
    let data = ctx.data();
    let request = data.loa.approve(guild, id, ctx.author().id.get()).await?;

    let settings = data.settings.get(guild).await?;
    if let Some(role) = settings.loa_role_id {
        ctx.http()
            .add_member_role(
                serenity::GuildId::new(guild),
                serenity::UserId::new(request.discord_id),
                serenity::RoleId::new(role),
                Some("LOA approved"),
            )
            .await?;
    }

    ctx.say(format!(
        "✅ LOA #{} for <@{}> approved until <t:{}:f>.",
        request.id,
        request.discord_id,
        request.ends_at.timestamp()
    ))
    .await?;
    Ok(())
}

/// Deny a pending leave of absence.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn deny(
    ctx: Context<'_>,
    #[description = "LOA id"] id: i64,
) -> Result<(), Error> {
    let request = ctx
        .data()
        .loa
        .deny(guild_id(ctx)?, id, ctx.author().id.get())
        .await?;
    ctx.say(format!("❌ LOA #{} for <@{}> denied.", request.id, request.discord_id))
        .await?;
    Ok(())
}

/// Set the LOA role and the channel requests are posted to.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn setup(
    ctx: Context<'_>,
    #[description = "Role given while on leave"] role: serenity::Role,
    #[description = "Channel for LOA notices"] channel: serenity::Channel,
) -> Result<(), Error> {
    ctx.data()
        .settings
        .set_loa(guild_id(ctx)?, role.id.get(), channel.id().get())
        .await?;
    ctx.say(format!(
        "✅ LOA role set to <@&{}>, notices go to <#{}>.",
        role.id,
        channel.id()
    ))
    .await?;
    Ok(())
}

pub fn request_embed(request: &LoaRequest) -> serenity::CreateEmbed {
    let title = match request.status {
        LoaStatus::Expired => format!("LOA #{} ended", request.id),
        _ => format!("LOA #{} requested", request.id),
    };
    embed(title)
        .field("Member", format!("<@{}>", request.discord_id), true)
        .field("Status", request.status.to_string(), true)
        .field("Until", format!("<t:{}:f>", request.ends_at.timestamp()), true)
        .field("Reason", request.reason.clone(), false)
}

/// Best effort: the member may have left or the role may be gone already.
pub async fn remove_loa_role(http: &serenity::Http, guild: u64, user: u64, role: u64, reason: &str) {
    if let Err(e) = http
        .remove_member_role(
            serenity::GuildId::new(guild),
            serenity::UserId::new(user),
            serenity::RoleId::new(role),
            Some(reason),
        )
        .await
    {
        tracing::warn!(guild_id = guild, discord_id = user, error = %e, "Failed to remove LOA role");
    }
}
