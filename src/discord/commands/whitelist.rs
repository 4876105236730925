// Discord commands for the published VRChat whitelist.
//
// There is one whitelist file for the whole bot; it is built from every guild
// that has whitelist roles configured.

use poise::serenity_prelude as serenity;

use crate::core::errors::BotResult;
use crate::core::settings::{GuildSettingsStore, SettingsService};
use crate::core::whitelist::PublishOutcome;
use crate::discord::members::{fetch_all_members, holders_of};
use crate::discord::{embed, guild_id, Context, Error};

#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands("roles", "preview", "sync")
)]
pub async fn whitelist(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Add or remove a role whose members are whitelisted.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn roles(
    ctx: Context<'_>,
    #[description = "Role"] role: serenity::Role,
    #[description = "Remove the role instead of adding it"] remove: Option<bool>,
) -> Result<(), Error> {
    let roles = ctx
        .data()
        .settings
        .toggle_whitelist_role(guild_id(ctx)?, role.id.get(), remove.unwrap_or(false))
        .await?;
    let list = if roles.is_empty() {
        "none".to_string()
    } else {
        roles
            .iter()
            .map(|r| format!("<@&{}>", r))
            .collect::<Vec<_>>()
            .join(", ")
    };
    ctx.say(format!("✅ Whitelist roles: {}", list)).await?;
    Ok(())
}

/// Show the whitelist as it would be published.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD", ephemeral)]
pub async fn preview(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let data = ctx.data();
    let ids = collect_whitelisted(ctx.http(), &data.settings).await?;
    let entries = data.whitelist.build(&ids).await?;
    let rendered = data.whitelist.render(&entries)?;

    let reply = poise::CreateReply::default()
        .content(format!("{} whitelisted accounts.", entries.len()))
        .attachment(serenity::CreateAttachment::bytes(
            rendered.into_bytes(),
            "whitelist.txt",
        ));
    ctx.send(reply).await?;
    Ok(())
}

/// Publish the whitelist now.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn sync(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer().await?;
    let data = ctx.data();
    let ids = collect_whitelisted(ctx.http(), &data.settings).await?;
    let report = data.whitelist.sync(&ids).await?;

    let outcome = match &report.outcome {
        PublishOutcome::Unchanged => "Already up to date".to_string(),
        PublishOutcome::Updated { commit_sha } => {
            format!("Committed `{}`", commit_sha.chars().take(7).collect::<String>())
        }
    };
    let reply = embed("Whitelist sync")
        .field("Entries", report.entries.to_string(), true)
        .field("Result", outcome, true)
        .field("Cache purged", if report.purged { "yes" } else { "no" }, true);
    ctx.send(poise::CreateReply::default().embed(reply)).await?;
    Ok(())
}

/// Discord ids holding a whitelist role in any configured guild.
pub async fn collect_whitelisted<S: GuildSettingsStore>(
    http: &serenity::Http,
    settings: &SettingsService<S>,
) -> BotResult<Vec<u64>> {
    let mut ids = Vec::new();
    for guild in settings.all().await? {
        if guild.whitelist_role_ids.is_empty() {
            continue;
        }
        let members = fetch_all_members(http, serenity::GuildId::new(guild.guild_id))
            .await
            .map_err(|e| {
                crate::core::errors::BotError::discord("MEMBER_FETCH_FAILED", e.to_string())
                    .with_context("guild_id", guild.guild_id)
            })?;
        ids.extend(holders_of(&members, &guild.whitelist_role_ids));
    }
    Ok(ids)
}
