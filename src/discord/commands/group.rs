// Discord commands for mirroring Discord roles into the VRChat group.

use poise::serenity_prelude as serenity;

use crate::core::vrchat::BulkSyncReport;
use crate::discord::members::{fetch_all_members, member_roles};
use crate::discord::{embed, guild_id, Context, Error};

#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_ROLES",
    subcommands("bulkrolesync", "setgroup", "maprole", "unmaprole", "mappings", "verifiedrole")
)]
pub async fn group(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Sync VRChat group roles for every verified member.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn bulkrolesync(
    ctx: Context<'_>,
    #[description = "Only report what would change"] dry_run: Option<bool>,
) -> Result<(), Error> {
    let guild = guild_id(ctx)?;
    let sync = ctx.data().group_sync()?;
    let dry_run = dry_run.unwrap_or(false);
    ctx.defer().await?;

    let members = fetch_all_members(ctx.http(), serenity::GuildId::new(guild)).await?;
    let members: Vec<_> = members
        .iter()
        .filter(|m| !m.user.bot)
        .map(member_roles)
        .collect();

    let report = sync.bulk_sync(guild, &members, dry_run).await?;
    ctx.send(poise::CreateReply::default().embed(report_embed(&report)))
        .await?;
    Ok(())
}

/// Set the VRChat group this server mirrors roles into.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn setgroup(
    ctx: Context<'_>,
    #[description = "VRChat group id (grp_...)"] group_id: String,
) -> Result<(), Error> {
    ctx.data()
        .settings
        .set_group(guild_id(ctx)?, &group_id)
        .await?;
    ctx.say(format!("✅ VRChat group set to `{}`.", group_id.trim()))
        .await?;
    Ok(())
}

/// Map a Discord role to a VRChat group role.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn maprole(
    ctx: Context<'_>,
    #[description = "Discord role"] role: serenity::Role,
    #[description = "VRChat group role id (grol_...)"] vrchat_role_id: String,
) -> Result<(), Error> {
    ctx.data()
        .settings
        .map_role(guild_id(ctx)?, role.id.get(), &vrchat_role_id)
        .await?;
    ctx.say(format!(
        "✅ <@&{}> now maps to `{}`.",
        role.id,
        vrchat_role_id.trim()
    ))
    .await?;
    Ok(())
}

/// Remove a role mapping.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn unmaprole(
    ctx: Context<'_>,
    #[description = "Discord role"] role: serenity::Role,
) -> Result<(), Error> {
    ctx.data()
        .settings
        .unmap_role(guild_id(ctx)?, role.id.get())
        .await?;
    ctx.say(format!("✅ <@&{}> is no longer mapped.", role.id))
        .await?;
    Ok(())
}

/// Show the group and its role mappings.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn mappings(ctx: Context<'_>) -> Result<(), Error> {
    let guild = guild_id(ctx)?;
    let settings = ctx.data().settings.get(guild).await?;
    let mappings = ctx.data().settings.role_mappings(guild).await?;

    let lines = if mappings.is_empty() {
        "No roles mapped. Use `/group maprole`.".to_string()
    } else {
        mappings
            .iter()
            .map(|m| format!("<@&{}> → `{}`", m.discord_role_id, m.vrchat_role_id))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let group = settings
        .vrchat_group_id
        .map(|g| format!("`{}`", g))
        .unwrap_or_else(|| "Not set".into());
    let verified = settings
        .verified_role_id
        .map(|r| format!("<@&{}>", r))
        .unwrap_or_else(|| "Not set".into());

    let reply = embed("VRChat group sync")
        .field("Group", group, true)
        .field("Verified role", verified, true)
        .field("Mappings", lines, false);
    ctx.send(poise::CreateReply::default().embed(reply)).await?;
    Ok(())
}

/// Set or clear the role given to verified members.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn verifiedrole(
    ctx: Context<'_>,
    #[description = "Role (leave empty to clear)"] role: Option<serenity::Role>,
) -> Result<(), Error> {
    let role_id = role.as_ref().map(|r| r.id.get());
    ctx.data()
        .settings
        .set_verified_role(guild_id(ctx)?, role_id)
        .await?;
    let text = match role_id {
        Some(id) => format!("✅ Verified members now get <@&{}>.", id),
        None => "✅ Verified role cleared.".to_string(),
    };
    ctx.say(text).await?;
    Ok(())
}

fn report_embed(report: &BulkSyncReport) -> serenity::CreateEmbed {
    let title = if report.dry_run {
        "Group role sync (dry run)"
    } else {
        "Group role sync"
    };
    embed(title)
        .field("Synced", report.synced.to_string(), true)
        .field("Unchanged", report.unchanged.to_string(), true)
        .field("Not verified", report.skipped.to_string(), true)
        .field("Not in group", report.not_in_group.to_string(), true)
        .field("Failed", report.failed.to_string(), true)
        .field(
            "Roles",
            format!("+{} / -{}", report.roles_added, report.roles_removed),
            true,
        )
}
