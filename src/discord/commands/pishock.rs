// Discord commands for configuring the PiShock panel.

use poise::serenity_prelude as serenity;

use crate::core::pishock::PanelState;
use crate::discord::pishock_panel::{panel_buttons, panel_embed, refresh_panel};
use crate::discord::{guild_id, Context, Error};

#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands("setup", "intensity", "duration", "toggle", "cooldown")
)]
pub async fn pishock(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Post the panel in a channel.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD", ephemeral)]
pub async fn setup(
    ctx: Context<'_>,
    #[description = "Channel for the panel"] channel: serenity::Channel,
    #[description = "Share code from the PiShock website"] share_code: String,
) -> Result<(), Error> {
    let guild = guild_id(ctx)?;
    let pishock = &ctx.data().pishock;
    let panel = pishock.setup(guild, channel.id().get(), &share_code).await?;

    let message = serenity::CreateMessage::new()
        .embed(panel_embed(&panel))
        .components(panel_buttons(&panel));
    let posted = channel.id().send_message(ctx.http(), message).await?;
    pishock.attach_message(guild, posted.id.get()).await?;

    ctx.say(format!("✅ PiShock panel posted in <#{}>.", channel.id()))
        .await?;
    Ok(())
}

/// Set the intensity (1-100).
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn intensity(
    ctx: Context<'_>,
    #[description = "Intensity in percent"] value: i64,
) -> Result<(), Error> {
    let panel = ctx
        .data()
        .pishock
        .set_intensity(guild_id(ctx)?, value)
        .await?;
    updated(ctx, &panel, format!("Intensity set to {}%.", panel.intensity)).await
}

/// Set the duration (1-15 seconds).
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn duration(
    ctx: Context<'_>,
    #[description = "Duration in seconds"] value: i64,
) -> Result<(), Error> {
    let panel = ctx
        .data()
        .pishock
        .set_duration(guild_id(ctx)?, value)
        .await?;
    updated(ctx, &panel, format!("Duration set to {}s.", panel.duration)).await
}

/// Enable or disable the panel.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn toggle(ctx: Context<'_>) -> Result<(), Error> {
    let panel = ctx.data().pishock.toggle(guild_id(ctx)?).await?;
    let text = if panel.enabled {
        "Panel enabled."
    } else {
        "Panel disabled."
    };
    updated(ctx, &panel, text.to_string()).await
}

/// Set the cooldown between presses (0-3600 seconds).
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn cooldown(
    ctx: Context<'_>,
    #[description = "Cooldown in seconds"] secs: i64,
) -> Result<(), Error> {
    let panel = ctx
        .data()
        .pishock
        .set_cooldown(guild_id(ctx)?, secs)
        .await?;
    updated(ctx, &panel, format!("Cooldown set to {}s.", panel.cooldown_secs)).await
}

async fn updated(ctx: Context<'_>, panel: &PanelState, text: String) -> Result<(), Error> {
    refresh_panel(ctx.http(), panel).await;
    ctx.say(format!("✅ {}", text)).await?;
    Ok(())
}
