// Discord commands for linking a VRChat account.

use poise::serenity_prelude as serenity;

use crate::discord::members::member_roles;
use crate::discord::{embed, guild_id, Context, Error};

#[poise::command(
    slash_command,
    guild_only,
    subcommands("start", "confirm", "status", "unlink")
)]
pub async fn verify(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Start linking your VRChat account.
#[poise::command(slash_command, guild_only, ephemeral)]
pub async fn start(
    ctx: Context<'_>,
    #[description = "VRChat user id (usr_...) or profile URL"] vrchat_user: String,
) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let pending = ctx
        .data()
        .verification()?
        .begin(ctx.author().id.get(), &vrchat_user)
        .await?;

    let reply = embed("Verify your VRChat account")
        .description(format!(
            "Add this code to your VRChat **bio** or **status**, then run `/verify confirm`:\n\n`{}`",
            pending.code
        ))
        .field("Account", pending.display_name, true)
        .field("User id", pending.vrchat_user_id, true)
        .footer(serenity::CreateEmbedFooter::new(
            "You can remove the code again once you are verified.",
        ));
    ctx.send(poise::CreateReply::default().embed(reply)).await?;
    Ok(())
}

/// Finish linking once the code is on your profile.
#[poise::command(slash_command, guild_only, ephemeral)]
pub async fn confirm(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let guild = guild_id(ctx)?;
    let data = ctx.data();
    let account = data
        .verification()?
        .confirm(ctx.author().id.get())
        .await?;

    let settings = data.settings.get(guild).await?;
    if let Some(role) = settings.verified_role_id {
        if let Err(e) = ctx
            .http()
            .add_member_role(
                serenity::GuildId::new(guild),
                ctx.author().id,
                serenity::RoleId::new(role),
                Some("VRChat account verified"),
            )
            .await
        {
            tracing::warn!(guild_id = guild, error = %e, "Failed to grant verified role");
        }
    }

    if let (Some(sync), Some(member)) = (data.group_sync.as_ref(), ctx.author_member().await) {
        if let Err(e) = sync.sync_member(guild, &member_roles(&member)).await {
            tracing::warn!(guild_id = guild, error = %e, "Group sync after verification failed");
        }
    }

    ctx.say(format!(
        "✅ Linked to **{}**. A friend request is on its way so location sharing can work.",
        account.display_name
    ))
    .await?;
    Ok(())
}

/// Show your linked VRChat account.
#[poise::command(slash_command, guild_only, ephemeral)]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let account = ctx
        .data()
        .verification()?
        .account(ctx.author().id.get())
        .await?;

    let text = match account {
        Some(a) if a.verified => format!(
            "✅ Linked to **{}** (`{}`) since <t:{}:d>.",
            a.display_name,
            a.vrchat_user_id,
            a.verified_at.map(|t| t.timestamp()).unwrap_or_default()
        ),
        Some(a) => format!(
            "⏳ Waiting for `{}` on **{}**'s profile. Run `/verify confirm` when it is there.",
            a.verification_code.unwrap_or_default(),
            a.display_name
        ),
        None => "No VRChat account linked. Use `/verify start`.".to_string(),
    };
    ctx.say(text).await?;
    Ok(())
}

/// Remove your VRChat link.
#[poise::command(slash_command, guild_only, ephemeral)]
pub async fn unlink(ctx: Context<'_>) -> Result<(), Error> {
    let guild = guild_id(ctx)?;
    let data = ctx.data();
    data.verification()?.unlink(ctx.author().id.get()).await?;

    let settings = data.settings.get(guild).await?;
    if let Some(role) = settings.verified_role_id {
        if let Err(e) = ctx
            .http()
            .remove_member_role(
                serenity::GuildId::new(guild),
                ctx.author().id,
                serenity::RoleId::new(role),
                Some("VRChat account unlinked"),
            )
            .await
        {
            tracing::warn!(guild_id = guild, error = %e, "Failed to remove verified role");
        }
    }
    ctx.say("🔓 Your VRChat account is no longer linked.").await?;
    Ok(())
}
