// Gateway events the bot reacts to outside of slash commands.

use poise::serenity_prelude as serenity;

use crate::core::vrchat::{MemberRoles, MemberSyncOutcome};
use crate::discord::pishock_panel;
use crate::discord::{Data, Error};

pub async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Ready { data_about_bot } => {
            tracing::info!(user = %data_about_bot.user.name, guilds = data_about_bot.guilds.len(), "Connected to Discord");
        }
        serenity::FullEvent::InteractionCreate {
            interaction: serenity::Interaction::Component(component),
        } => {
            if let Some(op) = pishock_panel::parse_custom_id(&component.data.custom_id) {
                if let Err(e) = pishock_panel::handle_button(ctx, component, op, data).await {
                    tracing::error!(error = %e, "Error handling PiShock button");
                }
            }
        }
        serenity::FullEvent::GuildMemberUpdate {
            old_if_available,
            new: Some(new),
            ..
        } => {
            if new.user.bot {
                return Ok(());
            }
            // Only role changes matter for group sync
            if let Some(old) = old_if_available {
                if old.roles == new.roles {
                    return Ok(());
                }
            }
            let Some(sync) = data.group_sync.as_ref() else {
                return Ok(());
            };

            let member = MemberRoles {
                discord_id: new.user.id.get(),
                role_ids: new.roles.iter().map(|r| r.get()).collect(),
            };
            match sync.sync_member(new.guild_id.get(), &member).await {
                Ok(MemberSyncOutcome::Synced(plan)) => {
                    tracing::debug!(
                        discord_id = member.discord_id,
                        added = plan.add.len(),
                        removed = plan.remove.len(),
                        "Member roles mirrored to VRChat group"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    discord_id = member.discord_id,
                    error = %e,
                    "Group sync on role change failed"
                ),
            }
        }
        _ => {}
    }

    Ok(())
}
