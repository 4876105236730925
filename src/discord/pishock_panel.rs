// The PiShock panel message and its buttons.

use chrono::Utc;
use poise::serenity_prelude as serenity;

use crate::core::errors::BotError;
use crate::core::pishock::{PanelState, PiShockOp};
use crate::discord::Data;

const CUSTOM_ID_PREFIX: &str = "pishock:";

pub fn custom_id(op: PiShockOp) -> String {
    format!("{}{}", CUSTOM_ID_PREFIX, op)
}

/// The operation behind a panel button, or None for other components.
pub fn parse_custom_id(id: &str) -> Option<PiShockOp> {
    id.strip_prefix(CUSTOM_ID_PREFIX).and_then(PiShockOp::from_name)
}

fn button_label(op: PiShockOp) -> (&'static str, serenity::ButtonStyle) {
    match op {
        PiShockOp::Shock => ("⚡ Shock", serenity::ButtonStyle::Danger),
        PiShockOp::Vibrate => ("📳 Vibrate", serenity::ButtonStyle::Primary),
        PiShockOp::Beep => ("🔔 Beep", serenity::ButtonStyle::Secondary),
    }
}

pub fn panel_embed(panel: &PanelState) -> serenity::CreateEmbed {
    let state = if panel.enabled { "🟢 Enabled" } else { "🔴 Disabled" };
    let last = match (panel.last_operated_by, panel.last_operated_at) {
        (Some(user), Some(at)) => format!("<@{}> <t:{}:R>", user, at.timestamp()),
        _ => "Nobody yet".to_string(),
    };
    crate::discord::embed("PiShock panel")
        .field("Status", state, true)
        .field("Intensity", format!("{}%", panel.intensity), true)
        .field("Duration", format!("{}s", panel.duration), true)
        .field("Cooldown", format!("{}s", panel.cooldown_secs), true)
        .field("Last used by", last, true)
}

pub fn panel_buttons(panel: &PanelState) -> Vec<serenity::CreateActionRow> {
    let buttons = PiShockOp::all()
        .into_iter()
        .map(|op| {
            let (label, style) = button_label(op);
            serenity::CreateButton::new(custom_id(op))
                .label(label)
                .style(style)
                .disabled(!panel.enabled)
        })
        .collect();
    vec![serenity::CreateActionRow::Buttons(buttons)]
}

/// Redraw the posted panel after a settings change.
pub async fn refresh_panel(http: &serenity::Http, panel: &PanelState) {
    let Some(message_id) = panel.message_id else {
        return;
    };
    let edit = serenity::EditMessage::new()
        .embed(panel_embed(panel))
        .components(panel_buttons(panel));
    if let Err(e) = serenity::ChannelId::new(panel.channel_id)
        .edit_message(http, serenity::MessageId::new(message_id), edit)
        .await
    {
        tracing::warn!(guild_id = panel.guild_id, error = %e, "Failed to refresh PiShock panel");
    }
}

/// Handle a press on one of the panel buttons.
pub async fn handle_button(
    ctx: &serenity::Context,
    interaction: &serenity::ComponentInteraction,
    op: PiShockOp,
    data: &Data,
) -> Result<(), serenity::Error> {
    let Some(guild_id) = interaction.guild_id else {
        return Ok(());
    };
    interaction.defer_ephemeral(ctx).await?;

    let result = data
        .pishock
        .operate(
            guild_id.get(),
            interaction.user.id.get(),
            interaction.user.display_name(),
            op,
            Utc::now(),
        )
        .await;

    let reply = match result {
        Ok(panel) => {
            refresh_panel(&ctx.http, &panel).await;
            format!("✅ Sent a {} at {}% for {}s.", op, panel.intensity, panel.duration)
        }
        Err(e) => {
            log_refusal(guild_id.get(), &e);
            format!("❌ {}", e.user_message())
        }
    };
    interaction
        .edit_response(ctx, serenity::EditInteractionResponse::new().content(reply))
        .await?;
    Ok(())
}

fn log_refusal(guild_id: u64, error: &BotError) {
    match error.kind {
        crate::core::errors::ErrorKind::Validation
        | crate::core::errors::ErrorKind::Permission
        | crate::core::errors::ErrorKind::NotFound => {
            tracing::debug!(guild_id, code = error.code, "PiShock press refused");
        }
        _ => tracing::warn!(guild_id, error = %error, "PiShock press failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_id_round_trip() {
        for op in PiShockOp::all() {
            assert_eq!(parse_custom_id(&custom_id(op)), Some(op));
        }
        assert_eq!(custom_id(PiShockOp::Beep), "pishock:beep");
        assert_eq!(parse_custom_id("pishock:zap"), None);
        assert_eq!(parse_custom_id("verify:shock"), None);
    }
}
