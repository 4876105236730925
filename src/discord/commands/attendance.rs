// Discord commands for attendance tracking.
//
// Hosts pick an event with `/attendance select`; the member commands then act
// on that event. Squads are voice channels, stored by channel id.

use poise::serenity_prelude as serenity;

use crate::core::attendance::{parse_event_date, EventSummary, MemberStatus, MemberSummary, MemberUpdate};
use crate::discord::{embed, Context, Error};

#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_EVENTS",
    subcommands(
        "create", "delete", "select", "list", "summary", "add", "move_member", "split",
        "remove", "status", "role"
    )
)]
pub async fn attendance(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Create an attendance event.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_EVENTS")]
pub async fn create(
    ctx: Context<'_>,
    #[description = "Date, e.g. 2026-03-14 19:00 (defaults to now)"] date: Option<String>,
    #[description = "IANA timezone for the date, e.g. Europe/Berlin"] timezone: Option<String>,
    #[description = "Host (defaults to you)"] host: Option<serenity::User>,
    #[description = "Co-host"] cohost: Option<serenity::User>,
) -> Result<(), Error> {
    let date = match date.as_deref() {
        Some(raw) => parse_event_date(raw, timezone.as_deref())?,
        None => chrono::Utc::now(),
    };
    let host = host.as_ref().unwrap_or_else(|| ctx.author()).id.get();
    let cohost = cohost.map(|u| u.id.get());

    let data = ctx.data();
    let event = data.attendance.create_event(date, Some(host), cohost).await?;
    // The creator usually keeps working on the event they just made
    data.attendance.select_event(ctx.author().id.get(), event.id).await?;

    let mut reply = embed(format!("Event #{} created", event.id))
        .field("Date", format!("<t:{}:F>", event.date.timestamp()), false)
        .field("Host", format!("<@{}>", host), true);
    if let Some(cohost) = cohost {
        reply = reply.field("Co-host", format!("<@{}>", cohost), true);
    }
    ctx.send(poise::CreateReply::default().embed(reply)).await?;
    Ok(())
}

/// Delete an event and everything recorded for it.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_EVENTS")]
pub async fn delete(
    ctx: Context<'_>,
    #[description = "Event id"] event: i64,
    #[description = "Confirm the deletion"] confirm: bool,
) -> Result<(), Error> {
    if !confirm {
        ctx.send(
            poise::CreateReply::default()
                .content("Nothing deleted. Set `confirm` to true to delete the event.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }
    ctx.data().attendance.delete_event(event).await?;
    ctx.say(format!("🗑️ Event #{} deleted.", event)).await?;
    Ok(())
}

/// Choose the event the other attendance commands act on.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_EVENTS")]
pub async fn select(
    ctx: Context<'_>,
    #[description = "Event id"] event: i64,
) -> Result<(), Error> {
    let event = ctx
        .data()
        .attendance
        .select_event(ctx.author().id.get(), event)
        .await?;
    ctx.send(
        poise::CreateReply::default()
            .content(format!(
                "✅ Now working on event #{} (<t:{}:f>).",
                event.id,
                event.date.timestamp()
            ))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// List the most recent events.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_EVENTS")]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();
    let events = data.attendance.list_recent_events(10).await?;
    let active = data.attendance.active_event(ctx.author().id.get()).await?;

    let description = if events.is_empty() {
        "No events yet. Create one with `/attendance create`.".to_string()
    } else {
        events
            .iter()
            .map(|e| {
                let marker = if Some(e.id) == active { " ← selected" } else { "" };
                format!("**#{}** <t:{}:f>{}", e.id, e.date.timestamp(), marker)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    ctx.send(poise::CreateReply::default().embed(embed("Recent events").description(description)))
        .await?;
    Ok(())
}

/// Show who attended an event, squad by squad.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_EVENTS")]
pub async fn summary(
    ctx: Context<'_>,
    #[description = "Event id (defaults to your selected event)"] event: Option<i64>,
) -> Result<(), Error> {
    let attendance = &ctx.data().attendance;
    let event_id = match event {
        Some(id) => id,
        None => attendance.require_active_event(ctx.author().id.get()).await?,
    };
    let summary = attendance.get_event_summary(event_id).await?;
    ctx.send(poise::CreateReply::default().embed(summary_embed(&summary)))
        .await?;
    Ok(())
}

/// Put a member into a squad.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_EVENTS")]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Member"] user: serenity::User,
    #[description = "Squad channel"] channel: serenity::Channel,
) -> Result<(), Error> {
    let attendance = &ctx.data().attendance;
    let event_id = attendance.require_active_event(ctx.author().id.get()).await?;
    attendance
        .add_user_to_squad(event_id, user.id.get(), &channel.id().get().to_string())
        .await?;
    ctx.say(format!("✅ <@{}> added to <#{}>.", user.id, channel.id()))
        .await?;
    Ok(())
}

/// Move a member to another squad.
#[poise::command(
    slash_command,
    guild_only,
    rename = "move",
    required_permissions = "MANAGE_EVENTS"
)]
pub async fn move_member(
    ctx: Context<'_>,
    #[description = "Member"] user: serenity::User,
    #[description = "New squad channel"] channel: serenity::Channel,
) -> Result<(), Error> {
    let attendance = &ctx.data().attendance;
    let event_id = attendance.require_active_event(ctx.author().id.get()).await?;
    attendance
        .move_user_to_squad(event_id, user.id.get(), &channel.id().get().to_string())
        .await?;
    ctx.say(format!("➡️ <@{}> moved to <#{}>.", user.id, channel.id()))
        .await?;
    Ok(())
}

/// Split a member off into another squad, remembering where they came from.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_EVENTS")]
pub async fn split(
    ctx: Context<'_>,
    #[description = "Member"] user: serenity::User,
    #[description = "Squad channel to split into"] channel: serenity::Channel,
) -> Result<(), Error> {
    let attendance = &ctx.data().attendance;
    let event_id = attendance.require_active_event(ctx.author().id.get()).await?;
    let member = attendance
        .split_user(event_id, user.id.get(), &channel.id().get().to_string())
        .await?;
    let from = member
        .split_from
        .map(|s| format!(" from <#{}>", s))
        .unwrap_or_default();
    ctx.say(format!("↔️ <@{}> split{} to <#{}>.", user.id, from, channel.id()))
        .await?;
    Ok(())
}

/// Remove a member from the selected event.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_EVENTS")]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Member"] user: serenity::User,
) -> Result<(), Error> {
    let attendance = &ctx.data().attendance;
    let event_id = attendance.require_active_event(ctx.author().id.get()).await?;
    attendance
        .remove_user_from_event(event_id, user.id.get())
        .await?;
    ctx.say(format!("✅ <@{}> removed from event #{}.", user.id, event_id))
        .await?;
    Ok(())
}

/// Mark a member as late, left, or back.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_EVENTS")]
pub async fn status(
    ctx: Context<'_>,
    #[description = "Member"] user: serenity::User,
    #[description = "Mark as late"] mark_late: Option<bool>,
    #[description = "Mark as left"] mark_left: Option<bool>,
    #[description = "Undo left"] unleft: Option<bool>,
) -> Result<(), Error> {
    let attendance = &ctx.data().attendance;
    let event_id = attendance.require_active_event(ctx.author().id.get()).await?;
    let discord_id = user.id.get();

    let update = match (
        mark_late.unwrap_or(false),
        mark_left.unwrap_or(false),
        unleft.unwrap_or(false),
    ) {
        (true, false, false) => attendance.mark_late(event_id, discord_id).await?,
        (false, true, false) => attendance.mark_left(event_id, discord_id).await?,
        (false, false, true) => attendance.unleft(event_id, discord_id).await?,
        _ => {
            ctx.send(
                poise::CreateReply::default()
                    .content("Pick exactly one of `mark_late`, `mark_left` or `unleft`.")
                    .ephemeral(true),
            )
            .await?;
            return Ok(());
        }
    };
    ctx.say(describe_update(discord_id, &update)).await?;
    Ok(())
}

/// Change a member's role in the selected event.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_EVENTS")]
pub async fn role(
    ctx: Context<'_>,
    #[description = "Member"] user: serenity::User,
    #[description = "Make squad lead"] set_lead: Option<bool>,
    #[description = "Remove squad lead"] unlead: Option<bool>,
    #[description = "Add (true) or remove (false) as staff"] set_staff: Option<bool>,
    #[description = "Make (true) or stop being (false) co-host"] set_cohost: Option<bool>,
) -> Result<(), Error> {
    let attendance = &ctx.data().attendance;
    let event_id = attendance.require_active_event(ctx.author().id.get()).await?;
    let discord_id = user.id.get();
    let mut lines = Vec::new();

    if set_lead == Some(true) {
        let update = attendance.mark_lead(event_id, discord_id, true).await?;
        lines.push(describe_update(discord_id, &update));
    }
    if unlead == Some(true) {
        let update = attendance.mark_lead(event_id, discord_id, false).await?;
        lines.push(describe_update(discord_id, &update));
    }
    match set_staff {
        Some(true) => {
            attendance.add_staff(event_id, discord_id).await?;
            lines.push(format!("🛡️ <@{}> is staff for event #{}.", discord_id, event_id));
        }
        Some(false) => {
            attendance.remove_staff(event_id, discord_id).await?;
            lines.push(format!("<@{}> is no longer staff.", discord_id));
        }
        None => {}
    }
    match set_cohost {
        Some(true) => {
            attendance.set_cohost(event_id, Some(discord_id)).await?;
            lines.push(format!("🤝 <@{}> is co-host of event #{}.", discord_id, event_id));
        }
        Some(false) => {
            attendance.remove_cohost(event_id, discord_id).await?;
            lines.push(format!("<@{}> is no longer co-host.", discord_id));
        }
        None => {}
    }

    if lines.is_empty() {
        ctx.send(
            poise::CreateReply::default()
                .content("Nothing to change. Pick at least one option.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }
    ctx.say(lines.join("\n")).await?;
    Ok(())
}

fn describe_update(discord_id: u64, update: &MemberUpdate) -> String {
    let lead = if update.is_lead { ", lead" } else { "" };
    format!(
        "✅ <@{}> in <#{}> is now {}{}.",
        discord_id, update.squad_name, update.status, lead
    )
}

fn member_line(member: &MemberSummary) -> String {
    let mut tags = Vec::new();
    if member.is_lead {
        tags.push("lead".to_string());
    }
    match member.status {
        MemberStatus::Late => tags.push("late".to_string()),
        MemberStatus::Left => tags.push("left".to_string()),
        MemberStatus::Active => {}
    }
    if let Some(from) = &member.split_from {
        tags.push(format!("split from <#{}>", from));
    }

    if tags.is_empty() {
        format!("<@{}>", member.discord_id)
    } else {
        format!("<@{}> ({})", member.discord_id, tags.join(", "))
    }
}

fn summary_embed(summary: &EventSummary) -> serenity::CreateEmbed {
    let mention = |id: Option<u64>| id.map(|id| format!("<@{}>", id)).unwrap_or_else(|| "-".into());
    let staff = if summary.staff.is_empty() {
        "-".to_string()
    } else {
        summary
            .staff
            .iter()
            .map(|id| format!("<@{}>", id))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut out = embed(format!("Event #{}", summary.event.id))
        .description(format!(
            "<t:{}:F> · {} attending",
            summary.event.date.timestamp(),
            summary.attendee_count()
        ))
        .field("Host", mention(summary.host), true)
        .field("Co-host", mention(summary.cohost), true)
        .field("Staff", staff, false);

    // Discord caps embeds at 25 fields
    for (i, squad) in summary.squads.iter().take(22).enumerate() {
        let mut value = format!("<#{}>", squad.name);
        for line in squad.members.iter().map(member_line) {
            // Field values stop at 1024 characters
            if value.len() + line.len() + 1 > 1000 {
                value.push_str("\n…");
                break;
            }
            value.push('\n');
            value.push_str(&line);
        }
        out = out.field(format!("Squad {}", i + 1), value, false);
    }
    out
}
