// Guild member listing shared by the whitelist and group sync paths.

use poise::serenity_prelude as serenity;

use crate::core::vrchat::MemberRoles;

const PAGE_SIZE: u64 = 1000;

/// Every member of a guild, paging through the REST API.
pub async fn fetch_all_members(
    http: &serenity::Http,
    guild_id: serenity::GuildId,
) -> Result<Vec<serenity::Member>, serenity::Error> {
    let mut members = Vec::new();
    let mut after: Option<serenity::UserId> = None;
    loop {
        let page = guild_id.members(http, Some(PAGE_SIZE), after).await?;
        let done = (page.len() as u64) < PAGE_SIZE;
        after = page.last().map(|m| m.user.id);
        members.extend(page);
        if done || after.is_none() {
            break;
        }
    }
    Ok(members)
}

pub fn member_roles(member: &serenity::Member) -> MemberRoles {
    MemberRoles {
        discord_id: member.user.id.get(),
        role_ids: member.roles.iter().map(|r| r.get()).collect(),
    }
}

/// Non-bot members holding any of `role_ids`.
pub fn holders_of(members: &[serenity::Member], role_ids: &[u64]) -> Vec<u64> {
    members
        .iter()
        .filter(|m| !m.user.bot)
        .filter(|m| m.roles.iter().any(|r| role_ids.contains(&r.get())))
        .map(|m| m.user.id.get())
        .collect()
}
