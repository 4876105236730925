// Background loops that need Discord access. Spawned once from the framework setup.

use chrono::Utc;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::core::errors::BotResult;
use crate::core::loa::LoaService;
use crate::core::settings::SettingsService;
use crate::core::whitelist::{PublishOutcome, WhitelistService};
use crate::discord::commands::loa::{remove_loa_role, request_embed};
use crate::discord::commands::whitelist::collect_whitelisted;
use crate::infra::loa::SqliteLoaStore;
use crate::infra::settings::SqliteSettingsStore;
use crate::infra::vrchat::SqliteVrchatStore;

const LOA_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
const WHITELIST_SYNC_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Expire finished leaves, take the LOA role back and tell the LOA channel.
pub async fn run_loa_sweeper(
    http: Arc<serenity::Http>,
    loa: Arc<LoaService<SqliteLoaStore>>,
    settings: Arc<SettingsService<SqliteSettingsStore>>,
) {
    loop {
        match sweep_loa(&http, &loa, &settings).await {
            Ok(0) => tracing::debug!("LOA sweep found nothing to expire"),
            Ok(expired) => tracing::info!(expired, "LOA sweep completed"),
            Err(e) => tracing::warn!(error = %e, "LOA sweep failed"),
        }
        sleep(LOA_SWEEP_INTERVAL).await;
    }
}

async fn sweep_loa(
    http: &serenity::Http,
    loa: &LoaService<SqliteLoaStore>,
    settings: &SettingsService<SqliteSettingsStore>,
) -> BotResult<usize> {
    let expired = loa.expire_due(Utc::now()).await?;
    for request in &expired {
        let guild = match settings.get(request.guild_id).await {
            Ok(guild) => guild,
            Err(e) => {
                tracing::warn!(
                    guild_id = request.guild_id,
                    loa_id = request.id,
                    error = %e,
                    "Expired LOA left unannounced, settings unavailable"
                );
                continue;
            }
        };
        if let Some(role) = guild.loa_role_id {
            remove_loa_role(http, request.guild_id, request.discord_id, role, "LOA ended").await;
        }
        if let Some(channel) = guild.loa_channel_id {
            let message = serenity::CreateMessage::new()
                .content(format!("<@{}> is back from their leave of absence.", request.discord_id))
                .embed(request_embed(request));
            if let Err(e) = serenity::ChannelId::new(channel)
                .send_message(http, message)
                .await
            {
                tracing::warn!(guild_id = request.guild_id, error = %e, "Failed to post LOA expiry");
            }
        }
    }
    Ok(expired.len())
}

/// Republish the whitelist on a timer. Does nothing when publishing is off.
pub async fn run_whitelist_sync(
    http: Arc<serenity::Http>,
    settings: Arc<SettingsService<SqliteSettingsStore>>,
    whitelist: Arc<WhitelistService<SqliteVrchatStore>>,
) {
    if !whitelist.is_publishing_enabled() {
        tracing::info!("Whitelist publishing not configured, background sync disabled");
        return;
    }

    loop {
        tracing::debug!("Starting background whitelist sync");
        let result = async {
            let ids = collect_whitelisted(&http, &settings).await?;
            whitelist.sync(&ids).await
        }
        .await;

        match result {
            Ok(report) => match report.outcome {
                PublishOutcome::Unchanged => {
                    tracing::debug!(entries = report.entries, "Whitelist unchanged")
                }
                PublishOutcome::Updated { commit_sha } => tracing::info!(
                    entries = report.entries,
                    commit = %commit_sha,
                    purged = report.purged,
                    "Whitelist published"
                ),
            },
            Err(e) => tracing::warn!(error = %e, "Whitelist sync failed"),
        }
        sleep(WHITELIST_SYNC_INTERVAL).await;
    }
}
