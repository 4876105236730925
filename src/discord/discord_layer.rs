// Discord layer - slash commands, gateway events and the loops that post to Discord.
//
// Commands stay thin: pull primitives out of the interaction, call a core
// service, format the reply.

#[path = "commands/command_catalog.rs"]
pub mod commands;

pub mod events;
pub mod members;
pub mod pishock_panel;
pub mod tasks;

use poise::serenity_prelude as serenity;
use std::sync::Arc;

use crate::core::attendance::AttendanceService;
use crate::core::errors::{BotError, BotResult};
use crate::core::loa::LoaService;
use crate::core::pishock::PiShockService;
use crate::core::settings::SettingsService;
use crate::core::vrchat::{FriendLocationService, GroupSyncService, VerificationService};
use crate::core::whitelist::WhitelistService;
use crate::infra::attendance::SqliteAttendanceStore;
use crate::infra::loa::SqliteLoaStore;
use crate::infra::pishock::SqlitePanelStore;
use crate::infra::settings::SqliteSettingsStore;
use crate::infra::vrchat::{SqliteVrchatStore, VrchatClient};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

pub type Verification = VerificationService<VrchatClient, SqliteVrchatStore>;
pub type GroupSync = GroupSyncService<VrchatClient, SqliteVrchatStore, SqliteSettingsStore>;
pub type FriendLocations = FriendLocationService<SqliteVrchatStore, SqliteVrchatStore>;

/// Services shared by every command and event handler.
pub struct Data {
    pub attendance: Arc<AttendanceService<SqliteAttendanceStore>>,
    pub loa: Arc<LoaService<SqliteLoaStore>>,
    pub settings: Arc<SettingsService<SqliteSettingsStore>>,
    /// None when no VRChat bot account is configured.
    pub verification: Option<Arc<Verification>>,
    pub group_sync: Option<Arc<GroupSync>>,
    pub locations: Arc<FriendLocations>,
    pub whitelist: Arc<WhitelistService<SqliteVrchatStore>>,
    pub pishock: Arc<PiShockService<SqlitePanelStore>>,
}

impl Data {
    pub fn verification(&self) -> BotResult<&Verification> {
        self.verification.as_deref().ok_or_else(vrchat_disabled)
    }

    pub fn group_sync(&self) -> BotResult<&GroupSync> {
        self.group_sync.as_deref().ok_or_else(vrchat_disabled)
    }
}

fn vrchat_disabled() -> BotError {
    BotError::config(
        "VRCHAT_NOT_CONFIGURED",
        "The VRChat integration is not configured on this bot.",
    )
}

pub fn guild_id(ctx: Context<'_>) -> Result<u64, Error> {
    Ok(ctx.guild_id().ok_or("This command only works in servers")?.get())
}

/// Reply with something the user can act on and log the rest.
pub async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            let command = ctx.command().qualified_name.clone();
            let reply = match error.downcast_ref::<BotError>() {
                Some(bot_error) => {
                    if bot_error.is_not_found()
                        || matches!(
                            bot_error.kind,
                            crate::core::errors::ErrorKind::Validation
                                | crate::core::errors::ErrorKind::Permission
                        )
                    {
                        tracing::debug!(command, code = bot_error.code, "Command refused");
                    } else {
                        tracing::error!(
                            command,
                            error = %bot_error,
                            context = ?bot_error.context,
                            "Command failed"
                        );
                    }
                    format!("❌ {}", bot_error.user_message())
                }
                None => {
                    tracing::error!(command, error = %error, "Command failed");
                    "❌ Something went wrong while handling that.".to_string()
                }
            };

            let send = ctx
                .send(poise::CreateReply::default().content(reply).ephemeral(true))
                .await;
            if let Err(e) = send {
                tracing::warn!(error = %e, "Failed to send error reply");
            }
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                tracing::error!(error = %e, "Error while handling framework error");
            }
        }
    }
}

/// Plain embed used for most replies.
pub fn embed(title: impl Into<String>) -> serenity::CreateEmbed {
    serenity::CreateEmbed::new()
        .title(title)
        .color(0x1F3A93)
        .timestamp(serenity::Timestamp::now())
}
