// Entry point of the S.H.I.E.L.D. bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (no Discord or HTTP types)
// - `infra/` = SQLite stores and the VRChat, GitHub, Cloudflare and PiShock clients
// - `discord/` = Slash commands, gateway events and Discord-facing loops
// - `api/` = Internal HTTP API over the same services
//
// This file loads configuration, wires the services together, starts the
// background tasks and runs the gateway.

#[path = "api/api_layer.rs"]
mod api;
mod config;
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::core::attendance::AttendanceService;
use crate::core::loa::LoaService;
use crate::core::pishock::{PiShockApi, PiShockService};
use crate::core::settings::SettingsService;
use crate::core::vrchat::{FriendLocationService, GroupSyncService, VerificationService};
use crate::core::whitelist::{CachePurger, WhitelistPublisher, WhitelistService};
use crate::discord::{Data, Error};
use crate::infra::attendance::SqliteAttendanceStore;
use crate::infra::cloudflare::CloudflarePurger;
use crate::infra::database;
use crate::infra::github::{GithubAppAuth, GithubWhitelistRepo};
use crate::infra::loa::SqliteLoaStore;
use crate::infra::pishock::{PiShockClient, SqlitePanelStore};
use crate::infra::settings::SqliteSettingsStore;
use crate::infra::vrchat::{pipeline, SqliteVrchatStore, VrchatClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env().context("invalid environment")?;

    // ========================================================================
    // STORAGE
    // ========================================================================

    let pool = database::connect(&config.database_url)
        .await
        .context("failed to open the database")?;

    let attendance_store = SqliteAttendanceStore::new(pool.clone());
    let loa_store = SqliteLoaStore::new(pool.clone());
    let settings_store = SqliteSettingsStore::new(pool.clone());
    let vrchat_store = SqliteVrchatStore::new(pool.clone());
    let panel_store = SqlitePanelStore::new(pool);

    attendance_store.migrate().await.context("attendance migration")?;
    loa_store.migrate().await.context("LOA migration")?;
    settings_store.migrate().await.context("settings migration")?;
    vrchat_store.migrate().await.context("VRChat migration")?;
    panel_store.migrate().await.context("PiShock migration")?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let vrchat_client = match config.vrchat.clone() {
        Some(vrchat) => Some(Arc::new(VrchatClient::new(vrchat)?)),
        None => {
            tracing::info!("VRCHAT_USERNAME not set, verification and group sync disabled");
            None
        }
    };

    let publisher: Option<Arc<dyn WhitelistPublisher>> =
        match (&config.github_app, &config.whitelist) {
            (Some(app), Some(whitelist)) => {
                let auth = Arc::new(GithubAppAuth::new(app)?);
                Some(Arc::new(GithubWhitelistRepo::new(auth, whitelist.clone())))
            }
            _ => None,
        };
    let purger: Option<Arc<dyn CachePurger>> = match (&config.cloudflare, &config.whitelist) {
        (Some(cloudflare), Some(whitelist)) => Some(Arc::new(CloudflarePurger::new(
            cloudflare.clone(),
            whitelist.public_url.clone(),
        )?)),
        _ => None,
    };
    let pishock_api: Option<Arc<dyn PiShockApi>> = match config.pishock.clone() {
        Some(pishock) => Some(Arc::new(PiShockClient::new(pishock)?)),
        None => None,
    };

    let attendance = Arc::new(AttendanceService::new(attendance_store));
    let loa = Arc::new(LoaService::new(loa_store));
    let settings = Arc::new(SettingsService::new(settings_store.clone()));
    let verification = vrchat_client
        .as_ref()
        .map(|client| Arc::new(VerificationService::new(Arc::clone(client), vrchat_store.clone())));
    let group_sync = vrchat_client.as_ref().map(|client| {
        Arc::new(GroupSyncService::new(
            Arc::clone(client),
            vrchat_store.clone(),
            settings_store.clone(),
        ))
    });
    let locations = Arc::new(FriendLocationService::new(
        vrchat_store.clone(),
        vrchat_store.clone(),
    ));
    let whitelist = Arc::new(WhitelistService::new(
        vrchat_store,
        publisher,
        purger,
        config.encryption_key.clone(),
    ));
    let pishock = Arc::new(PiShockService::new(panel_store, pishock_api));

    // ========================================================================
    // BACKGROUND TASKS THAT DO NOT NEED DISCORD
    // ========================================================================

    let api_state = api::AppState {
        attendance: Arc::clone(&attendance),
    };
    let port = config.port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            tracing::error!(error = %e, "HTTP API stopped");
        }
    });

    if let Some(client) = vrchat_client.as_ref() {
        tokio::spawn(pipeline::run_pipeline(Arc::clone(client), Arc::clone(&locations)));
    }

    let data = Data {
        attendance,
        loa,
        settings,
        verification,
        group_sync,
        locations,
        whitelist,
        pishock,
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILDS | serenity::GatewayIntents::GUILD_MEMBERS;
    let dev_guild = config.dev_guild_id;
    let owners = config
        .bot_owner_id
        .map(serenity::UserId::new)
        .into_iter()
        .collect();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: discord::commands::all(),
            event_handler: |ctx, event, framework, data| {
                Box::pin(discord::events::event_handler(ctx, event, framework, data))
            },
            on_error: |error| Box::pin(discord::on_error(error)),
            owners,
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                match dev_guild {
                    // Guild registration is instant, global can take an hour
                    Some(guild) => {
                        poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            serenity::GuildId::new(guild),
                        )
                        .await?;
                        tracing::info!(guild_id = guild, "Commands registered in dev guild");
                    }
                    None => {
                        poise::builtins::register_globally(ctx, &framework.options().commands)
                            .await?;
                        tracing::info!("Commands registered globally");
                    }
                }

                tokio::spawn(discord::tasks::run_loa_sweeper(
                    ctx.http.clone(),
                    Arc::clone(&data.loa),
                    Arc::clone(&data.settings),
                ));
                tokio::spawn(discord::tasks::run_whitelist_sync(
                    ctx.http.clone(),
                    Arc::clone(&data.settings),
                    Arc::clone(&data.whitelist),
                ));

                Ok::<Data, Error>(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&config.bot_token, intents)
        .framework(framework)
        .await
        .context("failed to create the Discord client")?;

    client.start().await.context("Discord client stopped")?;
    Ok(())
}
