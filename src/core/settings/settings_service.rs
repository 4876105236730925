// Per-guild settings shared by the LOA, group sync and whitelist features.

use async_trait::async_trait;

use crate::core::errors::{BotError, BotResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildSettings {
    pub guild_id: u64,
    pub vrchat_group_id: Option<String>,
    pub loa_role_id: Option<u64>,
    pub loa_channel_id: Option<u64>,
    pub verified_role_id: Option<u64>,
    pub whitelist_role_ids: Vec<u64>,
}

impl GuildSettings {
    pub fn empty(guild_id: u64) -> Self {
        Self {
            guild_id,
            ..Default::default()
        }
    }
}

/// Maps a Discord role to the VRChat group role it grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRoleMapping {
    pub discord_role_id: u64,
    pub vrchat_role_id: String,
}

#[async_trait]
pub trait GuildSettingsStore: Send + Sync {
    /// Settings for a guild; never-configured guilds yield `GuildSettings::empty`.
    async fn get_settings(&self, guild_id: u64) -> BotResult<GuildSettings>;
    async fn save_settings(&self, settings: &GuildSettings) -> BotResult<()>;
    async fn list_configured_guilds(&self) -> BotResult<Vec<GuildSettings>>;

    async fn get_role_mappings(&self, guild_id: u64) -> BotResult<Vec<GroupRoleMapping>>;
    async fn upsert_role_mapping(&self, guild_id: u64, mapping: &GroupRoleMapping)
        -> BotResult<()>;
    /// Returns false if nothing was mapped for that role.
    async fn delete_role_mapping(&self, guild_id: u64, discord_role_id: u64) -> BotResult<bool>;
}

pub struct SettingsService<S: GuildSettingsStore> {
    store: S,
}

impl<S: GuildSettingsStore> SettingsService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn get(&self, guild_id: u64) -> BotResult<GuildSettings> {
        self.store.get_settings(guild_id).await
    }

    pub async fn all(&self) -> BotResult<Vec<GuildSettings>> {
        self.store.list_configured_guilds().await
    }

    pub async fn set_loa(&self, guild_id: u64, role_id: u64, channel_id: u64) -> BotResult<()> {
        let mut settings = self.store.get_settings(guild_id).await?;
        settings.loa_role_id = Some(role_id);
        settings.loa_channel_id = Some(channel_id);
        self.store.save_settings(&settings).await
    }

    pub async fn set_verified_role(&self, guild_id: u64, role_id: Option<u64>) -> BotResult<()> {
        let mut settings = self.store.get_settings(guild_id).await?;
        settings.verified_role_id = role_id;
        self.store.save_settings(&settings).await
    }

    pub async fn set_group(&self, guild_id: u64, group_id: &str) -> BotResult<()> {
        let group_id = group_id.trim();
        if !group_id.starts_with("grp_") {
            return Err(BotError::validation(
                "INVALID_GROUP_ID",
                "VRChat group ids look like `grp_xxxxxxxx-xxxx-...`.",
            ));
        }
        let mut settings = self.store.get_settings(guild_id).await?;
        settings.vrchat_group_id = Some(group_id.to_string());
        self.store.save_settings(&settings).await
    }

    /// Add or remove a role from the whitelist roles. Returns the new list.
    pub async fn toggle_whitelist_role(
        &self,
        guild_id: u64,
        role_id: u64,
        remove: bool,
    ) -> BotResult<Vec<u64>> {
        let mut settings = self.store.get_settings(guild_id).await?;
        if remove {
            settings.whitelist_role_ids.retain(|r| *r != role_id);
        } else if !settings.whitelist_role_ids.contains(&role_id) {
            settings.whitelist_role_ids.push(role_id);
        }
        self.store.save_settings(&settings).await?;
        Ok(settings.whitelist_role_ids)
    }

    pub async fn role_mappings(&self, guild_id: u64) -> BotResult<Vec<GroupRoleMapping>> {
        self.store.get_role_mappings(guild_id).await
    }

    pub async fn map_role(
        &self,
        guild_id: u64,
        discord_role_id: u64,
        vrchat_role_id: &str,
    ) -> BotResult<()> {
        let vrchat_role_id = vrchat_role_id.trim();
        if !vrchat_role_id.starts_with("grol_") {
            return Err(BotError::validation(
                "INVALID_GROUP_ROLE",
                "VRChat group role ids look like `grol_xxxxxxxx-xxxx-...`.",
            ));
        }
        self.store
            .upsert_role_mapping(
                guild_id,
                &GroupRoleMapping {
                    discord_role_id,
                    vrchat_role_id: vrchat_role_id.to_string(),
                },
            )
            .await
    }

    pub async fn unmap_role(&self, guild_id: u64, discord_role_id: u64) -> BotResult<()> {
        if !self
            .store
            .delete_role_mapping(guild_id, discord_role_id)
            .await?
        {
            return Err(BotError::not_found(
                "MAPPING_NOT_FOUND",
                "That role is not mapped to a VRChat group role.",
            ));
        }
        Ok(())
    }
}
