pub mod settings_service;

pub use settings_service::{GroupRoleMapping, GuildSettings, GuildSettingsStore, SettingsService};
