// Discord role -> VRChat group role synchronisation.

use std::collections::HashSet;
use std::sync::Arc;

use super::verification_service::AccountStore;
use super::vrchat_api::VrchatApi;
use crate::core::errors::{BotError, BotResult};
use crate::core::settings::{GroupRoleMapping, GuildSettingsStore};

/// Role changes for one group member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSyncPlan {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl RoleSyncPlan {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Work out which mapped VRChat roles to add and remove.
///
/// Unmapped VRChat roles are left alone. A VRChat role mapped from several
/// Discord roles is kept while the member holds any of them.
pub fn plan_role_sync(
    discord_roles: &[u64],
    group_roles: &[String],
    mappings: &[GroupRoleMapping],
) -> RoleSyncPlan {
    let held: HashSet<u64> = discord_roles.iter().copied().collect();
    let current: HashSet<&str> = group_roles.iter().map(String::as_str).collect();

    let mut wanted: Vec<&str> = Vec::new();
    let mut mapped: Vec<&str> = Vec::new();
    for mapping in mappings {
        let role = mapping.vrchat_role_id.as_str();
        if !mapped.contains(&role) {
            mapped.push(role);
        }
        if held.contains(&mapping.discord_role_id) && !wanted.contains(&role) {
            wanted.push(role);
        }
    }

    let mut plan = RoleSyncPlan::default();
    for role in &mapped {
        let want = wanted.contains(role);
        let has = current.contains(role);
        if want && !has {
            plan.add.push(role.to_string());
        } else if !want && has {
            plan.remove.push(role.to_string());
        }
    }
    plan
}

/// Outcome of syncing a single Discord member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberSyncOutcome {
    Synced(RoleSyncPlan),
    Unchanged,
    NotVerified,
    NotInGroup,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSyncReport {
    pub dry_run: bool,
    pub synced: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub not_in_group: usize,
    pub failed: usize,
    pub roles_added: usize,
    pub roles_removed: usize,
}

/// Stripped-down guild member handed in by the Discord layer.
#[derive(Debug, Clone)]
pub struct MemberRoles {
    pub discord_id: u64,
    pub role_ids: Vec<u64>,
}

pub struct GroupSyncService<C: VrchatApi, A: AccountStore, G: GuildSettingsStore> {
    api: Arc<C>,
    accounts: A,
    settings: G,
}

impl<C: VrchatApi, A: AccountStore, G: GuildSettingsStore> GroupSyncService<C, A, G> {
    pub fn new(api: Arc<C>, accounts: A, settings: G) -> Self {
        Self {
            api,
            accounts,
            settings,
        }
    }

    async fn group_and_mappings(
        &self,
        guild_id: u64,
    ) -> BotResult<Option<(String, Vec<GroupRoleMapping>)>> {
        let settings = self.settings.get_settings(guild_id).await?;
        let Some(group_id) = settings.vrchat_group_id else {
            return Ok(None);
        };
        let mappings = self.settings.get_role_mappings(guild_id).await?;
        if mappings.is_empty() {
            return Ok(None);
        }
        Ok(Some((group_id, mappings)))
    }

    /// Sync one member. Guilds without a group or mappings are a no-op.
    pub async fn sync_member(
        &self,
        guild_id: u64,
        member: &MemberRoles,
    ) -> BotResult<MemberSyncOutcome> {
        match self.group_and_mappings(guild_id).await? {
            Some((group_id, mappings)) => {
                self.sync_with(&group_id, &mappings, member, false).await
            }
            None => Ok(MemberSyncOutcome::Unchanged),
        }
    }

    async fn sync_with(
        &self,
        group_id: &str,
        mappings: &[GroupRoleMapping],
        member: &MemberRoles,
        dry_run: bool,
    ) -> BotResult<MemberSyncOutcome> {
        let account = match self.accounts.get_account(member.discord_id).await? {
            Some(account) if account.verified => account,
            _ => return Ok(MemberSyncOutcome::NotVerified),
        };

        let Some(group_member) = self
            .api
            .get_group_member(group_id, &account.vrchat_user_id)
            .await?
        else {
            return Ok(MemberSyncOutcome::NotInGroup);
        };

        let plan = plan_role_sync(&member.role_ids, &group_member.role_ids, mappings);
        if plan.is_empty() {
            return Ok(MemberSyncOutcome::Unchanged);
        }

        if !dry_run {
            for role in &plan.add {
                self.api
                    .add_group_role(group_id, &account.vrchat_user_id, role)
                    .await?;
            }
            for role in &plan.remove {
                self.api
                    .remove_group_role(group_id, &account.vrchat_user_id, role)
                    .await?;
            }
            tracing::info!(
                discord_id = member.discord_id,
                vrchat_user_id = %account.vrchat_user_id,
                added = plan.add.len(),
                removed = plan.remove.len(),
                "Synced VRChat group roles"
            );
        }
        Ok(MemberSyncOutcome::Synced(plan))
    }

    /// Sync every member of a guild. One member failing does not stop the run.
    pub async fn bulk_sync(
        &self,
        guild_id: u64,
        members: &[MemberRoles],
        dry_run: bool,
    ) -> BotResult<BulkSyncReport> {
        let Some((group_id, mappings)) = self.group_and_mappings(guild_id).await? else {
            return Err(BotError::validation(
                "GROUP_NOT_CONFIGURED",
                "Set a VRChat group with `/group setgroup` and map at least one role first.",
            ));
        };

        let mut report = BulkSyncReport {
            dry_run,
            ..Default::default()
        };
        for member in members {
            match self.sync_with(&group_id, &mappings, member, dry_run).await {
                Ok(MemberSyncOutcome::Synced(plan)) => {
                    report.synced += 1;
                    report.roles_added += plan.add.len();
                    report.roles_removed += plan.remove.len();
                }
                Ok(MemberSyncOutcome::Unchanged) => report.unchanged += 1,
                Ok(MemberSyncOutcome::NotVerified) => report.skipped += 1,
                Ok(MemberSyncOutcome::NotInGroup) => report.not_in_group += 1,
                Err(e) => {
                    tracing::warn!(discord_id = member.discord_id, error = %e, "Role sync failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            guild_id,
            dry_run,
            synced = report.synced,
            failed = report.failed,
            "Bulk role sync finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::super::verification_service::tests::{FakeVrchat, InMemoryAccountStore};
    use super::*;
    use crate::core::settings::GuildSettings;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn mapping(discord: u64, vrchat: &str) -> GroupRoleMapping {
        GroupRoleMapping {
            discord_role_id: discord,
            vrchat_role_id: vrchat.to_string(),
        }
    }

    #[test]
    fn test_plan_adds_and_removes_only_mapped_roles() {
        let mappings = vec![mapping(1, "grol_a"), mapping(2, "grol_b")];
        let current = vec!["grol_b".to_string(), "grol_unmapped".to_string()];

        let plan = plan_role_sync(&[1], &current, &mappings);
        assert_eq!(plan.add, vec!["grol_a".to_string()]);
        assert_eq!(plan.remove, vec!["grol_b".to_string()]);
    }

    #[test]
    fn test_plan_shared_vrchat_role_is_kept() {
        let mappings = vec![mapping(1, "grol_a"), mapping(2, "grol_a")];
        let plan = plan_role_sync(&[2], &["grol_a".to_string()], &mappings);
        assert!(plan.is_empty());
    }

    #[derive(Default)]
    struct FakeSettings {
        settings: Mutex<HashMap<u64, GuildSettings>>,
        mappings: Mutex<Vec<GroupRoleMapping>>,
    }

    #[async_trait]
    impl GuildSettingsStore for FakeSettings {
        async fn get_settings(&self, guild_id: u64) -> BotResult<GuildSettings> {
            Ok(self
                .settings
                .lock()
                .unwrap()
                .get(&guild_id)
                .cloned()
                .unwrap_or_else(|| GuildSettings::empty(guild_id)))
        }
        async fn save_settings(&self, settings: &GuildSettings) -> BotResult<()> {
            self.settings
                .lock()
                .unwrap()
                .insert(settings.guild_id, settings.clone());
            Ok(())
        }
        async fn list_configured_guilds(&self) -> BotResult<Vec<GuildSettings>> {
            Ok(self.settings.lock().unwrap().values().cloned().collect())
        }
        async fn get_role_mappings(&self, _guild_id: u64) -> BotResult<Vec<GroupRoleMapping>> {
            Ok(self.mappings.lock().unwrap().clone())
        }
        async fn upsert_role_mapping(
            &self,
            _guild_id: u64,
            mapping: &GroupRoleMapping,
        ) -> BotResult<()> {
            self.mappings.lock().unwrap().push(mapping.clone());
            Ok(())
        }
        async fn delete_role_mapping(&self, _guild_id: u64, _role: u64) -> BotResult<bool> {
            Ok(false)
        }
    }

    async fn configured_settings() -> FakeSettings {
        let settings = FakeSettings::default();
        let mut guild = GuildSettings::empty(10);
        guild.vrchat_group_id = Some("grp_x".into());
        settings.save_settings(&guild).await.unwrap();
        settings.upsert_role_mapping(10, &mapping(1, "grol_a")).await.unwrap();
        settings
    }

    fn members() -> Vec<MemberRoles> {
        vec![
            MemberRoles { discord_id: 1, role_ids: vec![1] },
            MemberRoles { discord_id: 2, role_ids: vec![1] },
            MemberRoles { discord_id: 3, role_ids: vec![] },
            MemberRoles { discord_id: 4, role_ids: vec![1] },
        ]
    }

    fn accounts() -> InMemoryAccountStore {
        InMemoryAccountStore::default()
            .with_verified(1, "usr_one")
            .with_verified(3, "usr_three")
            .with_verified(4, "usr_four")
    }

    #[tokio::test]
    async fn test_bulk_sync_report() {
        let api = Arc::new(
            FakeVrchat::default()
                .with_member("usr_one", &[])
                .with_member("usr_three", &["grol_a"]),
        );
        let service = GroupSyncService::new(api.clone(), accounts(), configured_settings().await);

        let report = service.bulk_sync(10, &members(), false).await.unwrap();
        assert_eq!(report.synced, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.not_in_group, 1);
        assert_eq!(report.roles_added, 1);
        assert_eq!(report.roles_removed, 1);

        let calls = api.role_calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["+usr_one:grol_a", "-usr_three:grol_a"]);
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_calls() {
        let api = Arc::new(FakeVrchat::default().with_member("usr_one", &[]));
        let service = GroupSyncService::new(api.clone(), accounts(), configured_settings().await);

        let report = service.bulk_sync(10, &members(), true).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.synced, 1);
        assert!(api.role_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_guild() {
        let service = GroupSyncService::new(
            Arc::new(FakeVrchat::default()),
            accounts(),
            FakeSettings::default(),
        );
        let err = service.bulk_sync(10, &members(), false).await.unwrap_err();
        assert_eq!(err.code, "GROUP_NOT_CONFIGURED");
        assert_eq!(
            service.sync_member(10, &members()[0]).await.unwrap(),
            MemberSyncOutcome::Unchanged
        );
    }
}
