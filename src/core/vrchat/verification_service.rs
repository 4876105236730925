// VRChat account verification.
//
// A Discord user claims a VRChat account, gets a one-time code, pastes it into
// their VRChat bio (or status) and confirms. The bot then befriends the account
// so location events start flowing.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;

use super::vrchat_api::VrchatApi;
use super::vrchat_models::{parse_vrchat_user_id, VrchatAccount};
use crate::core::errors::{BotError, BotResult};

const CODE_PREFIX: &str = "SHIELD-";
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, discord_id: u64) -> BotResult<Option<VrchatAccount>>;

    /// The verified link for a VRChat account, if any Discord user owns it.
    async fn find_verified_by_vrchat_id(
        &self,
        vrchat_user_id: &str,
    ) -> BotResult<Option<VrchatAccount>>;

    async fn upsert_account(&self, account: &VrchatAccount) -> BotResult<()>;

    /// Returns false if there was nothing to delete.
    async fn delete_account(&self, discord_id: u64) -> BotResult<bool>;

    async fn list_verified(&self) -> BotResult<Vec<VrchatAccount>>;
}

/// What `/verify start` tells the user to do next.
#[derive(Debug, Clone)]
pub struct PendingVerification {
    pub vrchat_user_id: String,
    pub display_name: String,
    pub code: String,
}

pub struct VerificationService<C: VrchatApi, S: AccountStore> {
    api: Arc<C>,
    store: S,
}

impl<C: VrchatApi, S: AccountStore> VerificationService<C, S> {
    pub fn new(api: Arc<C>, store: S) -> Self {
        Self { api, store }
    }

    pub async fn begin(&self, discord_id: u64, vrchat_input: &str) -> BotResult<PendingVerification> {
        let vrchat_user_id = parse_vrchat_user_id(vrchat_input)?;

        if let Some(owner) = self.store.find_verified_by_vrchat_id(&vrchat_user_id).await? {
            if owner.discord_id != discord_id {
                return Err(BotError::validation(
                    "ACCOUNT_LINKED",
                    "That VRChat account is already linked to another Discord user.",
                ));
            }
        }

        let user = self.api.get_user(&vrchat_user_id).await?.ok_or_else(|| {
            BotError::not_found(
                "VRCHAT_USER_NOT_FOUND",
                "VRChat has no user with that id.",
            )
        })?;

        let code = generate_code();
        self.store
            .upsert_account(&VrchatAccount {
                discord_id,
                vrchat_user_id: user.id.clone(),
                display_name: user.display_name.clone(),
                verified: false,
                verification_code: Some(code.clone()),
                verified_at: None,
            })
            .await?;

        tracing::info!(discord_id, vrchat_user_id = %user.id, "Verification started");
        Ok(PendingVerification {
            vrchat_user_id: user.id,
            display_name: user.display_name,
            code,
        })
    }

    /// Check the code is on the VRChat profile and mark the link verified.
    pub async fn confirm(&self, discord_id: u64) -> BotResult<VrchatAccount> {
        let mut account = self.store.get_account(discord_id).await?.ok_or_else(|| {
            BotError::not_found(
                "NO_PENDING_VERIFICATION",
                "Start with `/verify start` first.",
            )
        })?;

        let Some(code) = account.verification_code.clone() else {
            if account.verified {
                return Ok(account);
            }
            return Err(BotError::not_found(
                "NO_PENDING_VERIFICATION",
                "Start with `/verify start` first.",
            ));
        };

        // Someone else may have finished verifying the same account meanwhile
        if let Some(owner) = self
            .store
            .find_verified_by_vrchat_id(&account.vrchat_user_id)
            .await?
        {
            if owner.discord_id != discord_id {
                return Err(BotError::validation(
                    "ACCOUNT_LINKED",
                    "That VRChat account is already linked to another Discord user.",
                ));
            }
        }

        let user = self
            .api
            .get_user(&account.vrchat_user_id)
            .await?
            .ok_or_else(|| {
                BotError::not_found("VRCHAT_USER_NOT_FOUND", "The VRChat account is gone.")
            })?;

        if !user.bio.contains(&code) && !user.status_description.contains(&code) {
            return Err(BotError::validation(
                "CODE_NOT_FOUND",
                format!(
                    "I could not find `{}` in the bio or status of **{}**. Save it there and try again.",
                    code, user.display_name
                ),
            ));
        }

        account.display_name = user.display_name;
        account.verified = true;
        account.verification_code = None;
        account.verified_at = Some(Utc::now());
        self.store.upsert_account(&account).await?;

        if let Err(e) = self.api.send_friend_request(&account.vrchat_user_id).await {
            tracing::warn!(
                discord_id,
                vrchat_user_id = %account.vrchat_user_id,
                error = %e,
                "Verified but failed to send friend request"
            );
        }

        tracing::info!(discord_id, vrchat_user_id = %account.vrchat_user_id, "Account verified");
        Ok(account)
    }

    pub async fn account(&self, discord_id: u64) -> BotResult<Option<VrchatAccount>> {
        self.store.get_account(discord_id).await
    }

    pub async fn unlink(&self, discord_id: u64) -> BotResult<()> {
        if !self.store.delete_account(discord_id).await? {
            return Err(BotError::not_found(
                "NOT_LINKED",
                "You have no linked VRChat account.",
            ));
        }
        Ok(())
    }
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", CODE_PREFIX, suffix)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::super::vrchat_models::{GroupMember, VrchatUser};
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Fake VRChat shared with the group sync tests.
    #[derive(Default)]
    pub(crate) struct FakeVrchat {
        pub users: Mutex<HashMap<String, VrchatUser>>,
        pub members: Mutex<HashMap<String, GroupMember>>,
        pub friend_requests: Mutex<Vec<String>>,
        pub role_calls: Mutex<Vec<String>>,
    }

    impl FakeVrchat {
        pub fn with_user(self, id: &str, name: &str, bio: &str) -> Self {
            self.users.lock().unwrap().insert(
                id.to_string(),
                VrchatUser {
                    id: id.to_string(),
                    display_name: name.to_string(),
                    bio: bio.to_string(),
                    status_description: String::new(),
                },
            );
            self
        }

        pub fn set_bio(&self, id: &str, bio: &str) {
            if let Some(user) = self.users.lock().unwrap().get_mut(id) {
                user.bio = bio.to_string();
            }
        }

        pub fn with_member(self, user_id: &str, roles: &[&str]) -> Self {
            self.members.lock().unwrap().insert(
                user_id.to_string(),
                GroupMember {
                    user_id: user_id.to_string(),
                    role_ids: roles.iter().map(|r| r.to_string()).collect(),
                },
            );
            self
        }
    }

    #[async_trait]
    impl VrchatApi for FakeVrchat {
        async fn get_user(&self, user_id: &str) -> BotResult<Option<VrchatUser>> {
            Ok(self.users.lock().unwrap().get(user_id).cloned())
        }

        async fn send_friend_request(&self, user_id: &str) -> BotResult<()> {
            self.friend_requests
                .lock()
                .unwrap()
                .push(user_id.to_string());
            Ok(())
        }

        async fn get_group_member(
            &self,
            _group_id: &str,
            user_id: &str,
        ) -> BotResult<Option<GroupMember>> {
            Ok(self.members.lock().unwrap().get(user_id).cloned())
        }

        async fn add_group_role(
            &self,
            _group_id: &str,
            user_id: &str,
            role_id: &str,
        ) -> BotResult<()> {
            self.role_calls
                .lock()
                .unwrap()
                .push(format!("+{}:{}", user_id, role_id));
            Ok(())
        }

        async fn remove_group_role(
            &self,
            _group_id: &str,
            user_id: &str,
            role_id: &str,
        ) -> BotResult<()> {
            self.role_calls
                .lock()
                .unwrap()
                .push(format!("-{}:{}", user_id, role_id));
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct InMemoryAccountStore {
        pub accounts: Mutex<HashMap<u64, VrchatAccount>>,
    }

    impl InMemoryAccountStore {
        pub fn with_verified(self, discord_id: u64, vrchat_user_id: &str) -> Self {
            self.accounts.lock().unwrap().insert(
                discord_id,
                VrchatAccount {
                    discord_id,
                    vrchat_user_id: vrchat_user_id.to_string(),
                    display_name: format!("Name of {}", vrchat_user_id),
                    verified: true,
                    verification_code: None,
                    verified_at: Some(Utc::now()),
                },
            );
            self
        }
    }

    #[async_trait]
    impl AccountStore for InMemoryAccountStore {
        async fn get_account(&self, discord_id: u64) -> BotResult<Option<VrchatAccount>> {
            Ok(self.accounts.lock().unwrap().get(&discord_id).cloned())
        }

        async fn find_verified_by_vrchat_id(
            &self,
            vrchat_user_id: &str,
        ) -> BotResult<Option<VrchatAccount>> {
            Ok(self
                .accounts
                .lock()
                .unwrap()
                .values()
                .find(|a| a.verified && a.vrchat_user_id == vrchat_user_id)
                .cloned())
        }

        async fn upsert_account(&self, account: &VrchatAccount) -> BotResult<()> {
            self.accounts
                .lock()
                .unwrap()
                .insert(account.discord_id, account.clone());
            Ok(())
        }

        async fn delete_account(&self, discord_id: u64) -> BotResult<bool> {
            Ok(self.accounts.lock().unwrap().remove(&discord_id).is_some())
        }

        async fn list_verified(&self) -> BotResult<Vec<VrchatAccount>> {
            Ok(self
                .accounts
                .lock()
                .unwrap()
                .values()
                .filter(|a| a.verified)
                .cloned()
                .collect())
        }
    }

    #[test]
    fn test_generate_code_shape() {
        let code = generate_code();
        assert!(code.starts_with(CODE_PREFIX));
        assert_eq!(code.len(), CODE_PREFIX.len() + CODE_LEN);
        assert!(code[CODE_PREFIX.len()..]
            .bytes()
            .all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[tokio::test]
    async fn test_verification_flow() {
        let api = Arc::new(FakeVrchat::default().with_user("usr_a", "Agent A", "hello"));
        let service = VerificationService::new(api.clone(), InMemoryAccountStore::default());

        let pending = service.begin(1, "usr_a").await.unwrap();
        assert_eq!(pending.display_name, "Agent A");

        let err = service.confirm(1).await.unwrap_err();
        assert_eq!(err.code, "CODE_NOT_FOUND");

        api.set_bio("usr_a", &format!("hello {}", pending.code));
        let account = service.confirm(1).await.unwrap();
        assert!(account.verified);
        assert!(account.verification_code.is_none());
        assert_eq!(api.friend_requests.lock().unwrap().as_slice(), ["usr_a"]);

        // Confirming again is harmless
        assert!(service.confirm(1).await.unwrap().verified);
    }

    #[tokio::test]
    async fn test_cannot_claim_someone_elses_account() {
        let api = Arc::new(FakeVrchat::default().with_user("usr_a", "Agent A", ""));
        let store = InMemoryAccountStore::default().with_verified(1, "usr_a");
        let service = VerificationService::new(api, store);

        let err = service.begin(2, "usr_a").await.unwrap_err();
        assert_eq!(err.code, "ACCOUNT_LINKED");
    }

    #[tokio::test]
    async fn test_unknown_user_and_unlink() {
        let api = Arc::new(FakeVrchat::default());
        let service = VerificationService::new(api, InMemoryAccountStore::default());

        assert!(service.begin(1, "usr_missing").await.unwrap_err().is_not_found());
        assert!(service.confirm(1).await.unwrap_err().is_not_found());
        assert!(service.unlink(1).await.unwrap_err().is_not_found());
    }
}
