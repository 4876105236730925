use async_trait::async_trait;

use super::vrchat_models::{GroupMember, VrchatUser};
use crate::core::errors::BotResult;

/// The VRChat calls the core needs. The REST client in infra implements it;
/// tests use fakes.
#[async_trait]
pub trait VrchatApi: Send + Sync {
    /// `Ok(None)` when VRChat says the user does not exist.
    async fn get_user(&self, user_id: &str) -> BotResult<Option<VrchatUser>>;

    async fn send_friend_request(&self, user_id: &str) -> BotResult<()>;

    /// `Ok(None)` when the user is not in the group.
    async fn get_group_member(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> BotResult<Option<GroupMember>>;

    async fn add_group_role(&self, group_id: &str, user_id: &str, role_id: &str)
        -> BotResult<()>;

    async fn remove_group_role(
        &self,
        group_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> BotResult<()>;
}
