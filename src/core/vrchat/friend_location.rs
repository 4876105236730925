// Friend location tracking fed by the VRChat pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::verification_service::AccountStore;
use super::vrchat_models::{FriendLocation, PipelineEvent};
use crate::core::errors::{BotError, BotResult};

#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn get_consent(&self, discord_id: u64) -> BotResult<bool>;
    async fn set_consent(&self, discord_id: u64, consented: bool, now: DateTime<Utc>)
        -> BotResult<()>;
    async fn get_location(&self, vrchat_user_id: &str) -> BotResult<Option<FriendLocation>>;
    async fn upsert_location(&self, location: &FriendLocation) -> BotResult<()>;
    async fn delete_location(&self, vrchat_user_id: &str) -> BotResult<()>;
}

/// What `apply` did with a pipeline event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationUpdate {
    Stored(FriendLocation),
    /// Unknown, unverified or non-consenting user.
    Ignored,
}

pub struct FriendLocationService<A: AccountStore, L: LocationStore> {
    accounts: A,
    locations: L,
}

impl<A: AccountStore, L: LocationStore> FriendLocationService<A, L> {
    pub fn new(accounts: A, locations: L) -> Self {
        Self {
            accounts,
            locations,
        }
    }

    pub async fn apply(&self, event: &PipelineEvent, now: DateTime<Utc>) -> BotResult<LocationUpdate> {
        let user_id = event.user_id();
        let account = match self.accounts.find_verified_by_vrchat_id(user_id).await? {
            Some(account) => account,
            None => return Ok(LocationUpdate::Ignored),
        };
        if !self.locations.get_consent(account.discord_id).await? {
            return Ok(LocationUpdate::Ignored);
        }

        let raw = match event {
            PipelineEvent::FriendLocation {
                location,
                traveling_to,
                ..
            } => match (location.as_str(), traveling_to) {
                ("traveling", Some(target)) => target.as_str(),
                _ => location.as_str(),
            },
            PipelineEvent::FriendOnline { location, .. } => location.as_str(),
            PipelineEvent::FriendActive { .. }
            | PipelineEvent::FriendOffline { .. }
            | PipelineEvent::FriendDelete { .. } => "offline",
        };

        let location = FriendLocation::from_raw(user_id, raw, now);
        self.locations.upsert_location(&location).await?;
        tracing::debug!(vrchat_user_id = %user_id, location = %location.location, "Location updated");
        Ok(LocationUpdate::Stored(location))
    }

    pub async fn set_consent(&self, discord_id: u64, consented: bool) -> BotResult<()> {
        let account = self.accounts.get_account(discord_id).await?;
        if consented && !account.as_ref().is_some_and(|a| a.verified) {
            return Err(BotError::validation(
                "NOT_VERIFIED",
                "Verify your VRChat account with `/verify start` before sharing your location.",
            ));
        }

        self.locations
            .set_consent(discord_id, consented, Utc::now())
            .await?;
        if !consented {
            if let Some(account) = account {
                self.locations.delete_location(&account.vrchat_user_id).await?;
            }
        }
        Ok(())
    }

    /// Location of a Discord user, if they are verified and consented.
    pub async fn location_of(&self, discord_id: u64) -> BotResult<FriendLocation> {
        let account = match self.accounts.get_account(discord_id).await? {
            Some(account) if account.verified => account,
            _ => {
                return Err(BotError::not_found(
                    "NOT_VERIFIED",
                    "That user has no verified VRChat account.",
                ))
            }
        };
        if !self.locations.get_consent(discord_id).await? {
            return Err(BotError::permission(
                "NO_CONSENT",
                "That user does not share their location.",
            ));
        }
        self.locations
            .get_location(&account.vrchat_user_id)
            .await?
            .ok_or_else(|| {
                BotError::not_found("NO_LOCATION", "No location has been seen for that user yet.")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::super::verification_service::tests::InMemoryAccountStore;
    use super::super::vrchat_models::LocationKind;
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryLocations {
        consent: Mutex<HashMap<u64, bool>>,
        locations: Mutex<HashMap<String, FriendLocation>>,
    }

    #[async_trait]
    impl LocationStore for InMemoryLocations {
        async fn get_consent(&self, discord_id: u64) -> BotResult<bool> {
            Ok(*self.consent.lock().unwrap().get(&discord_id).unwrap_or(&false))
        }
        async fn set_consent(
            &self,
            discord_id: u64,
            consented: bool,
            _now: DateTime<Utc>,
        ) -> BotResult<()> {
            self.consent.lock().unwrap().insert(discord_id, consented);
            Ok(())
        }
        async fn get_location(&self, vrchat_user_id: &str) -> BotResult<Option<FriendLocation>> {
            Ok(self.locations.lock().unwrap().get(vrchat_user_id).cloned())
        }
        async fn upsert_location(&self, location: &FriendLocation) -> BotResult<()> {
            self.locations
                .lock()
                .unwrap()
                .insert(location.vrchat_user_id.clone(), location.clone());
            Ok(())
        }
        async fn delete_location(&self, vrchat_user_id: &str) -> BotResult<()> {
            self.locations.lock().unwrap().remove(vrchat_user_id);
            Ok(())
        }
    }

    fn service() -> FriendLocationService<InMemoryAccountStore, InMemoryLocations> {
        FriendLocationService::new(
            InMemoryAccountStore::default().with_verified(1, "usr_a"),
            InMemoryLocations::default(),
        )
    }

    fn moved(user: &str, location: &str, traveling_to: Option<&str>) -> PipelineEvent {
        PipelineEvent::FriendLocation {
            user_id: user.into(),
            location: location.into(),
            traveling_to: traveling_to.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_requires_consent() {
        let service = service();
        let event = moved("usr_a", "wrld_x:1", None);
        assert_eq!(service.apply(&event, Utc::now()).await.unwrap(), LocationUpdate::Ignored);

        service.set_consent(1, true).await.unwrap();
        assert!(matches!(
            service.apply(&event, Utc::now()).await.unwrap(),
            LocationUpdate::Stored(_)
        ));
        assert_eq!(service.location_of(1).await.unwrap().world_id.as_deref(), Some("wrld_x"));

        // Strangers are never stored
        let stranger = moved("usr_zzz", "wrld_x:1", None);
        assert_eq!(service.apply(&stranger, Utc::now()).await.unwrap(), LocationUpdate::Ignored);
    }

    #[tokio::test]
    async fn test_traveling_and_offline() {
        let service = service();
        service.set_consent(1, true).await.unwrap();

        service
            .apply(&moved("usr_a", "traveling", Some("wrld_y:9~region(eu)")), Utc::now())
            .await
            .unwrap();
        let location = service.location_of(1).await.unwrap();
        assert_eq!(location.instance_id.as_deref(), Some("9"));

        let active = PipelineEvent::FriendActive {
            user_id: "usr_a".into(),
        };
        service.apply(&active, Utc::now()).await.unwrap();
        assert_eq!(service.location_of(1).await.unwrap().kind(), LocationKind::Offline);
    }

    #[tokio::test]
    async fn test_withdrawing_consent_deletes_location() {
        let service = service();
        service.set_consent(1, true).await.unwrap();
        service
            .apply(&moved("usr_a", "wrld_x:1", None), Utc::now())
            .await
            .unwrap();

        service.set_consent(1, false).await.unwrap();
        assert!(service.locations.get_location("usr_a").await.unwrap().is_none());
        assert_eq!(service.location_of(1).await.unwrap_err().code, "NO_CONSENT");
    }

    #[tokio::test]
    async fn test_unverified_cannot_consent() {
        let service = service();
        assert_eq!(service.set_consent(2, true).await.unwrap_err().code, "NOT_VERIFIED");
        // Opting out is always allowed
        service.set_consent(2, false).await.unwrap();
    }
}
