pub mod friend_location;
pub mod group_sync;
pub mod verification_service;
pub mod vrchat_api;
pub mod vrchat_models;

pub use friend_location::{FriendLocationService, LocationStore, LocationUpdate};
pub use group_sync::{
    plan_role_sync, BulkSyncReport, GroupSyncService, MemberRoles, MemberSyncOutcome,
    RoleSyncPlan,
};
pub use verification_service::{AccountStore, PendingVerification, VerificationService};
pub use vrchat_api::VrchatApi;
pub use vrchat_models::*;
