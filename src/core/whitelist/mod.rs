pub mod whitelist_service;

pub use whitelist_service::{
    render_whitelist, CachePurger, PublishOutcome, WhitelistEntry, WhitelistPublisher,
    WhitelistService, WhitelistSyncReport,
};
