// GitHub App auth and the whitelist file it publishes.

pub mod github_app;
pub mod whitelist_repo;

pub use github_app::GithubAppAuth;
pub use whitelist_repo::GithubWhitelistRepo;
