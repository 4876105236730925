pub mod pipeline;
pub mod sqlite_vrchat_store;
pub mod vrchat_client;

pub use sqlite_vrchat_store::SqliteVrchatStore;
pub use vrchat_client::VrchatClient;
