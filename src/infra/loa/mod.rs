pub mod sqlite_loa_store;

pub use sqlite_loa_store::SqliteLoaStore;
