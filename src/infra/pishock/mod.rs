pub mod pishock_client;
pub mod sqlite_panel_store;

pub use pishock_client::PiShockClient;
pub use sqlite_panel_store::SqlitePanelStore;
