// The core module contains all business logic.
// Each feature gets its own submodule; none of them know about Discord or HTTP.

#[path = "errors/bot_error.rs"]
pub mod errors;

pub mod attendance;
pub mod loa;
pub mod pishock;
pub mod settings;
pub mod vrchat;
pub mod whitelist;
