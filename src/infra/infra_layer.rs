// Implementations of the core store and client traits.
// SQLite stores live next to the HTTP clients for the same feature.

pub mod database;

pub mod attendance;
pub mod cloudflare;
pub mod github;
pub mod loa;
pub mod pishock;
pub mod settings;
pub mod vrchat;
