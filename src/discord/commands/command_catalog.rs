// Slash commands. One file per feature, each exposing a parent command.

pub mod attendance;
pub mod group;
pub mod loa;
pub mod location;
pub mod pishock;
pub mod verify;
pub mod whitelist;

use crate::discord::{Data, Error};

/// Every command the bot registers.
pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![
        attendance::attendance(),
        loa::loa(),
        verify::verify(),
        group::group(),
        location::location(),
        whitelist::whitelist(),
        pishock::pishock(),
    ]
}
