// Error taxonomy shared by every layer.
//
// One struct with a closed `ErrorKind` instead of a class per vendor. Infra code
// maps driver errors into this at the boundary; the Discord and HTTP layers read
// `kind` to decide how to answer.

use std::fmt;
use thiserror::Error;

/// Which domain an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    VrChat,
    Database,
    Validation,
    Permission,
    Config,
    Discord,
    Whitelist,
    PiShock,
    NotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::VrChat => "VRChat",
            ErrorKind::Database => "Database",
            ErrorKind::Validation => "Validation",
            ErrorKind::Permission => "Permission",
            ErrorKind::Config => "Config",
            ErrorKind::Discord => "Discord",
            ErrorKind::Whitelist => "Whitelist",
            ErrorKind::PiShock => "PiShock",
            ErrorKind::NotFound => "NotFound",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("{kind} error [{code}]: {message}")]
pub struct BotError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
    pub context: Vec<(&'static str, String)>,
}

pub type BotResult<T> = Result<T, BotError>;

impl BotError {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: Vec::new(),
        }
    }

    /// Attach a key/value pair that ends up in logs (never in user replies).
    pub fn with_context(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.context.push((key, value.to_string()));
        self
    }

    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, code, message)
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, code, message)
    }

    pub fn permission(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, code, message)
    }

    pub fn config(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, code, message)
    }

    pub fn vrchat(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::VrChat, code, message)
    }

    pub fn whitelist(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Whitelist, code, message)
    }

    pub fn pishock(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PiShock, code, message)
    }

    pub fn discord(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Discord, code, message)
    }

    /// Wrap a storage driver error. Used as `.map_err(BotError::database)`.
    pub fn database(err: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Database, "QUERY_FAILED", err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    /// Text that is safe to show in a Discord reply.
    ///
    /// Validation, permission, not-found and config messages are written for
    /// users, so they pass through. Everything else collapses into a generic
    /// sentence since driver messages can leak internals.
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::Validation
            | ErrorKind::NotFound
            | ErrorKind::Permission
            | ErrorKind::Config => self.message.clone(),
            ErrorKind::VrChat => {
                "VRChat did not answer the way we expected. Please try again in a moment."
                    .to_string()
            }
            ErrorKind::Whitelist => "The whitelist could not be updated right now.".to_string(),
            ErrorKind::PiShock => "PiShock did not accept that. Check that the shocker is online.".to_string(),
            _ => "Something went wrong while handling that. The error has been logged."
                .to_string(),
        }
    }
}
