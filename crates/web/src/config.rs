//! Startup-time configuration errors.
//!
//! Everything here is raised while the server is being assembled. Nothing in
//! this module is ever produced at request time; a registration problem that
//! survived to runtime would be a bug in the builder.

use thiserror::Error;

use crate::ext::ExtPoint;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("extension dependency cycle at {point:?} involving groups {groups:?}")]
    ExtensionCycle { point: ExtPoint, groups: Vec<String> },

    #[error("reply decoration name '{0}' collides with a built-in")]
    ReservedDecoration(String),

    #[error("reply decoration '{0}' already registered")]
    DuplicateDecoration(String),

    #[error("auth strategy '{0}' already registered")]
    DuplicateStrategy(String),

    #[error("auth strategy '{0}' is not registered")]
    UnknownStrategy(String),

    #[error("default auth strategy already set to '{existing}', cannot also set '{requested}'")]
    DefaultStrategyTaken { existing: String, requested: String },

    #[error("route '{path}' is invalid: {reason}")]
    InvalidRoute { path: String, reason: String },

    #[error("server address must be set")]
    MissingAddress,

    #[error("server address '{address}' cannot be resolved: {source}")]
    BadAddress {
        address: String,
        #[source]
        source: std::io::Error,
    },
}
