//! Session edge errors.
//!
//! None of these ever cross a peer boundary: a peer that fails to apply an
//! inbound message logs it and carries on.

use std::path::PathBuf;

use lectern_core::EntityId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// A collaborator was not supplied at construction.
    #[error("missing dependency: {0}")]
    MissingDependency(&'static str),

    #[error("clip index {index} out of range (catalog has {len})")]
    OutOfRangeSelection { index: usize, len: usize },

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to install log subscriber: {0}")]
    LoggingInit(String),

    #[error("wire decode failed: {0}")]
    WireDecode(#[from] prost::DecodeError),

    #[error("malformed message: {0}")]
    Malformed(&'static str),

    /// The operation writes shared state and the local peer is not the
    /// authority, nor allowed to become it.
    #[error("local peer is not authoritative for entity {0}")]
    NotAuthoritative(EntityId),

    #[error(transparent)]
    Core(#[from] lectern_core::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
