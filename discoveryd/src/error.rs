//! Error types for the discovery daemon.

use std::path::PathBuf;
use shared::tlv::CodecError;
use shared::types::Name;

/// A session could not establish its subscriptions. Fatal to that session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("prefix {0} is already registered")]
    DuplicatePrefix(Name),

    #[error("node {node} already joined sync group {group}")]
    DuplicateNode { group: Name, node: Name },

    #[error("{0} must not be empty")]
    EmptyName(&'static str),
}

/// Failure of a single named fetch. Handled by retransmission, never surfaced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("fetch of {0} timed out")]
    Timeout(Name),

    #[error("{0} was replaced by a newer sequence")]
    Superseded(Name),
}

/// Malformed configuration. Fatal before any session starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Errors returned through a [`SessionHandle`](crate::session::SessionHandle).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("session is not running")]
    Closed,
}
