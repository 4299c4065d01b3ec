//! Error types shared by every palwatch crate.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors surfaced by the remote control API and the remote filesystem.
///
/// Cloneable so a single failed fetch can be handed to every caller that
/// waited on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Connection refused, reset, or timed out.
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials were rejected by the remote host.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The remote answered with something we could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote path does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    /// Stable label used as the `kind` field in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::Transport(_) => "transport",
            RemoteError::Auth(_) => "auth",
            RemoteError::Protocol(_) => "protocol",
            RemoteError::NotFound(_) => "not_found",
        }
    }

    /// Whether the host itself could not be reached.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RemoteError::Transport(_))
    }
}

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating `palwatch.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct() {
        let errors = [
            RemoteError::Transport("refused".into()),
            RemoteError::Auth("bad password".into()),
            RemoteError::Protocol("not json".into()),
            RemoteError::NotFound("Level.sav".into()),
        ];
        let mut kinds: Vec<_> = errors.iter().map(RemoteError::kind).collect();
        kinds.dedup();
        assert_eq!(kinds.len(), 4);
    }

    #[test]
    fn only_transport_is_unreachable() {
        assert!(RemoteError::Transport("timeout".into()).is_unreachable());
        assert!(!RemoteError::Auth("401".into()).is_unreachable());
        assert!(!RemoteError::NotFound("x".into()).is_unreachable());
    }

    #[test]
    fn display_includes_detail() {
        let err = RemoteError::Auth("401 Unauthorized".into());
        assert_eq!(err.to_string(), "authentication rejected: 401 Unauthorized");
    }
}
