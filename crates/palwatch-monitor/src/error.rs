//! Monitor error types.

use palwatch_core::RemoteError;
use thiserror::Error;

/// Errors a single worker poll can end with. None of them stop the worker.
#[derive(Debug, Clone, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The corrective shutdown request itself failed.
    #[error("restart request for {server} failed: {source}")]
    EscalationFailed {
        server: String,
        #[source]
        source: RemoteError,
    },

    #[error("event delivery failed: {0}")]
    Sink(String),
}

impl MonitorError {
    /// Stable label used as the `kind` field in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::Remote(e) => e.kind(),
            MonitorError::EscalationFailed { .. } => "escalation_failed",
            MonitorError::Sink(_) => "sink",
        }
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
