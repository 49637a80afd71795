//! Error type shared by every Dripline crate.

/// Errors surfaced by the scheduler and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum DriplineError {
    /// Missing or invalid credential. The run is never started.
    #[error("Unauthorized: {0}")]
    Auth(String),

    /// Invalid window bounds, unknown kind, or a bad config value.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A referenced user or kind does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The user store could not be reached or queried.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The outbound email provider rejected or failed a send.
    #[error("Send failed: {0}")]
    SendFailure(String),

    /// A background run task panicked or was cancelled.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DriplineError {
    /// Short machine-readable code used in JSON error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            DriplineError::Auth(_) => "auth_error",
            DriplineError::Configuration(_) => "configuration_error",
            DriplineError::NotFound(_) => "not_found",
            DriplineError::StoreUnavailable(_) => "store_unavailable",
            DriplineError::SendFailure(_) => "send_failure",
            DriplineError::Internal(_) => "internal_error",
            DriplineError::Io(_) => "io_error",
            DriplineError::Serialization(_) => "serialization_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, DriplineError>;
