use thiserror::Error;

pub type Result<T> = std::result::Result<T, CastError>;

/// Failures reported to callers of the public responder operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CastError {
    /// Network, interface or discovery service not reachable right now
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Rejected synchronously; retrying the same input will not help
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// The reconciliation queue has shut down
    #[error("controller is no longer running")]
    ControllerGone,
}

impl From<shared::types::UnknownValue> for CastError {
    fn from(err: shared::types::UnknownValue) -> Self {
        CastError::InvalidInput(err.to_string())
    }
}
