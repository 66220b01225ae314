use thiserror::Error;

pub type Result<T> = std::result::Result<T, ManagementError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ManagementError {
    /// The broker replied without `_AMQ_OperationSucceeded`, or with a body that could not be
    /// decoded. Carries the raw reply body.
    #[error("management operation failed: {0}")]
    OperationFailed(String),

    /// The link went away before a reply arrived.
    #[error("request aborted: {0}")]
    Aborted(String),

    #[error("no reply to {operation} on {resource} within {timeout_ms}ms")]
    Timeout {
        resource: String,
        operation: String,
        timeout_ms: u64,
    },

    #[error("management client is closed")]
    Closed,

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl From<serde_json::Error> for ManagementError {
    fn from(e: serde_json::Error) -> Self {
        ManagementError::UnexpectedReply(e.to_string())
    }
}
