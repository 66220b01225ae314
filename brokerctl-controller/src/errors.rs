use brokerctl_client::ManagementError;
use brokerctl_core::CoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControllerError>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("broker management error: {0}")]
    Management(#[from] ManagementError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("no desired state has been defined")]
    NoDesiredState,

    #[error("unable to perform operation: {0}")]
    Unrecoverable(String),
}
