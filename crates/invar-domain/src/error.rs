use thiserror::Error;
use uuid::Uuid;

/// Coarse classification used to map errors onto HTTP responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-provided input failed validation (400).
    Invalid,
    /// Caller is not allowed to perform the operation (403).
    NotAuthorized,
    /// The named entity does not exist (404).
    NotFound,
    /// Uniqueness violation (409).
    Conflict,
    /// Transient downstream/resource exhaustion (503).
    TemporaryFailure,
    /// Anything else (500).
    Unhandled,
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Couldn't apply patch '{patch}'. Reason: {reason}")]
    Patch { patch: String, reason: String },

    #[error("{0}")]
    InvalidParameterValue(String),

    #[error("Missing mandatory parameter: {0}")]
    MissingParameterValue(String),

    #[error("Not authorized: {0}")]
    PolicyNotAuthorized(String),

    #[error("Hardware {0} could not be found.")]
    HardwareNotFound(String),

    #[error("Hardware with UUID {0} already exists.")]
    HardwareAlreadyExists(Uuid),

    #[error("Hardware with name {0} already exists.")]
    HardwareDuplicateName(String),

    #[error("Availability window {0} could not be found.")]
    AvailabilityWindowNotFound(Uuid),

    #[error("Worker task {0} could not be found.")]
    WorkerTaskNotFound(Uuid),

    #[error("Worker task with UUID {0} already exists.")]
    WorkerTaskAlreadyExists(Uuid),

    #[error("Could not find driver or hardware type: {0}")]
    DriverNotFound(String),

    #[error("Driver {driver} could not be loaded. Reason: {reason}")]
    DriverLoadError { driver: String, reason: String },

    #[error("Host {0} cannot be started because no hardware types were loaded.")]
    DriversNotLoaded(String),

    #[error("Requested action cannot be performed due to lack of free workers.")]
    NoFreeWorker,

    #[error("{service} is unavailable: {message}")]
    ServiceUnavailable { service: String, message: String },
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Patch { .. }
            | DomainError::InvalidParameterValue(_)
            | DomainError::MissingParameterValue(_)
            | DomainError::DriverNotFound(_) => ErrorKind::Invalid,
            DomainError::PolicyNotAuthorized(_) => ErrorKind::NotAuthorized,
            DomainError::HardwareNotFound(_)
            | DomainError::AvailabilityWindowNotFound(_)
            | DomainError::WorkerTaskNotFound(_) => ErrorKind::NotFound,
            DomainError::HardwareAlreadyExists(_)
            | DomainError::HardwareDuplicateName(_)
            | DomainError::WorkerTaskAlreadyExists(_) => ErrorKind::Conflict,
            DomainError::NoFreeWorker | DomainError::ServiceUnavailable { .. } => {
                ErrorKind::TemporaryFailure
            }
            DomainError::DriverLoadError { .. } | DomainError::DriversNotLoaded(_) => {
                ErrorKind::Unhandled
            }
        }
    }
}
