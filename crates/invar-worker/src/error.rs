use thiserror::Error;
use uuid::Uuid;

/// Failures a worker may surface from `process`. The reconciler is the sole
/// catch point; any of these moves the task to ERROR with the formatted
/// message recorded as `last_error`.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Could not contact {service} API. Please check the service configuration. The precise error was: {message}")]
    ServiceUnavailable { service: String, message: String },

    #[error("{service} responded with HTTP {code}: {text}")]
    Api {
        service: String,
        code: u16,
        text: String,
    },

    #[error("{service} response malformed: {text}")]
    MalformedResponse { service: String, text: String },

    #[error("Node {node} timed out updating its provision state to {state}")]
    ProvisionStateTimeout { node: Uuid, state: String },

    #[error("{0}")]
    Invalid(String),

    #[error("internal worker error: {0}")]
    Internal(String),
}
