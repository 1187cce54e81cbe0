pub mod context;
pub mod error;
pub mod types;

pub use context::Context;
pub use error::{DomainError, ErrorKind};
pub use types::{
    AvailabilityWindow, Hardware, StateDetails, TaskState, WorkerTask,
    DEFER_COUNT_DETAIL, DEFER_REASON_DETAIL, FALLBACK_PAYLOAD_DETAIL, LAST_ERROR_DETAIL,
    TRANSIENT_DETAILS,
};
