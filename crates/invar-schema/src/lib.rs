pub mod args;
pub mod fields;
pub mod validate;

pub use fields::{worker_fields_schema, WorkerField, MASKED_VALUE};
pub use validate::{
    enroll_schema, patch_request_schema, window_schema, EnrollBranch, SchemaValidator,
};
