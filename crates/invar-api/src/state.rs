use std::sync::Arc;

use invar_schema::SchemaValidator;
use invar_store::Store;
use invar_worker::DriverRegistry;

use crate::auth::Authenticator;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registry: Arc<DriverRegistry>,
    pub authenticator: Arc<dyn Authenticator>,
    /// Composed enroll schema, compiled once at startup.
    pub enroll_validator: Arc<SchemaValidator>,
    /// Patch request-body shape, compiled once at startup.
    pub patch_validator: Arc<SchemaValidator>,
    pub max_limit: u32,
}
