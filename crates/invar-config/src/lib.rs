mod loader;
mod raw;
pub mod error;

pub use error::ConfigError;
pub use loader::load_config;
pub use raw::{
    ApiConfig, AuthTokenEntry, Config, DatabaseConfig, OrchestratorConfig, ProvisionerConfig,
    ReservationConfig, TunnelConfig, WorkerConfig,
};
