pub mod error;
pub mod memory;
pub mod postgres_store;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres_store::PgStore;
pub use store::Store;
pub use types::{HardwareUpdate, ListFilters, NewHardware, SortDir, TaskUpdate};
