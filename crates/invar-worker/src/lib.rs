pub mod error;
pub mod fake;
pub mod hardware_type;
pub mod http;
pub mod orchestrator;
pub mod provisioner;
pub mod registry;
pub mod reservation;
pub mod tunnel;
pub mod worker;

pub use error::WorkerError;
pub use fake::FakeWorker;
pub use hardware_type::HardwareType;
pub use orchestrator::OrchestratorWorker;
pub use provisioner::ProvisionerWorker;
pub use registry::DriverRegistry;
pub use reservation::ReservationWorker;
pub use tunnel::TunnelWorker;
pub use worker::{HardwareImport, Worker, WorkerResult};
