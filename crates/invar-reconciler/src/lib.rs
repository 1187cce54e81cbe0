pub mod error;
pub mod reconcile;

pub use error::ReconcileError;
pub use reconcile::Reconciler;
