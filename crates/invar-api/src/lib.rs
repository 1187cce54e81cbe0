pub mod app;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod serialize;
pub mod state;

pub use app::build_app;
pub use auth::{Authenticator, StaticAuthenticator};
pub use state::AppState;
