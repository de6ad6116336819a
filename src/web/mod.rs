pub mod auth;
pub mod error;
pub mod router;
pub mod state;

pub use state::AppState;
