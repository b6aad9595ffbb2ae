pub mod billing;
pub mod error;
pub mod identity;
pub mod rate_limit;
pub mod rest;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::AppState;
