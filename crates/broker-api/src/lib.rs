pub mod app;
pub mod auth;
pub mod envelope;
pub mod error;
pub mod facade;
pub mod handlers;
pub mod rate_limit;
pub mod state;

pub use app::build_app;
pub use error::ApiError;
pub use facade::Broker;
pub use rate_limit::RateLimiter;
pub use state::AppState;
