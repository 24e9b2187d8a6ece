pub mod auth;
pub mod rate_limit;

pub use auth::AuthContext;
pub use rate_limit::RateLimiter;
