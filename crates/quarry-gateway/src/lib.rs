pub mod auth;
pub mod rate_limiter;
pub mod server;
pub mod session_manager;
pub mod types;

pub use auth::AuthConfig;
pub use rate_limiter::{DailyRateLimiter, RateLimitStatus};
pub use server::{create_router, start_server, AppState};
pub use session_manager::{PendingSession, SessionManager};
