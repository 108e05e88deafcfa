pub mod authorization;
pub mod middleware;
pub mod origin_allowlist;
pub mod rate_limiter;

pub use authorization::WorkspaceGuard;
pub use middleware::request_context_middleware;
pub use origin_allowlist::OriginAllowlist;
pub use rate_limiter::RateLimiter;
