mod auth;
mod rate_limit;

pub use auth::{AuthUser, TokenRejected, VerifiedUid};
pub use rate_limit::{RateLimitLayer, RatePolicy};
