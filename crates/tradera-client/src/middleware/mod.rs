//! Middleware wrapped around every remote call (rate limiting, retry, caching).
//!
//! Each piece is independent of the Tradera services and usable on its own;
//! [`crate::client::Dispatcher`] composes them in the order
//! cache → rate limit → retry → operation.

mod cache;
mod rate_limit;
mod retry;

pub use cache::Cache;
pub(crate) use cache::SweepBarrier;
pub use rate_limit::RateLimiter;
pub use retry::{RetryError, RetryPolicy, Retryer};
