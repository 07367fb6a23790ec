//! Rate limiting logic and state management.

mod bucket;
mod limiter;
mod reclaimer;
mod store;

pub use bucket::TokenBucket;
pub use limiter::{Decision, RateLimiter};
pub use store::{Admission, QuotaStore};
