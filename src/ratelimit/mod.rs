//! Rate limiting primitives.

mod counter;
mod limiter;

pub use counter::{HitCounter, MAX_WINDOW};
pub use limiter::TokenRateLimiter;
