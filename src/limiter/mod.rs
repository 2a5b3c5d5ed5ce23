// ABOUTME: Admission control module - per-user token buckets.
// ABOUTME: Contains the rate limiter and its background refill loop.

mod rate_limiter;

pub use rate_limiter::RateLimiter;
