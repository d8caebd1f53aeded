//! HTTP client module
//!
//! Provides the HTTP transport for REST-speaking stores, with retry,
//! rate limiting, and backoff strategies.

mod client;
mod rate_limit;

pub use client::{Body, HttpClient, HttpClientConfig, RequestConfig};
pub use rate_limit::{RateLimiter, RateLimiterConfig};

#[cfg(test)]
mod tests;
