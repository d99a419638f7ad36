//! Resilience
//!
//! Bounded exponential backoff retry with jitter for dispatched requests.

pub mod retry;

pub use retry::{
    parse_retry_after, RetryConfig, RetryDecision, RetryExecutor, RetryPolicy, RetryStats,
    DEFAULT_RETRY_CONFIG,
};
