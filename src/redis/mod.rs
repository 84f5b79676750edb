//! Redis helpers shared by discovery
//!
//! - `ExponentialBackoff`: delays between reconnection attempts

mod backoff;

pub use backoff::{BackoffConfig, ExponentialBackoff};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
