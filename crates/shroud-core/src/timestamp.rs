//! wall-clock helpers and the per-request timestamp window

use std::time::{SystemTime, UNIX_EPOCH};

/// allowance for request timestamps in the past
pub const TIMESTAMP_PAST_ALLOWANCE: u64 = 40 * 60;
/// allowance for request timestamps in the future
pub const TIMESTAMP_FUTURE_ALLOWANCE: u64 = 5 * 60;

pub fn unixtime() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// true when `timestamp` falls inside `[now - past, now + future]`
pub fn timestamp_in_window(timestamp: u64, past: u64, future: u64, now: u64) -> bool {
    timestamp.saturating_add(past) >= now && timestamp <= now.saturating_add(future)
}
