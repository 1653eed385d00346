use std::time::{SystemTime, UNIX_EPOCH};

/// One day in milliseconds, the length of the messaging window.
pub const DAY_MS: i64 = 86_400_000;

/// Current wall-clock time as epoch milliseconds.
///
/// Every timestamp in the system (store columns, window math, tier
/// thresholds) is epoch millis, so this is the single clock source.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
