//! Wall-clock access factored behind a function so tests can't be made
//! flaky by it and so the rest of the crate never touches `SystemTime`
//! directly.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as a Unix timestamp (seconds since 1970-01-01).
pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
